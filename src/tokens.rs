//! Token record and authentication state types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds of remaining validity below which a token counts as stale.
///
/// A token is never handed to a caller with less than five minutes left, so
/// a request built with it cannot expire mid-flight.
pub const REFRESH_MARGIN_SECS: i64 = 300;

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> i64 {
    3600
}

/// The cached token material for the single authenticated subject.
///
/// `issued_at` is always the local epoch time at which the record was
/// accepted into the cache, stamped by [`TokenCache::save`]; it is never a
/// value trusted from the provider. Everything the provider returned beyond
/// the known fields is preserved in `extra` and round-trips through the
/// cache file untouched.
///
/// [`TokenCache::save`]: crate::cache::TokenCache::save
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Token lifetime in seconds, as reported by the provider.
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Local epoch seconds at which the record entered the cache.
    #[serde(default)]
    pub issued_at: i64,

    /// Provider-specific extras (scope, id_token, ...), carried verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenRecord {
    /// Whether the record is still usable at epoch time `now`.
    ///
    /// Fresh means `now - issued_at <= expires_in - REFRESH_MARGIN_SECS`;
    /// freshness is monotone in age, so a record fresh at `t` was fresh at
    /// every earlier instant.
    pub fn is_fresh(&self, now: i64) -> bool {
        now - self.issued_at <= self.expires_in - REFRESH_MARGIN_SECS
    }

    /// Whether the record is fresh against the current local clock.
    pub fn is_fresh_now(&self) -> bool {
        self.is_fresh(chrono::Utc::now().timestamp())
    }

    /// The `Authorization` header value for API requests.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Custom Debug implementation to avoid logging token material
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Authentication flow state.
///
/// `Cached` is the only externally meaningful reusable state; every other
/// state is transient bookkeeping while a flow is in progress.
///
/// # State Transitions
///
/// ```text
/// Unauthenticated -> AwaitingConsent -> AwaitingRedirect -> Exchanging -> Cached
///                                                                           ^  |
///                                                                           |  v
///                                                                        Refreshing
/// ```
///
/// Any state may transition to `Failed` when a flow errors out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AuthState {
    /// No usable token material exists
    #[default]
    Unauthenticated,
    /// Authorization URL handed to the browser
    AwaitingConsent,
    /// Listener bound, waiting for the provider redirect
    AwaitingRedirect,
    /// Exchanging the authorization code for tokens
    Exchanging,
    /// Refreshing a stale access token
    Refreshing,
    /// A valid token record is cached
    Cached,
    /// The last flow ended in an error
    Failed,
}

impl AuthState {
    /// Whether a valid token is currently available.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Cached)
    }

    /// Whether a flow is currently in progress.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            AuthState::AwaitingConsent
                | AuthState::AwaitingRedirect
                | AuthState::Exchanging
                | AuthState::Refreshing
        )
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "unauthenticated"),
            AuthState::AwaitingConsent => write!(f, "awaiting consent"),
            AuthState::AwaitingRedirect => write!(f, "awaiting redirect"),
            AuthState::Exchanging => write!(f, "exchanging code"),
            AuthState::Refreshing => write!(f, "refreshing token"),
            AuthState::Cached => write!(f, "cached"),
            AuthState::Failed => write!(f, "failed"),
        }
    }
}
