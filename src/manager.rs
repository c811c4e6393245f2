//! Authentication orchestrator.
//!
//! `AuthManager` sequences the PKCE generator, redirect listener,
//! authorization initiator, token exchange client, and token cache into the
//! state machine:
//!
//! ```text
//! Unauthenticated -> AwaitingConsent -> AwaitingRedirect -> Exchanging -> Cached
//!                                                                          ^  |
//!                                                                          |  v
//!                                                                       Refreshing
//! ```
//!
//! `Cached` is the only state callers care about. [`authenticate`] drives
//! the full interactive flow; [`authorization_header`] is the non-interactive
//! path consumed by API wrappers and never opens a browser.
//!
//! The redirect listener is stopped on every exit path of the interactive
//! flow (completion, denial, timeout, and exchange failure alike), so the
//! pre-registered loopback port is always released.
//!
//! [`authenticate`]: AuthManager::authenticate
//! [`authorization_header`]: AuthManager::authorization_header

use crate::cache::TokenCache;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::listener::{RedirectListener, RedirectOutcome};
use crate::oauth::OAuthClient;
use crate::pkce::{self, PkcePair};
use crate::tokens::{AuthState, TokenRecord};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Orchestrates the authorization-code-with-PKCE flow.
pub struct AuthManager {
    config: Arc<AuthConfig>,
    oauth: OAuthClient,
    cache: TokenCache,
    state: RwLock<AuthState>,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Self {
        let config = Arc::new(config);
        let oauth = OAuthClient::new(config.clone());
        let cache = TokenCache::new(config.cache_path.clone());

        Self {
            config,
            oauth,
            cache,
            state: RwLock::new(AuthState::Unauthenticated),
        }
    }

    /// The current flow state, for observability.
    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    async fn set_state(&self, state: AuthState) {
        debug!(%state, "auth state transition");
        *self.state.write().await = state;
    }

    /// Obtain a valid token record, interactively if necessary.
    ///
    /// Fast path: a fresh cached record is returned without any network
    /// call. A stale record with a refresh token is refreshed; if the
    /// refresh is rejected, the flow falls through to interactive consent
    /// rather than failing, since an expired refresh token must not block
    /// re-authentication. Otherwise the full browser flow runs, bounded by
    /// the configured consent timeout.
    ///
    /// # Errors
    ///
    /// - `AuthError::Bind` when the pre-registered redirect port is taken
    /// - `AuthError::Timeout` when consent does not complete in time
    /// - `AuthError::Denied` when the user refuses consent
    /// - `AuthError::StateMismatch` when the redirect echoes a foreign state
    /// - `AuthError::TokenExchange` when the provider rejects the code; the
    ///   cache is left untouched
    #[instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<TokenRecord> {
        if let Some(record) = self.cache.load().await {
            if record.is_fresh_now() {
                debug!("cached token is fresh; no network call needed");
                self.set_state(AuthState::Cached).await;
                return Ok(record);
            }

            if let Some(refresh_token) = record.refresh_token.clone() {
                match self.refresh_and_save(&refresh_token).await {
                    Ok(record) => return Ok(record),
                    Err(e) => {
                        warn!(error = %e, "refresh failed; falling back to interactive authentication");
                    }
                }
            }
        }

        match self.interactive_flow().await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.set_state(AuthState::Failed).await;
                Err(e)
            }
        }
    }

    /// The `Authorization` header for API requests, or `None` when no valid
    /// token can be produced without user interaction.
    ///
    /// Runs the cache-check path only: a fresh record is used as is, a stale
    /// record with a refresh token is refreshed and re-saved. Never opens a
    /// browser; when this returns `None` the caller decides whether to run
    /// [`authenticate`](AuthManager::authenticate).
    #[instrument(skip(self))]
    pub async fn authorization_header(&self) -> Option<String> {
        let record = self.cache.load().await?;

        if record.is_fresh_now() {
            return Some(record.authorization_header());
        }

        let refresh_token = record.refresh_token.clone()?;
        match self.refresh_and_save(&refresh_token).await {
            Ok(record) => Some(record.authorization_header()),
            Err(e) => {
                warn!(error = %e, "non-interactive refresh failed");
                self.set_state(AuthState::Unauthenticated).await;
                None
            }
        }
    }

    async fn refresh_and_save(&self, refresh_token: &str) -> Result<TokenRecord> {
        self.set_state(AuthState::Refreshing).await;
        let record = self.oauth.refresh(refresh_token).await?;
        let record = self.cache.save(record).await?;
        self.set_state(AuthState::Cached).await;
        Ok(record)
    }

    async fn interactive_flow(&self) -> Result<TokenRecord> {
        self.set_state(AuthState::AwaitingConsent).await;

        let pkce = PkcePair::generate();
        let state = pkce::generate_state();
        let auth_url = self.oauth.build_auth_url(&pkce, &state)?;

        let mut listener =
            RedirectListener::start(self.config.redirect_port, &self.config.redirect_path).await?;

        self.oauth.launch_browser(&auth_url);
        self.set_state(AuthState::AwaitingRedirect).await;
        info!(
            timeout_secs = self.config.consent_timeout.as_secs(),
            "waiting for authorization redirect"
        );

        // The listener is stopped on every path out of this wait before any
        // error is surfaced or any further work happens.
        let outcome = match timeout(self.config.consent_timeout, listener.wait()).await {
            Ok(Ok(outcome)) => {
                listener.stop().await;
                outcome
            }
            Ok(Err(e)) => {
                listener.stop().await;
                return Err(e);
            }
            Err(_elapsed) => {
                listener.stop().await;
                warn!("consent timed out; redirect listener stopped");
                return Err(AuthError::Timeout(self.config.consent_timeout.as_secs()));
            }
        };

        let (code, redirect_state) = match outcome {
            RedirectOutcome::Code { code, state } => (code, state),
            RedirectOutcome::Denied { error, description } => {
                return Err(AuthError::Denied { error, description });
            }
        };

        // A provider that echoes a state must echo ours. One that omits it
        // is tolerated; the code is still bound to our verifier by PKCE.
        if let Some(redirect_state) = redirect_state {
            if redirect_state != state {
                warn!("redirect echoed a foreign state parameter");
                return Err(AuthError::StateMismatch {
                    expected: state,
                    actual: redirect_state,
                });
            }
        }

        self.set_state(AuthState::Exchanging).await;
        let record = self.oauth.exchange_code(&code, &pkce).await?;
        let record = self.cache.save(record).await?;
        self.set_state(AuthState::Cached).await;

        info!("authentication completed");
        Ok(record)
    }
}
