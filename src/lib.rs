//! # ims-auth
//!
//! OAuth 2.0 Authorization-Code-with-PKCE client for Adobe IMS-style
//! identity providers.
//!
//! ## Overview
//!
//! This crate obtains, caches, and refreshes an OAuth 2.0 access token using
//! a browser-driven consent step and a local loopback redirect capture. It is
//! the authentication core consumed by API wrappers, which only ever call
//! [`AuthManager::authorization_header`] to obtain a `Bearer` header value.
//!
//! ## Features
//!
//! - OAuth 2.0 authorization code flow with PKCE (RFC 7636, S256)
//! - Loopback redirect capture on a pre-registered localhost port
//! - Durable file-backed token cache with expiry bookkeeping
//! - Automatic token refresh inside a five-minute expiry margin
//! - Explicit configuration object for isolated testing against fake
//!   endpoints
//!
//! ## Usage
//!
//! ```no_run
//! use ims_auth::{AuthConfig, AuthManager};
//!
//! # async fn example() -> ims_auth::Result<()> {
//! let config = AuthConfig::from_env()?;
//! let manager = AuthManager::new(config);
//!
//! // Interactive: opens the system browser and waits for the redirect.
//! let record = manager.authenticate().await?;
//! println!("token expires in {}s", record.expires_in);
//!
//! // Non-interactive: used by API wrappers on every request.
//! if let Some(header) = manager.authorization_header().await {
//!     println!("{header}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod listener;
pub mod manager;
pub mod oauth;
pub mod pkce;
pub mod tokens;

pub use cache::TokenCache;
pub use config::{AuthConfig, AuthConfigBuilder};
pub use error::{AuthError, Result};
pub use listener::{RedirectListener, RedirectOutcome};
pub use manager::AuthManager;
pub use oauth::OAuthClient;
pub use pkce::PkcePair;
pub use tokens::{AuthState, TokenRecord, REFRESH_MARGIN_SECS};
