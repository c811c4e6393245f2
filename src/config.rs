//! Authentication client configuration.
//!
//! All endpoints, credentials, and timeouts live in an explicitly
//! constructed [`AuthConfig`] passed into the orchestrator, so tests can
//! point the client at fake endpoints instead of the real provider. Use the
//! builder for programmatic construction or [`AuthConfig::from_env`] for the
//! conventional `.env`-backed setup.

use crate::error::{AuthError, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default IMS authorization endpoint.
const DEFAULT_AUTH_URL: &str = "https://ims-na1.adobelogin.com/ims/authorize/v2";

/// Default IMS token endpoint.
const DEFAULT_TOKEN_URL: &str = "https://ims-na1.adobelogin.com/ims/token/v3";

/// The redirect port is pre-registered with the provider and must match the
/// redirect URI on file there; it is configuration, not a free choice.
const DEFAULT_REDIRECT_PORT: u16 = 8000;

const DEFAULT_REDIRECT_PATH: &str = "/callback";

/// How long `authenticate()` waits for the user to complete consent.
const DEFAULT_CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-request timeout for token endpoint calls.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the authentication client.
///
/// # Examples
///
/// ```
/// use ims_auth::AuthConfig;
///
/// let config = AuthConfig::builder()
///     .client_id("my-client-id")
///     .client_secret("my-client-secret")
///     .cache_path("/tmp/ims-auth-tokens.json")
///     .build()
///     .unwrap();
///
/// assert_eq!(config.redirect_uri(), "http://localhost:8000/callback");
/// ```
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret (optional for public clients)
    pub client_secret: Option<String>,
    /// Authorization endpoint URL
    pub auth_url: String,
    /// Token endpoint URL
    pub token_url: String,
    /// Requested scopes, joined with commas as IMS expects
    pub scopes: Vec<String>,
    /// Host name used in the registered redirect URI
    pub redirect_host: String,
    /// Loopback port the provider redirects to
    pub redirect_port: u16,
    /// Path component of the redirect URI
    pub redirect_path: String,
    /// Location of the token cache file
    pub cache_path: PathBuf,
    /// Upper bound on the interactive consent wait
    pub consent_timeout: Duration,
    /// Upper bound on each token endpoint call
    pub request_timeout: Duration,
    /// Whether to hand the authorization URL to the system browser
    pub launch_browser: bool,
}

impl AuthConfig {
    /// Start building a configuration with provider defaults.
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Load configuration from the environment, honoring a `.env` file.
    ///
    /// Recognized variables: `IMS_CLIENT_ID` (required),
    /// `IMS_CLIENT_SECRET`, `IMS_AUTH_URL`, `IMS_TOKEN_URL`,
    /// `IMS_REDIRECT_URI`, `IMS_SCOPES` (comma-separated),
    /// `IMS_CACHE_PATH`, and `IMS_REQUEST_TIMEOUT` (seconds).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = Self::builder();

        match std::env::var("IMS_CLIENT_ID") {
            Ok(id) => builder = builder.client_id(id),
            Err(_) => {
                return Err(AuthError::Config(
                    "IMS_CLIENT_ID is not set".to_string(),
                ))
            }
        }
        if let Ok(secret) = std::env::var("IMS_CLIENT_SECRET") {
            builder = builder.client_secret(secret);
        }
        if let Ok(auth_url) = std::env::var("IMS_AUTH_URL") {
            builder = builder.auth_url(auth_url);
        }
        if let Ok(token_url) = std::env::var("IMS_TOKEN_URL") {
            builder = builder.token_url(token_url);
        }
        if let Ok(redirect_uri) = std::env::var("IMS_REDIRECT_URI") {
            builder = builder.redirect_uri(&redirect_uri)?;
        }
        if let Ok(scopes) = std::env::var("IMS_SCOPES") {
            builder = builder.scopes(scopes.split(',').map(|s| s.trim().to_string()));
        }
        if let Ok(path) = std::env::var("IMS_CACHE_PATH") {
            builder = builder.cache_path(path);
        }
        if let Ok(secs) = std::env::var("IMS_REQUEST_TIMEOUT") {
            let secs: u64 = secs.parse().map_err(|_| {
                AuthError::Config(format!("IMS_REQUEST_TIMEOUT is not a number: {secs}"))
            })?;
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// The redirect URI as registered with the provider.
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.redirect_host, self.redirect_port, self.redirect_path
        )
    }
}

/// Builder for [`AuthConfig`] with fail-fast validation in [`build`].
///
/// [`build`]: AuthConfigBuilder::build
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    auth_url: Option<String>,
    token_url: Option<String>,
    scopes: Option<Vec<String>>,
    redirect_host: Option<String>,
    redirect_port: Option<u16>,
    redirect_path: Option<String>,
    cache_path: Option<PathBuf>,
    consent_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    launch_browser: Option<bool>,
}

impl AuthConfigBuilder {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = Some(auth_url.into());
        self
    }

    pub fn token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    pub fn scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        self.scopes = Some(scopes.into_iter().collect());
        self
    }

    pub fn redirect_host(mut self, host: impl Into<String>) -> Self {
        self.redirect_host = Some(host.into());
        self
    }

    pub fn redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = Some(port);
        self
    }

    pub fn redirect_path(mut self, path: impl Into<String>) -> Self {
        self.redirect_path = Some(path.into());
        self
    }

    /// Set host, port, and path from a full redirect URI.
    pub fn redirect_uri(mut self, uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| AuthError::Config(format!("invalid redirect URI '{uri}': {e}")))?;

        let host = url
            .host_str()
            .ok_or_else(|| AuthError::Config(format!("redirect URI '{uri}' has no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AuthError::Config(format!("redirect URI '{uri}' has no port")))?;

        self.redirect_host = Some(host.to_string());
        self.redirect_port = Some(port);
        self.redirect_path = Some(url.path().to_string());
        Ok(self)
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Disable the browser hand-off for headless or test environments; the
    /// authorization URL is then only logged.
    pub fn launch_browser(mut self, launch: bool) -> Self {
        self.launch_browser = Some(launch);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` when the client ID is missing or empty,
    /// or when no cache path is set and the home directory cannot be
    /// resolved.
    pub fn build(self) -> Result<AuthConfig> {
        let client_id = match self.client_id {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(AuthError::Config(
                    "client_id is required; set it on the builder or via IMS_CLIENT_ID"
                        .to_string(),
                ))
            }
        };

        let cache_path = match self.cache_path {
            Some(path) => path,
            None => dirs::home_dir()
                .ok_or_else(|| {
                    AuthError::Config(
                        "cannot resolve home directory for the token cache; set cache_path"
                            .to_string(),
                    )
                })?
                .join(".ims-auth")
                .join("tokens.json"),
        };

        Ok(AuthConfig {
            client_id,
            client_secret: self.client_secret,
            auth_url: self.auth_url.unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            token_url: self
                .token_url
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            scopes: self.scopes.unwrap_or_else(|| {
                vec![
                    "openid".to_string(),
                    "AdobeID".to_string(),
                    "creative_sdk".to_string(),
                    "lr_partner_apis".to_string(),
                ]
            }),
            redirect_host: self
                .redirect_host
                .unwrap_or_else(|| "localhost".to_string()),
            redirect_port: self.redirect_port.unwrap_or(DEFAULT_REDIRECT_PORT),
            redirect_path: self
                .redirect_path
                .unwrap_or_else(|| DEFAULT_REDIRECT_PATH.to_string()),
            cache_path,
            consent_timeout: self.consent_timeout.unwrap_or(DEFAULT_CONSENT_TIMEOUT),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            launch_browser: self.launch_browser.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = AuthConfig::builder()
            .client_id("client")
            .cache_path("/tmp/tokens.json")
            .build()
            .unwrap();

        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.redirect_port, 8000);
        assert_eq!(config.redirect_uri(), "http://localhost:8000/callback");
        assert_eq!(config.consent_timeout, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.launch_browser);
        assert!(config.scopes.contains(&"AdobeID".to_string()));
    }

    #[test]
    fn test_builder_requires_client_id() {
        let result = AuthConfig::builder().cache_path("/tmp/t.json").build();
        assert!(matches!(result, Err(AuthError::Config(_))));

        let result = AuthConfig::builder()
            .client_id("")
            .cache_path("/tmp/t.json")
            .build();
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_redirect_uri_from_full_uri() {
        let config = AuthConfig::builder()
            .client_id("client")
            .cache_path("/tmp/t.json")
            .redirect_uri("http://127.0.0.1:9321/oauth/done")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.redirect_host, "127.0.0.1");
        assert_eq!(config.redirect_port, 9321);
        assert_eq!(config.redirect_path, "/oauth/done");
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:9321/oauth/done");
    }

    #[test]
    fn test_redirect_uri_rejects_garbage() {
        assert!(AuthConfig::builder().redirect_uri("not a uri").is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = AuthConfig::builder()
            .client_id("client")
            .client_secret("secret")
            .auth_url("http://localhost:1/auth")
            .token_url("http://localhost:1/token")
            .scopes(["openid".to_string()])
            .redirect_port(9999)
            .cache_path("/tmp/elsewhere.json")
            .consent_timeout(Duration::from_secs(5))
            .launch_browser(false)
            .build()
            .unwrap();

        assert_eq!(config.client_secret.as_deref(), Some("secret"));
        assert_eq!(config.redirect_uri(), "http://localhost:9999/callback");
        assert_eq!(config.scopes, vec!["openid".to_string()]);
        assert_eq!(config.consent_timeout, Duration::from_secs(5));
        assert!(!config.launch_browser);
    }
}
