//! Authorization URL construction, browser hand-off, and token exchange.
//!
//! Implements the network side of RFC 6749 (OAuth 2.0) and RFC 7636 (PKCE):
//! building the authorization URL with the S256 challenge, exchanging the
//! authorization code for tokens, and refreshing access tokens.
//!
//! Neither exchange nor refresh retries automatically. A transport failure
//! surfaces as `AuthError::Network` and is safe for the caller to retry; a
//! provider-returned error status means the grant was rejected and retrying
//! with the same credentials cannot succeed.
//!
//! Sensitive values (tokens, codes, verifiers) are never logged.

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::pkce::PkcePair;
use crate::tokens::TokenRecord;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;

/// Client for the provider's authorize and token endpoints.
pub struct OAuthClient {
    config: Arc<AuthConfig>,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Create a client with a connection pool bounded by the configured
    /// per-request timeout.
    pub fn new(config: Arc<AuthConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("ims-auth/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");

        Self { config, http }
    }

    /// Build the authorization URL carrying the PKCE challenge and state.
    ///
    /// # Errors
    ///
    /// `AuthError::InvalidEndpoint` when the configured authorize URL does
    /// not parse.
    pub fn build_auth_url(&self, pkce: &PkcePair, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| AuthError::InvalidEndpoint(format!("{}: {e}", self.config.auth_url)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri());
            query.append_pair("response_type", "code");
            query.append_pair("scope", &self.config.scopes.join(","));
            query.append_pair("state", state);
            query.append_pair("code_challenge", &pkce.challenge());
            query.append_pair("code_challenge_method", "S256");
        }

        Ok(url.to_string())
    }

    /// Hand the authorization URL to the system browser.
    ///
    /// The opener's result is advisory only: whether the browser actually
    /// opened, and whether the user completes consent, is observed solely
    /// through the redirect listener. On failure (or when launching is
    /// disabled) the URL is logged so the user can open it by hand.
    pub fn launch_browser(&self, auth_url: &str) {
        if !self.config.launch_browser {
            info!(url = auth_url, "browser launch disabled; open the URL manually");
            return;
        }

        info!("opening system browser for authentication");
        if let Err(e) = open::that(auth_url) {
            warn!(error = %e, url = auth_url, "failed to open browser; open the URL manually");
        }
    }

    /// Exchange an authorization code for a token record.
    ///
    /// # Errors
    ///
    /// - `AuthError::Network` on transport failure (safe to retry)
    /// - `AuthError::TokenExchange` with the provider's status and body on a
    ///   rejected grant (never retried)
    #[instrument(skip(self, code, pkce))]
    pub async fn exchange_code(&self, code: &str, pkce: &PkcePair) -> Result<TokenRecord> {
        let redirect_uri = self.config.redirect_uri();

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("client_id", &self.config.client_id);
        params.insert("redirect_uri", &redirect_uri);
        params.insert("code", code);
        params.insert("code_verifier", pkce.verifier());
        if let Some(ref client_secret) = self.config.client_secret {
            params.insert("client_secret", client_secret);
        }

        let response = self.post_form(&params).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_error_body(response).await;
            warn!(status, error = %body, "token exchange rejected by provider");
            return Err(AuthError::TokenExchange { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("failed to parse token response: {e}")))?;

        info!(expires_in = token.expires_in, "exchanged authorization code for tokens");
        Ok(token.into_record(None))
    }

    /// Obtain a new token record from a refresh token.
    ///
    /// When the provider's response omits `refresh_token`, the previous
    /// refresh token is retained in the returned record: providers commonly
    /// do not rotate it, and dropping it would strand the subject. Note the
    /// converse assumption: a provider that rotated the token *without*
    /// returning the new value would silently desynchronize us, and this
    /// client cannot detect that.
    ///
    /// # Errors
    ///
    /// - `AuthError::Network` on transport failure
    /// - `AuthError::TokenRefresh` with the provider's status and body on a
    ///   rejected grant (never retried; the caller re-authenticates)
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("client_id", &self.config.client_id);
        params.insert("refresh_token", refresh_token);
        if let Some(ref client_secret) = self.config.client_secret {
            params.insert("client_secret", client_secret);
        }

        let response = self.post_form(&params).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_error_body(response).await;
            warn!(status, error = %body, "token refresh rejected by provider");
            return Err(AuthError::TokenRefresh { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("failed to parse token response: {e}")))?;

        info!(expires_in = token.expires_in, "refreshed access token");
        Ok(token.into_record(Some(refresh_token)))
    }

    async fn post_form(&self, params: &HashMap<&str, &str>) -> Result<reqwest::Response> {
        let body = serde_urlencoded::to_string(params)
            .map_err(|e| AuthError::Network(format!("failed to encode token request: {e}")))?;

        self.http
            .post(&self.config.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error response".to_string())
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    token_type: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenResponse {
    /// Convert to a cacheable record. `issued_at` stays zero here; the
    /// cache stamps it from the local clock on save.
    fn into_record(self, previous_refresh_token: Option<&str>) -> TokenRecord {
        TokenRecord {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: self.expires_in,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh_token.map(str::to_string)),
            issued_at: 0,
            extra: self.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::pkce;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(token_url: &str) -> Arc<AuthConfig> {
        Arc::new(
            AuthConfig::builder()
                .client_id("test-client")
                .client_secret("test-secret")
                .auth_url("https://provider.example/authorize")
                .token_url(token_url)
                .cache_path("/tmp/unused-tokens.json")
                .launch_browser(false)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_build_auth_url_carries_required_parameters() {
        let client = OAuthClient::new(test_config("https://provider.example/token"));
        let pkce = PkcePair::generate();
        let state = pkce::generate_state();

        let url = client.build_auth_url(&pkce, &state).unwrap();

        assert!(url.starts_with("https://provider.example/authorize?"));
        assert!(url.contains("client_id=test-client"));
        assert!(url.contains("redirect_uri=http"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope="));
        assert!(url.contains(&format!("state={state}")));
        assert!(url.contains(&format!("code_challenge={}", pkce.challenge())));
        assert!(url.contains("code_challenge_method=S256"));
    }

    #[test]
    fn test_build_auth_url_rejects_invalid_endpoint() {
        let config = Arc::new(
            AuthConfig::builder()
                .client_id("test-client")
                .auth_url("not a valid url")
                .cache_path("/tmp/unused-tokens.json")
                .build()
                .unwrap(),
        );
        let client = OAuthClient::new(config);

        let result = client.build_auth_url(&PkcePair::generate(), "state");
        assert!(matches!(result, Err(AuthError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=ABC123"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok1",
                "refresh_token": "refresh1",
                "token_type": "bearer",
                "expires_in": 86399,
                "scope": "openid,AdobeID"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(test_config(&format!("{}/token", server.uri())));
        let record = client
            .exchange_code("ABC123", &PkcePair::generate())
            .await
            .unwrap();

        assert_eq!(record.access_token, "tok1");
        assert_eq!(record.refresh_token.as_deref(), Some("refresh1"));
        assert_eq!(record.expires_in, 86399);
        assert_eq!(record.issued_at, 0);
        assert_eq!(record.extra["scope"], serde_json::json!("openid,AdobeID"));
    }

    #[tokio::test]
    async fn test_exchange_code_surfaces_provider_error_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(test_config(&format!("{}/token", server.uri())));
        let result = client.exchange_code("bad", &PkcePair::generate()).await;

        match result {
            Err(AuthError::TokenExchange { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected TokenExchange error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_retains_previous_refresh_token_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok2",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(test_config(&format!("{}/token", server.uri())));
        let record = client.refresh("old-refresh").await.unwrap();

        assert_eq!(record.access_token, "tok2");
        assert_eq!(record.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[tokio::test]
    async fn test_refresh_prefers_rotated_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok3",
                "refresh_token": "rotated",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let client = OAuthClient::new(test_config(&format!("{}/token", server.uri())));
        let record = client.refresh("old-refresh").await.unwrap();

        assert_eq!(record.refresh_token.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn test_refresh_surfaces_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(test_config(&format!("{}/token", server.uri())));
        let result = client.refresh("dead-refresh").await;

        assert!(matches!(
            result,
            Err(AuthError::TokenRefresh { status: 401, .. })
        ));
    }

    #[test]
    fn test_token_response_deserialization_minimal() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "tok"}"#).unwrap();

        assert_eq!(response.access_token, "tok");
        assert_eq!(response.expires_in, 3600);
        assert!(response.refresh_token.is_none());

        let record = response.into_record(None);
        assert_eq!(record.token_type, "Bearer");
        assert!(record.refresh_token.is_none());
    }
}
