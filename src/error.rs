use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("failed to bind redirect listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication timed out after {0} seconds")]
    Timeout(u64),

    #[error("authorization denied by provider: {error}")]
    Denied {
        error: String,
        description: Option<String>,
    },

    #[error("state parameter mismatch: expected '{expected}', got '{actual}'")]
    StateMismatch { expected: String, actual: String },

    #[error("token exchange failed: token endpoint returned {status}: {body}")]
    TokenExchange { status: u16, body: String },

    #[error("token refresh failed: token endpoint returned {status}: {body}")]
    TokenRefresh { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("failed to persist token cache: {0}")]
    CacheWrite(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
