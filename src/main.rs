//! Interactive login utility.
//!
//! Runs the browser-driven authentication flow against the configured
//! provider and reports the outcome. Configuration comes from the
//! environment (see [`AuthConfig::from_env`]).

use ims_auth::{AuthConfig, AuthManager};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match AuthConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let manager = AuthManager::new(config);
    match manager.authenticate().await {
        Ok(record) => {
            let fingerprint: String = record.access_token.chars().take(10).collect();
            println!("Authentication successful (access token {fingerprint}…)");
        }
        Err(e) => {
            eprintln!("authentication failed: {e}");
            std::process::exit(1);
        }
    }
}
