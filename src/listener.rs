//! Loopback redirect capture for the OAuth authorization response.
//!
//! The listener binds the pre-registered localhost port, accepts the first
//! request to the callback path, answers it with a small human-readable
//! page, and delivers the outcome to the waiting orchestrator through a
//! oneshot channel. The channel fires at most once and happens-before the
//! waiter reads the captured code, so there is no polled shared flag and no
//! missed-wakeup window between the connection handler and the waiter.
//!
//! Per-request access logging is deliberately suppressed; only lifecycle
//! events (bound, captured, stopped) are traced.

use crate::error::{AuthError, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};
use url::Url;

/// Largest request head the listener will read before giving up on a
/// connection. Authorization redirects are a single short GET.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Upper bound on serving a single connection, so a stalled client can
/// never wedge the accept loop or a later `stop`.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_PAGE: &str = "<html><body><h1>Authentication successful!</h1>\
<p>You can close this window and return to the application.</p></body></html>";

const FAILURE_PAGE: &str = "<html><body><h1>Authentication failed!</h1>\
<p>No authorization code received. You can close this window.</p></body></html>";

/// What the provider's redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// The redirect carried an authorization code.
    Code {
        code: String,
        state: Option<String>,
    },
    /// The redirect carried no code, e.g. the user refused consent.
    Denied {
        error: String,
        description: Option<String>,
    },
}

/// A running redirect listener.
///
/// The accept loop runs as its own task so the orchestrator can await the
/// outcome without blocking. The loop exits as soon as the callback path
/// receives its first request or [`stop`] is called, releasing the port
/// either way.
///
/// [`stop`]: RedirectListener::stop
pub struct RedirectListener {
    local_addr: SocketAddr,
    outcome_rx: Option<oneshot::Receiver<RedirectOutcome>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RedirectListener {
    /// Bind the loopback port and start accepting.
    ///
    /// # Errors
    ///
    /// `AuthError::Bind` when the port is already in use. This is fatal to
    /// the flow: the redirect URI registered with the provider names this
    /// exact port, so no fallback port can work.
    pub async fn start(port: u16, callback_path: &str) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| AuthError::Bind { port, source })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| AuthError::Bind { port, source })?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let path = callback_path.to_string();
        let task = tokio::spawn(accept_loop(listener, path, outcome_tx, shutdown_rx));

        info!(port = local_addr.port(), "redirect listener bound");

        Ok(Self {
            local_addr,
            outcome_rx: Some(outcome_rx),
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// The port actually bound (useful when started with port 0 in tests).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Wait for the first callback request to decide the outcome.
    ///
    /// Delivered at most once; a second call returns an error. The caller
    /// is responsible for bounding this wait with a timeout and for calling
    /// [`stop`] afterwards on every path.
    ///
    /// [`stop`]: RedirectListener::stop
    pub async fn wait(&mut self) -> Result<RedirectOutcome> {
        let rx = self.outcome_rx.take().ok_or_else(|| {
            AuthError::Network("redirect outcome already consumed".to_string())
        })?;

        rx.await
            .map_err(|_| AuthError::Network("redirect listener terminated unexpectedly".to_string()))
    }

    /// Stop accepting and release the port. Idempotent; safe after a normal
    /// completion, a timeout, or a previous `stop`.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
            info!("redirect listener stopped");
        }
    }
}

impl Drop for RedirectListener {
    fn drop(&mut self) {
        // Without an async context we can only signal; the accept loop exits
        // on its own and the port is released when the task finishes.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    callback_path: String,
    outcome_tx: oneshot::Sender<RedirectOutcome>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut outcome_tx = Some(outcome_tx);

    loop {
        let stream = tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => stream,
                Err(e) => {
                    debug!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let served = match timeout(CONNECTION_TIMEOUT, handle_connection(stream, &callback_path)).await {
            Ok(served) => served,
            Err(_) => {
                debug!("connection timed out before completing a request");
                continue;
            }
        };

        match served {
            Ok(Some(outcome)) => {
                if let Some(tx) = outcome_tx.take() {
                    // The waiter may already be gone after a timeout.
                    let _ = tx.send(outcome);
                }
                break;
            }
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "ignoring malformed request");
                continue;
            }
        }
    }
    // The TcpListener drops here, releasing the port.
}

/// Serve one connection. Returns the outcome if this request decides the
/// flow, `None` when it was for some other path (stray probes, favicon).
async fn handle_connection(
    mut stream: TcpStream,
    callback_path: &str,
) -> std::io::Result<Option<RedirectOutcome>> {
    let target = match read_request_target(&mut stream).await? {
        Some(target) => target,
        None => return Ok(None),
    };

    // The request target is origin-form; a dummy base makes it parseable.
    let url = match Url::parse(&format!("http://localhost{target}")) {
        Ok(url) => url,
        Err(_) => {
            write_response(&mut stream, "400 Bad Request", FAILURE_PAGE).await?;
            return Ok(None);
        }
    };

    if url.path() != callback_path {
        write_response(&mut stream, "404 Not Found", "").await?;
        return Ok(None);
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(code) = code {
        write_response(&mut stream, "200 OK", SUCCESS_PAGE).await?;
        info!("authorization code captured");
        Ok(Some(RedirectOutcome::Code { code, state }))
    } else {
        write_response(&mut stream, "400 Bad Request", FAILURE_PAGE).await?;
        info!("redirect carried no authorization code");
        Ok(Some(RedirectOutcome::Denied {
            error: error.unwrap_or_else(|| "no authorization code received".to_string()),
            description,
        }))
    }
}

/// Read the head of an HTTP request and return the target of a GET request
/// line, or `None` for anything unparseable.
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        if buf.len() >= MAX_REQUEST_BYTES {
            return Ok(None);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf);
    let request_line = match head.lines().next() {
        Some(line) => line,
        None => return Ok(None),
    };

    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(Some(target.to_string())),
        _ => Ok(None),
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_request(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect to listener");
        stream
            .write_all(
                format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .expect("write request");

        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .expect("read response");
        response
    }

    #[tokio::test]
    async fn test_captures_code_from_first_callback_request() {
        let mut listener = RedirectListener::start(0, "/callback").await.unwrap();
        let port = listener.port();

        let response = send_request(port, "/callback?code=ABC123&state=xyz").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("successful"));

        let outcome = listener.wait().await.unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Code {
                code: "ABC123".to_string(),
                state: Some("xyz".to_string()),
            }
        );
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_denied_consent_yields_denied_outcome() {
        let mut listener = RedirectListener::start(0, "/callback").await.unwrap();
        let port = listener.port();

        let response =
            send_request(port, "/callback?error=access_denied&error_description=nope").await;
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains("failed"));

        let outcome = listener.wait().await.unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Denied {
                error: "access_denied".to_string(),
                description: Some("nope".to_string()),
            }
        );
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_other_paths_do_not_decide_the_flow() {
        let mut listener = RedirectListener::start(0, "/callback").await.unwrap();
        let port = listener.port();

        let response = send_request(port, "/favicon.ico").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        // The listener is still accepting; the real redirect still works.
        let response = send_request(port, "/callback?code=later").await;
        assert!(response.starts_with("HTTP/1.1 200"));

        let outcome = listener.wait().await.unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Code {
                code: "later".to_string(),
                state: None,
            }
        );
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_error_when_port_taken() {
        let first = RedirectListener::start(0, "/callback").await.unwrap();
        let port = first.port();

        let result = RedirectListener::start(port, "/callback").await;
        assert!(matches!(result, Err(AuthError::Bind { port: p, .. }) if p == port));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_port() {
        let mut listener = RedirectListener::start(0, "/callback").await.unwrap();
        let port = listener.port();

        listener.stop().await;
        listener.stop().await;

        // The port must be bindable again after stop.
        let rebound = TcpListener::bind(("127.0.0.1", port)).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_stop_after_capture_releases_port() {
        let mut listener = RedirectListener::start(0, "/callback").await.unwrap();
        let port = listener.port();

        send_request(port, "/callback?code=done").await;
        listener.wait().await.unwrap();
        listener.stop().await;

        let rebound = TcpListener::bind(("127.0.0.1", port)).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_wait_twice_errors() {
        let mut listener = RedirectListener::start(0, "/callback").await.unwrap();
        let port = listener.port();

        send_request(port, "/callback?code=x").await;
        listener.wait().await.unwrap();

        assert!(listener.wait().await.is_err());
        listener.stop().await;
    }
}
