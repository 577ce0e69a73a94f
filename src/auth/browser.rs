//! Interactive authorization surface
//!
//! The authorization URL is shown in the system browser and the redirect is
//! captured on a loopback listener bound to the redirect URI's port.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::Url;

/// How the interactive step ended. Resolved exactly once per presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOutcome {
    /// The browser was redirected back to the registered URI.
    Redirected(Url),
    /// The user abandoned the flow.
    Cancelled,
    /// The surface could not be started.
    Failed(String),
}

/// Something that can show an authorization URL and report the redirect.
#[async_trait]
pub trait AuthorizationSurface: Send + Sync {
    async fn present(&self, authorize_url: &Url, redirect_uri: &Url) -> SurfaceOutcome;
}

/// How long one loopback connection may take to send its request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const DONE_PAGE: &str = "<!doctype html><html><body style=\"font-family:sans-serif\">\
<h3>Sign-in complete</h3><p>You can close this window and return to the terminal.</p>\
</body></html>";

/// System browser + loopback listener. Ctrl+C cancels the wait.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowserSurface;

#[async_trait]
impl AuthorizationSurface for SystemBrowserSurface {
    async fn present(&self, authorize_url: &Url, redirect_uri: &Url) -> SurfaceOutcome {
        if redirect_uri.scheme() != "http" {
            return SurfaceOutcome::Failed(format!(
                "redirect URI {} is not a loopback http:// URI",
                redirect_uri
            ));
        }
        let host = match redirect_uri.host_str() {
            Some("localhost") | None => "127.0.0.1",
            Some(h) => h,
        };
        let port = redirect_uri.port_or_known_default().unwrap_or(80);

        let listener = match TcpListener::bind((host, port)).await {
            Ok(l) => l,
            Err(e) => {
                return SurfaceOutcome::Failed(format!(
                    "cannot listen on {}:{} for the redirect: {}",
                    host, port, e
                ))
            }
        };

        if let Err(e) = webbrowser::open(authorize_url.as_str()) {
            return SurfaceOutcome::Failed(format!("cannot open the system browser: {}", e));
        }

        println!();
        println!("Complete sign-in in your browser. Press Ctrl+C to cancel.");
        println!("If no browser window appeared, open:\n  {}", authorize_url);
        println!();

        tokio::select! {
            url = wait_for_redirect(&listener, redirect_uri) => SurfaceOutcome::Redirected(url),
            _ = tokio::signal::ctrl_c() => SurfaceOutcome::Cancelled,
        }
    }
}

/// Accept connections until one targets the redirect path. Each connection
/// is served on its own task under [`REQUEST_TIMEOUT`]; idle, reset or
/// unrelated connections are logged and never end the wait.
async fn wait_for_redirect(listener: &TcpListener, redirect_uri: &Url) -> Url {
    let (found_tx, mut found_rx) = mpsc::channel::<Url>(1);
    loop {
        tokio::select! {
            Some(url) = found_rx.recv() => return url,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let redirect_uri = redirect_uri.clone();
                    let found = found_tx.clone();
                    tokio::spawn(async move {
                        let served = tokio::time::timeout(
                            REQUEST_TIMEOUT,
                            serve_connection(stream, &redirect_uri),
                        )
                        .await;
                        match served {
                            Ok(Ok(Some(url))) => {
                                let _ = found.send(url).await;
                            }
                            Ok(Ok(None)) => tracing::debug!("Ignoring loopback request from {}", peer),
                            Ok(Err(e)) => tracing::debug!("Loopback connection from {} failed: {}", peer, e),
                            Err(_) => tracing::debug!("Loopback connection from {} sent no request", peer),
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Accepting a loopback connection failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}

/// Read one request and answer it. `Some` when it was the redirect.
async fn serve_connection(mut stream: TcpStream, redirect_uri: &Url) -> std::io::Result<Option<Url>> {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    match redirect_target(&request, redirect_uri) {
        Some(url) => {
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                DONE_PAGE.len(),
                DONE_PAGE
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            Ok(Some(url))
        }
        None => {
            stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await?;
            Ok(None)
        }
    }
}

/// Resolve the request line of a loopback HTTP request against the
/// redirect URI. `None` unless it is a GET of the redirect path.
fn redirect_target(request: &str, redirect_uri: &Url) -> Option<Url> {
    let mut parts = request.lines().next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let url = redirect_uri.join(target).ok()?;
    (url.path() == redirect_uri.path()).then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect() -> Url {
        Url::parse("http://localhost:8400/auth/callback").unwrap()
    }

    #[test]
    fn test_redirect_target_keeps_query() {
        let req = "GET /auth/callback?code=abc&state=x HTTP/1.1\r\nHost: localhost:8400\r\n\r\n";
        let url = redirect_target(req, &redirect()).unwrap();
        assert_eq!(url.query(), Some("code=abc&state=x"));
        assert_eq!(url.port(), Some(8400));
    }

    #[test]
    fn test_redirect_target_ignores_other_paths() {
        let req = "GET /favicon.ico HTTP/1.1\r\n\r\n";
        assert!(redirect_target(req, &redirect()).is_none());
        let req = "POST /auth/callback HTTP/1.1\r\n\r\n";
        assert!(redirect_target(req, &redirect()).is_none());
        assert!(redirect_target("", &redirect()).is_none());
    }

    #[tokio::test]
    async fn test_idle_and_reset_connections_do_not_block_redirect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let redirect = Url::parse(&format!("http://127.0.0.1:{}/auth/callback", port)).unwrap();
        let waiting = tokio::spawn(async move { wait_for_redirect(&listener, &redirect).await });

        drop(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut browser = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        browser
            .write_all(b"GET /auth/callback?code=abc HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
            .await
            .unwrap();

        let url = tokio::time::timeout(Duration::from_secs(3), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(url.query(), Some("code=abc"));

        let mut reply = String::new();
        browser.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn test_custom_scheme_redirect_cannot_start() {
        let authorize = Url::parse("https://login.example/authorize").unwrap();
        let custom = Url::parse("fabricapp://auth").unwrap();
        let outcome = SystemBrowserSurface.present(&authorize, &custom).await;
        assert!(matches!(outcome, SurfaceOutcome::Failed(_)));
    }
}
