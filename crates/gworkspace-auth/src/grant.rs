//! Browser grant flows.
//!
//! Delegated: PKCE authorization-code flow with a loopback listener on
//! `127.0.0.1`. Ambient: hands over to `gcloud auth application-default
//! login`. Neither applies its own deadline; the setup orchestrator wraps
//! them in a timeout and dropping the future tears down the listener or the
//! child process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::credential::CredentialSource;
use crate::error::AuthError;
use crate::provider::ambient::GCLOUD;
use crate::provider::delegated::persist_grant;
use crate::provider::google::{generate_code_challenge, generate_code_verifier, generate_state};
use crate::provider::GoogleOAuth;
use crate::scopes;
use crate::setup::GrantFlow;
use crate::store::CredentialStore;

const GCLOUD_INSTALL_HINT: &str =
    "gcloud CLI not found on PATH; install the Google Cloud SDK from https://cloud.google.com/sdk/docs/install or use the OAuth method";

pub struct BrowserGrantFlow {
    store: Arc<CredentialStore>,
    oauth: GoogleOAuth,
}

impl BrowserGrantFlow {
    pub fn new(store: Arc<CredentialStore>, config: &BrokerConfig) -> Self {
        Self {
            store,
            oauth: GoogleOAuth::new(config.http_timeout()),
        }
    }

    async fn delegated(&self) -> Result<(), AuthError> {
        let client = self
            .store
            .load_client_secret()?
            .ok_or_else(|| AuthError::Unavailable {
                provider: CredentialSource::Delegated,
                detail: format!(
                    "no OAuth client secret at {}; pass --client-secret <file> to setup",
                    self.store.paths().client_secret.display()
                ),
            })?;

        let failed = |detail: String| AuthError::GrantFailed {
            provider: CredentialSource::Delegated,
            detail,
        };

        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        let state = generate_state();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| failed(format!("failed to bind local callback server: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| failed(format!("failed to read callback address: {}", e)))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{}", port);
        info!("OAuth callback server listening on {}", redirect_uri);

        let requested: Vec<&str> = scopes::required_scopes().into_iter().collect();
        let auth_url =
            GoogleOAuth::authorize_url(&client, &requested, &state, &code_challenge, &redirect_uri);

        info!("Opening browser for Google authorization");
        if let Err(e) = open::that(&auth_url) {
            warn!("Could not open a browser ({}); visit this URL manually:", e);
        }
        info!("Authorization URL: {}", auth_url);

        let code = wait_for_callback(&listener, &state).await.map_err(failed)?;

        let tokens = self
            .oauth
            .exchange_code(&client, &code, &code_verifier, &redirect_uri)
            .await
            .map_err(failed)?;
        if tokens.refresh_token.is_none() {
            warn!("Google returned no refresh token; the grant will stop working when it expires");
        }

        let credential = persist_grant(&self.store, &client, &tokens, &requested)?;
        info!(
            "Delegated authorization stored ({} scopes granted)",
            credential.granted_scopes.len()
        );
        Ok(())
    }

    async fn ambient(&self) -> Result<(), AuthError> {
        let scope_arg = format!("--scopes={}", scopes::ambient_login_scopes().join(","));
        info!("Running gcloud application-default login");

        let status = Command::new(GCLOUD)
            .args(["auth", "application-default", "login", &scope_arg])
            .stdin(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AuthError::Unavailable {
                        provider: CredentialSource::Ambient,
                        detail: GCLOUD_INSTALL_HINT.to_string(),
                    }
                } else {
                    AuthError::GrantFailed {
                        provider: CredentialSource::Ambient,
                        detail: format!("failed to run gcloud: {}", e),
                    }
                }
            })?;

        if !status.success() {
            return Err(AuthError::GrantFailed {
                provider: CredentialSource::Ambient,
                detail: format!("gcloud login exited with {}", status),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GrantFlow for BrowserGrantFlow {
    async fn grant(&self, source: CredentialSource) -> Result<(), AuthError> {
        match source {
            CredentialSource::Delegated => self.delegated().await,
            CredentialSource::Ambient => self.ambient().await,
        }
    }
}

// ── Loopback callback ───────────────────────────────────────────────────────

/// Accept connections until one carries the OAuth redirect; return its code.
async fn wait_for_callback(listener: &TcpListener, state: &str) -> Result<String, String> {
    loop {
        let (mut socket, _) = listener
            .accept()
            .await
            .map_err(|e| format!("callback server error: {}", e))?;

        let mut request_line = String::new();
        {
            let mut reader = BufReader::new(&mut socket);
            if reader.read_line(&mut request_line).await.is_err() {
                continue;
            }
            // Drain headers so closing the socket does not reset the reply.
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) if line.trim().is_empty() => break,
                    Ok(_) => {}
                }
            }
        }

        // "GET /?code=...&state=... HTTP/1.1"
        let target = match request_line.split_whitespace().nth(1) {
            Some(target) => target,
            None => continue,
        };
        let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
        let params = parse_query_params(query);

        if let Some(error) = params.get("error") {
            let desc = params
                .get("error_description")
                .map(String::as_str)
                .unwrap_or("authorization was not granted");
            let _ = send_response(&mut socket, "400 Bad Request", &result_html(&format!("Error: {}", desc))).await;
            return Err(format!("{}: {}", error, desc));
        }

        let (code, received_state) = match (params.get("code"), params.get("state")) {
            (Some(code), Some(received)) => (code, received),
            // favicon and other stray requests
            _ => {
                let _ = send_response(&mut socket, "404 Not Found", &result_html("Not found")).await;
                continue;
            }
        };

        if received_state != state {
            let _ = send_response(
                &mut socket,
                "400 Bad Request",
                &result_html("Error: invalid state parameter. Please run setup again."),
            )
            .await;
            return Err("state mismatch in OAuth callback".to_string());
        }

        let _ = send_response(
            &mut socket,
            "200 OK",
            &result_html("Authorization complete. You can close this tab."),
        )
        .await;
        return Ok(code.clone());
    }
}

fn parse_query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let value = urlencoding::decode(&value.replace('+', " ")).ok()?.into_owned();
            Some((key.to_string(), value))
        })
        .collect()
}

async fn send_response(socket: &mut TcpStream, status: &str, html: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        html.len(),
        html
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await
}

fn result_html(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>g-workspace-mcp</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
               display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }}
        .box {{ padding: 2rem; border: 1px solid #ddd; border-radius: 8px; text-align: center; max-width: 420px; }}
    </style>
</head>
<body>
    <div class="box">
        <h1>g-workspace-mcp</h1>
        <p>{}</p>
    </div>
</body>
</html>"#,
        message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn hit(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        body
    }

    #[test]
    fn test_parse_query_params_decodes() {
        let params = parse_query_params("code=4%2F0Ab&state=xyz&scope=a+b");
        assert_eq!(params.get("code").unwrap(), "4/0Ab");
        assert_eq!(params.get("scope").unwrap(), "a b");
    }

    #[tokio::test]
    async fn test_callback_returns_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { wait_for_callback(&listener, "st8").await });

        let stray = hit(port, "/favicon.ico").await;
        assert!(stray.starts_with("HTTP/1.1 404"));
        let page = hit(port, "/?state=st8&code=4%2Fabc").await;
        assert!(page.starts_with("HTTP/1.1 200"));

        assert_eq!(server.await.unwrap().unwrap(), "4/abc");
    }

    #[tokio::test]
    async fn test_callback_rejects_wrong_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { wait_for_callback(&listener, "expected").await });

        hit(port, "/?state=forged&code=abc").await;
        assert!(server.await.unwrap().unwrap_err().contains("state mismatch"));
    }

    #[tokio::test]
    async fn test_callback_reports_denied_consent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { wait_for_callback(&listener, "s").await });

        hit(port, "/?error=access_denied").await;
        assert!(server.await.unwrap().unwrap_err().starts_with("access_denied"));
    }

    #[tokio::test]
    async fn test_delegated_grant_needs_client_secret() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(CredentialStore::new(crate::config::CredentialPaths::in_dir(dir.path())));
        let flow = BrowserGrantFlow::new(store, &BrokerConfig::default());
        assert!(matches!(
            flow.grant(CredentialSource::Delegated).await,
            Err(AuthError::Unavailable { provider: CredentialSource::Delegated, .. })
        ));
    }
}
