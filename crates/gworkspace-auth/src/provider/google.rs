//! Google OAuth2 endpoint
//!
//! PKCE authorization-code flow and refresh-token grant against Google's
//! installed-app endpoints.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, error};

use super::{OAuthTokens, TokenEndpoint};
use crate::credential::ClientSecret;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub(crate) const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

pub struct GoogleOAuth {
    http: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    /// Consent URL for the loopback flow. Always asks for offline access so a
    /// refresh token comes back.
    pub fn authorize_url(
        client: &ClientSecret,
        scopes: &[&str],
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
    ) -> String {
        let base = client.auth_uri.as_deref().unwrap_or(AUTH_ENDPOINT);
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
            base,
            urlencoding::encode(&client.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes.join(" ")),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }

    pub async fn exchange_code(
        &self,
        client: &ClientSecret,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<OAuthTokens, String> {
        debug!("Exchanging authorization code for tokens");

        let mut params = HashMap::new();
        params.insert("client_id", client.client_id.as_str());
        params.insert("client_secret", client.client_secret.as_str());
        params.insert("code", code);
        params.insert("code_verifier", code_verifier);
        params.insert("grant_type", "authorization_code");
        params.insert("redirect_uri", redirect_uri);

        let body = self.post_form(token_uri(client), &params).await?;
        parse_token_response(&body)
    }

    /// Form POST to a token endpoint; non-2xx bodies become OAuth error text.
    /// Secrets travel in the body only.
    async fn post_form(&self, url: &str, params: &HashMap<&str, &str>) -> Result<String, String> {
        let response = self
            .http
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response body: {}", e))?;

        if !status.is_success() {
            let reason = oauth_error_message(&body).unwrap_or_else(|| status.to_string());
            error!("Token endpoint returned {}: {}", status, reason);
            return Err(reason);
        }
        Ok(body)
    }
}

#[async_trait]
impl TokenEndpoint for GoogleOAuth {
    async fn refresh(
        &self,
        client: &ClientSecret,
        refresh_token: &str,
    ) -> Result<OAuthTokens, String> {
        debug!("Refreshing delegated access token");

        let mut params = HashMap::new();
        params.insert("client_id", client.client_id.as_str());
        params.insert("client_secret", client.client_secret.as_str());
        params.insert("refresh_token", refresh_token);
        params.insert("grant_type", "refresh_token");

        let body = self.post_form(token_uri(client), &params).await?;
        parse_token_response(&body)
    }
}

fn token_uri(client: &ClientSecret) -> &str {
    client.token_uri.as_deref().unwrap_or(TOKEN_ENDPOINT)
}

/// `error: error_description` from an OAuth error body, if it is one.
fn oauth_error_message(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let err = parsed.get("error")?.as_str()?;
    let desc = parsed
        .get("error_description")
        .and_then(|v| v.as_str())
        .unwrap_or("no description");
    Some(format!("{}: {}", err, desc))
}

/// Token endpoint JSON into [`OAuthTokens`], expiry relative to now.
pub(crate) fn parse_token_response(body: &str) -> Result<OAuthTokens, String> {
    if let Some(err) = oauth_error_message(body) {
        return Err(err);
    }

    let parsed: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("Invalid JSON response: {}", e))?;

    let access_token = parsed
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or("Missing access_token in response")?
        .to_string();

    let refresh_token = parsed
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .map(String::from);

    let token_type = parsed
        .get("token_type")
        .and_then(|v| v.as_str())
        .unwrap_or("Bearer")
        .to_string();

    let expires_in = parsed
        .get("expires_in")
        .and_then(|v| v.as_i64())
        .unwrap_or(3600);

    let scopes = parsed
        .get("scope")
        .and_then(|v| v.as_str())
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default();

    Ok(OAuthTokens {
        access_token,
        refresh_token,
        token_type,
        expiry: Utc::now() + Duration::seconds(expires_in),
        scopes,
    })
}

// ── PKCE ────────────────────────────────────────────────────────────────────

/// PKCE code verifier: 32 random bytes, base64url (43 characters).
pub fn generate_code_verifier() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64_url_encode(&bytes)
}

/// S256 code challenge for `verifier`.
pub fn generate_code_challenge(verifier: &str) -> String {
    use sha2::{Digest, Sha256};
    base64_url_encode(&Sha256::digest(verifier.as_bytes()))
}

/// Random hex token for the `state` parameter.
pub fn generate_state() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client() -> ClientSecret {
        ClientSecret {
            client_id: "cid.apps.googleusercontent.com".into(),
            client_secret: "shh".into(),
            auth_uri: None,
            token_uri: None,
        }
    }

    #[test]
    fn test_verifier_is_43_url_safe_chars() {
        let v = generate_code_verifier();
        assert_eq!(v.len(), 43);
        assert!(v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_code_challenge_matches_rfc7636_vector() {
        let challenge = generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_state_is_random() {
        assert_ne!(generate_state(), generate_state());
        assert_eq!(generate_state().len(), 32);
    }

    #[test]
    fn test_authorize_url_requests_offline_access() {
        let url = GoogleOAuth::authorize_url(
            &client(),
            &["https://www.googleapis.com/auth/drive.readonly"],
            "st",
            "ch",
            "http://127.0.0.1:5555",
        );
        assert!(url.starts_with(AUTH_ENDPOINT));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A5555"));
        assert!(!url.contains("shh"));
    }

    #[test]
    fn test_token_response_sets_expiry_and_refresh_token() {
        let body = r#"{
            "access_token": "ya29.test",
            "refresh_token": "1//0e.test",
            "token_type": "Bearer",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/drive.readonly https://www.googleapis.com/auth/gmail.readonly"
        }"#;
        let tokens = parse_token_response(body).unwrap();
        assert_eq!(tokens.access_token, "ya29.test");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//0e.test"));
        assert_eq!(tokens.scopes.len(), 2);
        assert!(tokens.expiry > Utc::now() + Duration::seconds(3500));
    }

    #[test]
    fn test_token_response_error_is_reported() {
        let body = r#"{"error": "invalid_grant", "error_description": "Token has been expired or revoked."}"#;
        let err = parse_token_response(body).unwrap_err();
        assert!(err.starts_with("invalid_grant"));
    }

    fn client_at(server: &MockServer) -> ClientSecret {
        ClientSecret {
            client_id: "cid.apps.googleusercontent.com".into(),
            client_secret: "shh".into(),
            auth_uri: None,
            token_uri: Some(server.url("/token")),
        }
    }

    #[tokio::test]
    async fn test_refresh_posts_refresh_grant() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .header("content-type", "application/x-www-form-urlencoded");
                then.status(200).json_body(json!({
                    "access_token": "ya29.rotated",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }));
            })
            .await;

        let oauth = GoogleOAuth::new(std::time::Duration::from_secs(5));
        let tokens = oauth.refresh(&client_at(&server), "1//refresh").await.unwrap();
        mock.assert_async().await;
        assert_eq!(tokens.access_token, "ya29.rotated");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_rejected_refresh_reports_oauth_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).json_body(json!({
                    "error": "invalid_grant",
                    "error_description": "Token has been expired or revoked."
                }));
            })
            .await;

        let oauth = GoogleOAuth::new(std::time::Duration::from_secs(5));
        let err = oauth.refresh(&client_at(&server), "1//revoked").await.unwrap_err();
        assert_eq!(err, "invalid_grant: Token has been expired or revoked.");
    }

    #[tokio::test]
    async fn test_exchange_code_returns_refresh_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200).json_body(json!({
                    "access_token": "ya29.first",
                    "refresh_token": "1//first",
                    "expires_in": 3599,
                    "scope": "https://www.googleapis.com/auth/drive.readonly"
                }));
            })
            .await;

        let oauth = GoogleOAuth::new(std::time::Duration::from_secs(5));
        let tokens = oauth
            .exchange_code(&client_at(&server), "4/code", "verifier", "http://127.0.0.1:5555")
            .await
            .unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//first"));
        assert_eq!(tokens.scopes, vec!["https://www.googleapis.com/auth/drive.readonly"]);
    }

    #[tokio::test]
    async fn test_server_error_without_oauth_body_uses_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(503).body("unavailable");
            })
            .await;

        let oauth = GoogleOAuth::new(std::time::Duration::from_secs(5));
        let err = oauth.refresh(&client_at(&server), "1//r").await.unwrap_err();
        assert!(err.starts_with("503"));
    }

    #[test]
    fn test_refresh_response_without_scope_is_empty() {
        let body = r#"{"access_token": "ya29.x", "expires_in": 3600}"#;
        assert!(parse_token_response(body).unwrap().scopes.is_empty());
    }
}
