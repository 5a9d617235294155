//! Ambient source: gcloud application-default credentials.
//!
//! The ADC file belongs to gcloud. We read only its metadata and let gcloud
//! mint access tokens, then ask Google's tokeninfo endpoint which scopes the
//! token actually carries.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::AmbientTokenSource;
use crate::credential::{Credential, CredentialSource};
use crate::error::AuthError;
use crate::store::CredentialStore;

const TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";

#[cfg(windows)]
pub(crate) const GCLOUD: &str = "gcloud.cmd";
#[cfg(not(windows))]
pub(crate) const GCLOUD: &str = "gcloud";

/// An access token minted from the ambient credential.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AmbientToken {
    pub access_token: String,
    #[zeroize(skip)]
    pub expiry: DateTime<Utc>,
    #[zeroize(skip)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for AmbientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientToken")
            .field("access_token", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .finish()
    }
}

pub struct AmbientProvider {
    store: Arc<CredentialStore>,
    source: Arc<dyn AmbientTokenSource>,
}

impl AmbientProvider {
    pub fn new(store: Arc<CredentialStore>, source: Arc<dyn AmbientTokenSource>) -> Self {
        Self { store, source }
    }

    pub async fn acquire(&self) -> Result<Credential, AuthError> {
        let adc = self.store.load_adc()?.ok_or_else(|| AuthError::Unavailable {
            provider: CredentialSource::Ambient,
            detail: format!(
                "no application-default credentials at {}",
                self.store.paths().adc.display()
            ),
        })?;
        debug!("ADC file type={:?} account={:?}", adc.credential_type, adc.account);

        let token = self.source.fetch().await?;
        Ok(Credential {
            source: CredentialSource::Ambient,
            access_token: token.access_token.clone(),
            refresh_token: None,
            expiry: token.expiry,
            granted_scopes: token.scopes.iter().cloned().collect(),
            quota_project: adc.quota_project_id.clone(),
        })
    }

    /// gcloud renews ADC tokens itself, so refreshing is a fresh fetch.
    pub async fn refresh(&self, _current: &Credential) -> Result<Credential, AuthError> {
        self.acquire().await
    }
}

/// Mints tokens with `gcloud auth application-default print-access-token`.
pub struct GcloudTokenSource {
    http: reqwest::Client,
    tokeninfo_url: String,
}

impl GcloudTokenSource {
    pub fn new(timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            tokeninfo_url: TOKENINFO_ENDPOINT.to_string(),
        }
    }

    /// Ask a different tokeninfo endpoint (tests, proxies).
    pub fn with_tokeninfo_url(mut self, url: impl Into<String>) -> Self {
        self.tokeninfo_url = url.into();
        self
    }

    async fn print_access_token(&self) -> Result<String, AuthError> {
        let output = Command::new(GCLOUD)
            .args(["auth", "application-default", "print-access-token"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AuthError::Unavailable {
                provider: CredentialSource::Ambient,
                detail: if e.kind() == std::io::ErrorKind::NotFound {
                    "gcloud CLI not found on PATH".to_string()
                } else {
                    format!("failed to run gcloud: {}", e)
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("gcloud print-access-token failed: {}", stderr);
            return Err(classify_gcloud_failure(&stderr));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(refresh_failed("gcloud printed an empty access token"));
        }
        Ok(token)
    }

    async fn tokeninfo(&self, access_token: &str) -> Result<TokenInfo, AuthError> {
        let response = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| refresh_failed(format!("tokeninfo request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AuthError::Expired {
                provider: CredentialSource::Ambient,
                detail: format!("tokeninfo rejected the access token ({})", status),
            });
        }
        parse_tokeninfo(&body)
    }
}

#[async_trait]
impl AmbientTokenSource for GcloudTokenSource {
    async fn fetch(&self) -> Result<AmbientToken, AuthError> {
        let access_token = self.print_access_token().await?;
        let info = self.tokeninfo(&access_token).await?;
        Ok(AmbientToken {
            access_token,
            expiry: Utc::now() + Duration::seconds(info.expires_in),
            scopes: info.scopes,
        })
    }
}

#[derive(Debug)]
pub(crate) struct TokenInfo {
    pub scopes: Vec<String>,
    pub expires_in: i64,
}

/// tokeninfo returns `expires_in` as a string; accept a number too.
pub(crate) fn parse_tokeninfo(body: &str) -> Result<TokenInfo, AuthError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        scope: String,
        expires_in: Option<Seconds>,
    }

    let raw: Raw = serde_json::from_str(body)
        .map_err(|e| refresh_failed(format!("unexpected tokeninfo response: {}", e)))?;

    let expires_in = match raw.expires_in {
        Some(Seconds::Number(n)) => Some(n),
        Some(Seconds::Text(s)) => s.trim().parse().ok(),
        None => None,
    }
    .ok_or_else(|| refresh_failed("tokeninfo response has no usable expires_in"))?;

    Ok(TokenInfo {
        scopes: raw.scope.split_whitespace().map(String::from).collect(),
        expires_in,
    })
}

/// The ADC file exists by the time gcloud runs, so only gcloud saying it
/// found no credentials means "not configured". Anything else is a failed
/// renewal of a configured credential.
fn classify_gcloud_failure(stderr: &str) -> AuthError {
    let lower = stderr.to_ascii_lowercase();
    let detail = stderr.lines().last().unwrap_or("gcloud failed").to_string();
    if lower.contains("could not find default credentials") || lower.contains("credentials were not found") {
        AuthError::Unavailable {
            provider: CredentialSource::Ambient,
            detail,
        }
    } else {
        refresh_failed(detail)
    }
}

fn refresh_failed(detail: impl Into<String>) -> AuthError {
    AuthError::Expired {
        provider: CredentialSource::Ambient,
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialPaths;
    use crate::provider::testing::{full_scopes, FixedAmbient};
    use crate::provider::CredentialProvider;
    use crate::scopes;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn store_with_adc(dir: &TempDir, body: Option<&str>) -> Arc<CredentialStore> {
        let store = CredentialStore::new(CredentialPaths::in_dir(dir.path()));
        if let Some(body) = body {
            fs::create_dir_all(store.paths().adc.parent().unwrap()).unwrap();
            fs::write(&store.paths().adc, body).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_tokeninfo_string_expiry() {
        let info = parse_tokeninfo(
            r#"{"azp": "x", "scope": "openid https://www.googleapis.com/auth/drive.readonly", "expires_in": "3599"}"#,
        )
        .unwrap();
        assert_eq!(info.expires_in, 3599);
        assert_eq!(info.scopes.len(), 2);
    }

    #[test]
    fn test_tokeninfo_numeric_expiry() {
        let info = parse_tokeninfo(r#"{"scope": "", "expires_in": 120}"#).unwrap();
        assert_eq!(info.expires_in, 120);
        assert!(info.scopes.is_empty());
    }

    #[test]
    fn test_tokeninfo_without_usable_expiry_is_rejected() {
        for body in [
            r#"{"scope": "openid", "expires_in": "soon"}"#,
            r#"{"scope": "openid"}"#,
        ] {
            match parse_tokeninfo(body) {
                Err(err) => assert_eq!(err.kind(), "auth_expired"),
                Ok(info) => panic!("expected an error, got {:?}", info),
            }
        }
    }

    #[test]
    fn test_non_json_tokeninfo_is_a_failed_refresh() {
        let err = parse_tokeninfo("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, AuthError::Expired { provider: CredentialSource::Ambient, .. }));
    }

    #[test]
    fn test_gcloud_network_failure_is_not_unconfigured() {
        let err = classify_gcloud_failure(
            "ERROR: (gcloud.auth.application-default.print-access-token) There was a problem refreshing your current auth tokens: ('Connection aborted.', OSError(101, 'Network is unreachable'))",
        );
        assert_eq!(err.kind(), "auth_expired");
        assert!(err.to_string().contains("Network is unreachable"));
    }

    #[test]
    fn test_gcloud_without_credentials_is_unavailable() {
        let err = classify_gcloud_failure(
            "ERROR: (gcloud.auth.application-default.print-access-token) Your default credentials were not found.",
        );
        assert!(matches!(err, AuthError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_tokeninfo_reads_scopes_and_expiry_over_http() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/tokeninfo")
                    .query_param("access_token", "ya29.minted");
                then.status(200).json_body(json!({
                    "azp": "32555940559.apps.googleusercontent.com",
                    "scope": "openid https://www.googleapis.com/auth/drive.readonly",
                    "expires_in": "1799"
                }));
            })
            .await;

        let source = GcloudTokenSource::new(std::time::Duration::from_secs(5))
            .with_tokeninfo_url(server.url("/tokeninfo"));
        let info = source.tokeninfo("ya29.minted").await.unwrap();
        mock.assert_async().await;
        assert_eq!(info.expires_in, 1799);
        assert_eq!(info.scopes.len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_tokeninfo_is_expired() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/tokeninfo");
                then.status(400).json_body(json!({
                    "error": "invalid_token",
                    "error_description": "Invalid Value"
                }));
            })
            .await;

        let source = GcloudTokenSource::new(std::time::Duration::from_secs(5))
            .with_tokeninfo_url(server.url("/tokeninfo"));
        let err = source.tokeninfo("ya29.revoked").await.unwrap_err();
        assert!(matches!(err, AuthError::Expired { .. }));
    }

    #[test]
    fn test_gcloud_reauth_is_expired() {
        let err = classify_gcloud_failure(
            "ERROR: (gcloud.auth.application-default.print-access-token) Reauthentication failed. cannot prompt during non-interactive execution.",
        );
        assert!(matches!(err, AuthError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_missing_adc_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FixedAmbient::new(full_scopes()));
        let provider = AmbientProvider::new(store_with_adc(&dir, None), source.clone());
        assert!(matches!(
            provider.acquire().await,
            Err(AuthError::Unavailable { provider: CredentialSource::Ambient, .. })
        ));
        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_quota_project_comes_from_adc_file() {
        let dir = TempDir::new().unwrap();
        let store = store_with_adc(
            &dir,
            Some(r#"{"type": "authorized_user", "quota_project_id": "billing-proj"}"#),
        );
        let provider = AmbientProvider::new(store, Arc::new(FixedAmbient::new(full_scopes())));
        let cred = provider.acquire().await.unwrap();
        assert_eq!(cred.quota_project.as_deref(), Some("billing-proj"));
        assert!(cred.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_cloud_platform_only_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let store = store_with_adc(&dir, Some(r#"{"type": "authorized_user"}"#));
        let source = FixedAmbient::new(vec![
            "openid".into(),
            scopes::CLOUD_PLATFORM.to_string(),
        ]);
        let provider = CredentialProvider::Ambient(AmbientProvider::new(store, Arc::new(source)));
        match provider.acquire().await {
            Err(AuthError::IncompleteScope { provider, missing }) => {
                assert_eq!(provider, CredentialSource::Ambient);
                assert_eq!(missing.len(), 4);
            }
            other => panic!("expected IncompleteScope, got {:?}", other),
        }
    }
}
