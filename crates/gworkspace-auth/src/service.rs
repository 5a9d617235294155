//! Authenticated Google API handles.
//!
//! A [`ServiceHandle`] binds one API (and version) to the credential that was
//! current when it was built. Handles are cheap to clone and are cached by the
//! [`AuthManager`](crate::AuthManager) until the next refresh.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::credential::{Credential, CredentialSource};

/// Header Google uses to bill requests made with user credentials.
pub const QUOTA_PROJECT_HEADER: &str = "x-goog-user-project";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoogleApi {
    Drive,
    Gmail,
    Calendar,
    Sheets,
}

impl GoogleApi {
    pub fn name(self) -> &'static str {
        match self {
            GoogleApi::Drive => "drive",
            GoogleApi::Gmail => "gmail",
            GoogleApi::Calendar => "calendar",
            GoogleApi::Sheets => "sheets",
        }
    }

    pub fn default_version(self) -> &'static str {
        match self {
            GoogleApi::Drive | GoogleApi::Calendar => "v3",
            GoogleApi::Gmail => "v1",
            GoogleApi::Sheets => "v4",
        }
    }

    fn host(self) -> &'static str {
        match self {
            GoogleApi::Drive | GoogleApi::Calendar => "https://www.googleapis.com",
            GoogleApi::Gmail => "https://gmail.googleapis.com",
            GoogleApi::Sheets => "https://sheets.googleapis.com",
        }
    }

    /// Path prefix under the API's host, e.g. `drive/v3`.
    pub fn path_prefix(self, version: &str) -> String {
        match self {
            GoogleApi::Sheets => version.to_string(),
            api => format!("{}/{}", api.name(), version),
        }
    }

    pub fn base_url(self, version: &str) -> String {
        format!("{}/{}", self.host(), self.path_prefix(version))
    }

    /// Base URL with every API served from `root` instead of Google's hosts.
    pub fn base_url_under(self, root: &str, version: &str) -> String {
        format!("{}/{}", root.trim_end_matches('/'), self.path_prefix(version))
    }
}

impl fmt::Display for GoogleApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed Google API call.
#[derive(Debug, Clone, Error)]
#[error("{}", self.describe())]
pub struct UpstreamApiError {
    /// HTTP status; `None` when the request never got a response.
    pub status: Option<u16>,
    /// Machine reason from the error body (`insufficientPermissions`, ...).
    pub reason: Option<String>,
    pub message: String,
}

impl UpstreamApiError {
    fn transport(err: impl fmt::Display) -> Self {
        Self {
            status: None,
            reason: None,
            message: format!("HTTP request failed: {}", err),
        }
    }

    fn describe(&self) -> String {
        match self.status {
            Some(code) => format!("Google API error {}: {}", code, self.message),
            None => self.message.clone(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(429)
    }

    pub fn is_insufficient_scope(&self) -> bool {
        if self.status != Some(403) {
            return false;
        }
        matches!(
            self.reason.as_deref(),
            Some("insufficientPermissions") | Some("ACCESS_TOKEN_SCOPE_INSUFFICIENT")
        ) || self
            .message
            .to_ascii_lowercase()
            .contains("insufficient authentication scopes")
    }

    pub fn is_api_not_enabled(&self) -> bool {
        if self.status != Some(403) {
            return false;
        }
        let message = self.message.to_ascii_lowercase();
        matches!(
            self.reason.as_deref(),
            Some("accessNotConfigured") | Some("SERVICE_DISABLED")
        ) || message.contains("has not been used in project")
            || message.contains("it is disabled")
    }

    /// Build from a Google error body:
    /// `{"error": {"code", "message", "status", "errors": [{"reason"}]}}`.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let error = parsed.get("error");

        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| error.and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });

        let reason = error
            .and_then(|e| e.get("errors"))
            .and_then(|v| v.as_array())
            .and_then(|errors| errors.first())
            .and_then(|first| first.get("reason"))
            .and_then(|v| v.as_str())
            .or_else(|| {
                error
                    .and_then(|e| e.get("details"))
                    .and_then(|v| v.as_array())
                    .and_then(|details| details.iter().find_map(|d| d.get("reason")))
                    .and_then(|v| v.as_str())
            })
            .or_else(|| error.and_then(|e| e.get("status")).and_then(|v| v.as_str()))
            .map(String::from);

        Self {
            status: Some(status.as_u16()),
            reason,
            message,
        }
    }
}

struct HandleInner {
    api: GoogleApi,
    version: String,
    base_url: String,
    http: Client,
    access_token: Zeroizing<String>,
    quota_project: Option<String>,
    source: CredentialSource,
    generation: u64,
}

/// Authenticated client for one Google API.
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Arc<HandleInner>,
}

impl ServiceHandle {
    pub(crate) fn new(
        api: GoogleApi,
        version: &str,
        base_url: String,
        http: Client,
        credential: &Credential,
        generation: u64,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                api,
                version: version.to_string(),
                base_url,
                http,
                access_token: Zeroizing::new(credential.access_token.clone()),
                quota_project: credential.quota_project.clone(),
                source: credential.source,
                generation,
            }),
        }
    }

    pub fn api(&self) -> GoogleApi {
        self.inner.api
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn source(&self) -> CredentialSource {
        self.inner.source
    }

    pub fn quota_project(&self) -> Option<&str> {
        self.inner.quota_project.as_deref()
    }

    /// Credential generation this handle was built from.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// True when both handles share the same underlying client.
    pub fn ptr_eq(&self, other: &ServiceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }

    /// Authenticated GET returning parsed JSON.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, UpstreamApiError> {
        let body = self.execute(self.request(path, query)).await?;
        if body.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&body).map_err(|e| UpstreamApiError {
            status: None,
            reason: None,
            message: format!("Failed to parse JSON response: {}", e),
        })
    }

    /// Authenticated GET returning the raw body (exports, media).
    pub async fn get_text(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<String, UpstreamApiError> {
        self.execute(self.request(path, query)).await
    }

    fn request(&self, path: &str, query: &[(&str, String)]) -> RequestBuilder {
        let mut builder = self
            .inner
            .http
            .get(self.url(path))
            .query(query)
            .bearer_auth(self.inner.access_token.as_str());
        if let Some(project) = &self.inner.quota_project {
            builder = builder.header(QUOTA_PROJECT_HEADER, project);
        }
        builder
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<String, UpstreamApiError> {
        debug!("{} {} request", self.inner.api, self.inner.version);

        let response = builder.send().await.map_err(UpstreamApiError::transport)?;
        let status = response.status();
        let body = response.text().await.map_err(|e| UpstreamApiError {
            status: Some(status.as_u16()),
            reason: None,
            message: format!("Failed to read response body: {}", e),
        })?;

        if status.is_success() {
            return Ok(body);
        }

        let err = UpstreamApiError::from_response(status, &body);
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by {} API", self.inner.api);
        } else {
            warn!("{} API returned {}: {}", self.inner.api, status, err.message);
        }
        Err(err)
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("api", &self.inner.api)
            .field("version", &self.inner.version)
            .field("source", &self.inner.source)
            .field("generation", &self.inner.generation)
            .finish()
    }
}
