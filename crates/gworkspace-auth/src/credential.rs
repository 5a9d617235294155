//! Credential records.
//!
//! `Credential` is the in-memory, validated form handed around by the broker.
//! `TokenFile`, `AdcFile` and `ClientSecret` mirror the on-disk JSON formats.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AuthError;
use crate::scopes;

// ── Source ──────────────────────────────────────────────────────────────────

/// Where a credential comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// gcloud application-default credentials, owned by external tooling.
    Ambient,
    /// Our own OAuth token file.
    Delegated,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialSource::Ambient => "ambient",
            CredentialSource::Delegated => "delegated",
        }
    }

    /// Name the CLI uses for the source.
    pub fn method_name(self) -> &'static str {
        match self {
            CredentialSource::Ambient => "adc",
            CredentialSource::Delegated => "oauth",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ambient" | "adc" => Ok(CredentialSource::Ambient),
            "delegated" | "oauth" => Ok(CredentialSource::Delegated),
            other => Err(format!("unknown credential source: {}", other)),
        }
    }
}

// ── Credential ──────────────────────────────────────────────────────────────

/// A validated credential. Secret fields are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    #[zeroize(skip)]
    pub source: CredentialSource,
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[zeroize(skip)]
    pub expiry: DateTime<Utc>,
    #[zeroize(skip)]
    pub granted_scopes: BTreeSet<String>,
    #[zeroize(skip)]
    pub quota_project: Option<String>,
}

impl Credential {
    /// True when the token expires within `margin_secs` of now.
    pub fn is_expired(&self, margin_secs: i64) -> bool {
        self.is_expired_at(Utc::now(), margin_secs)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        self.expiry.signed_duration_since(now).num_seconds() < margin_secs
    }

    pub fn missing_scopes(&self) -> Vec<String> {
        scopes::missing_scopes(&self.granted_scopes)
    }

    /// Fail with `IncompleteScope` unless every catalog scope was granted.
    pub fn verify_scopes(&self) -> Result<(), AuthError> {
        let missing = self.missing_scopes();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::IncompleteScope {
                provider: self.source,
                missing,
            })
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .field("granted_scopes", &self.granted_scopes)
            .field("quota_project", &self.quota_project)
            .finish()
    }
}

// ── Delegated token file ────────────────────────────────────────────────────

/// On-disk OAuth token record for the delegated source.
///
/// Accepts the google-auth "authorized user" layout as well (`token` instead
/// of `access_token`, naive timestamps, epoch seconds).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TokenFile {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    #[zeroize(skip)]
    pub token_type: String,
    #[serde(deserialize_with = "deserialize_expiry")]
    #[zeroize(skip)]
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    #[zeroize(skip)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[zeroize(skip)]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[zeroize(skip)]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[zeroize(skip)]
    pub last_refreshed: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenFile {
    pub fn to_credential(&self) -> Credential {
        Credential {
            source: CredentialSource::Delegated,
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone().filter(|t| !t.is_empty()),
            expiry: self.expiry,
            granted_scopes: self.scopes.iter().cloned().collect(),
            quota_project: None,
        }
    }

    /// OAuth client recorded alongside the token, if both halves are present.
    pub fn client(&self) -> Option<ClientSecret> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some(ClientSecret {
                client_id: id.clone(),
                client_secret: secret.clone(),
                auth_uri: None,
                token_uri: self.token_uri.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for TokenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenFile")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("last_refreshed", &self.last_refreshed)
            .finish()
    }
}

/// Accept RFC 3339, naive ISO-8601 (assumed UTC) or epoch seconds.
fn deserialize_expiry<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawExpiry {
        Epoch(i64),
        EpochFloat(f64),
        Text(String),
    }

    match RawExpiry::deserialize(deserializer)? {
        RawExpiry::Epoch(secs) => epoch_to_utc(secs).ok_or_else(|| {
            serde::de::Error::custom(format!("expiry out of range: {}", secs))
        }),
        RawExpiry::EpochFloat(secs) => epoch_to_utc(secs as i64).ok_or_else(|| {
            serde::de::Error::custom(format!("expiry out of range: {}", secs))
        }),
        RawExpiry::Text(text) => parse_timestamp(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("unparseable expiry: {}", text))),
    }
}

fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
        .or_else(|| text.parse::<i64>().ok().and_then(epoch_to_utc))
}

// ── Ambient credential file ─────────────────────────────────────────────────

/// The parts of gcloud's application-default credential file we look at.
/// Secrets in that file are never deserialized.
#[derive(Debug, Clone, Deserialize)]
pub struct AdcFile {
    #[serde(rename = "type", default)]
    pub credential_type: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
}

// ── OAuth client ────────────────────────────────────────────────────────────

/// Installed-app OAuth client from Google Cloud Console.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ClientSecret {
    #[zeroize(skip)]
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    #[zeroize(skip)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    #[zeroize(skip)]
    pub token_uri: Option<String>,
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecret")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// `client_secret.json` wraps the client under `installed` or `web`.
#[derive(Deserialize)]
pub(crate) struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecretFile {
    pub(crate) fn into_client(self) -> Option<ClientSecret> {
        self.installed.or(self.web)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn full_scopes() -> BTreeSet<String> {
        scopes::required_scopes().into_iter().map(String::from).collect()
    }

    fn credential(expiry: DateTime<Utc>, granted: BTreeSet<String>) -> Credential {
        Credential {
            source: CredentialSource::Delegated,
            access_token: "ya29.test".into(),
            refresh_token: Some("1//refresh".into()),
            expiry,
            granted_scopes: granted,
            quota_project: None,
        }
    }

    #[test]
    fn test_expiry_margin() {
        let now = Utc::now();
        let cred = credential(now + Duration::seconds(30), full_scopes());
        assert!(!cred.is_expired_at(now, 0));
        assert!(cred.is_expired_at(now, 60));
    }

    #[test]
    fn test_verify_scopes_strict_subset_fails() {
        let mut granted = full_scopes();
        granted.remove(scopes::GMAIL_READONLY);
        let cred = credential(Utc::now() + Duration::hours(1), granted);
        match cred.verify_scopes() {
            Err(AuthError::IncompleteScope { missing, .. }) => {
                assert_eq!(missing, vec![scopes::GMAIL_READONLY.to_string()]);
            }
            other => panic!("expected IncompleteScope, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = credential(Utc::now(), full_scopes());
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("ya29.test"));
        assert!(!rendered.contains("1//refresh"));
    }

    #[test]
    fn test_token_file_accepts_authorized_user_layout() {
        let json = r#"{
            "token": "ya29.a0",
            "refresh_token": "1//0g",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "secret",
            "token_uri": "https://oauth2.googleapis.com/token",
            "scopes": ["https://www.googleapis.com/auth/drive.readonly"],
            "expiry": "2025-01-01T10:00:00.123456"
        }"#;
        let token: TokenFile = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "ya29.a0");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expiry.to_rfc3339(), "2025-01-01T10:00:00.123456+00:00");
        assert!(token.client().is_some());
    }

    #[test]
    fn test_token_file_accepts_epoch_expiry() {
        let json = r#"{"access_token": "a", "expiry": 1735725600, "scopes": []}"#;
        let token: TokenFile = serde_json::from_str(json).unwrap();
        assert_eq!(token.expiry.timestamp(), 1_735_725_600);
        assert!(token.to_credential().refresh_token.is_none());
    }

    #[test]
    fn test_empty_refresh_token_is_absent() {
        let json = r#"{"access_token": "a", "refresh_token": "", "expiry": "2030-01-01T00:00:00Z"}"#;
        let token: TokenFile = serde_json::from_str(json).unwrap();
        assert!(token.to_credential().refresh_token.is_none());
    }

    #[test]
    fn test_source_parsing_accepts_cli_names() {
        assert_eq!("adc".parse::<CredentialSource>(), Ok(CredentialSource::Ambient));
        assert_eq!("OAuth".parse::<CredentialSource>(), Ok(CredentialSource::Delegated));
        assert!("kerberos".parse::<CredentialSource>().is_err());
    }

    #[test]
    fn test_client_secret_file_prefers_installed() {
        let json = r#"{"installed": {"client_id": "a", "client_secret": "b"}}"#;
        let file: ClientSecretFile = serde_json::from_str(json).unwrap();
        let client = file.into_client().unwrap();
        assert_eq!(client.client_id, "a");
    }
}
