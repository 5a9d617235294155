//! Broker error taxonomy.
//!
//! Every failure carries the source that was probed and, where relevant, the
//! scopes that were missing. Messages never contain token material.

use std::path::PathBuf;
use thiserror::Error;

use crate::credential::CredentialSource;
use crate::scopes::describe_missing;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The source has never been configured (no ADC login, no token file).
    #[error("{provider} credentials are not configured: {detail}")]
    Unavailable {
        provider: CredentialSource,
        detail: String,
    },

    /// The source is configured but its token cannot be renewed.
    #[error("{provider} credentials expired and could not be refreshed: {detail}")]
    Expired {
        provider: CredentialSource,
        detail: String,
    },

    /// The credential is valid but was never granted every required scope.
    #[error("{provider} credentials are missing required scopes: {}", describe_missing(.missing))]
    IncompleteScope {
        provider: CredentialSource,
        missing: Vec<String>,
    },

    #[error("interactive authorization timed out after {0} seconds")]
    Timeout(u64),

    #[error("interactive authorization was cancelled")]
    Cancelled,

    #[error("{provider} authorization flow failed: {detail}")]
    GrantFailed {
        provider: CredentialSource,
        detail: String,
    },

    #[error("credential storage error at {}: {detail}", .path.display())]
    Storage { path: PathBuf, detail: String },

    #[error("malformed credential file {}: {detail}", .path.display())]
    InvalidCredential { path: PathBuf, detail: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable identifier used in tool result envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Unavailable { .. } => "auth_unavailable",
            AuthError::Expired { .. } => "auth_expired",
            AuthError::IncompleteScope { .. } => "auth_incomplete_scope",
            AuthError::Timeout(_) => "auth_timeout",
            AuthError::Cancelled => "auth_cancelled",
            AuthError::GrantFailed { .. } => "auth_grant_failed",
            AuthError::Storage { .. } => "credential_storage",
            AuthError::InvalidCredential { .. } => "invalid_credential",
            AuthError::Config(_) => "config_error",
        }
    }

    /// What the user should do next, when running setup would help.
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            AuthError::Unavailable { .. }
            | AuthError::Expired { .. }
            | AuthError::InvalidCredential { .. } => Some("Run `g-workspace-mcp setup` to authenticate."),
            AuthError::IncompleteScope { .. } => {
                Some("Run `g-workspace-mcp setup` and grant every requested permission.")
            }
            AuthError::Timeout(_) | AuthError::Cancelled | AuthError::GrantFailed { .. } => {
                Some("Run `g-workspace-mcp setup` again.")
            }
            AuthError::Storage { .. } | AuthError::Config(_) => None,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        AuthError::Storage {
            path: path.into(),
            detail: err.to_string(),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scopes::CALENDAR_READONLY;

    #[test]
    fn test_incomplete_scope_names_capability() {
        let err = AuthError::IncompleteScope {
            provider: CredentialSource::Ambient,
            missing: vec![CALENDAR_READONLY.to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ambient"));
        assert!(msg.contains("calendar-read"));
        assert_eq!(err.kind(), "auth_incomplete_scope");
    }

    #[test]
    fn test_kinds_are_distinct_for_recoverable_errors() {
        let unavailable = AuthError::Unavailable {
            provider: CredentialSource::Delegated,
            detail: "no token file".into(),
        };
        let expired = AuthError::Expired {
            provider: CredentialSource::Delegated,
            detail: "invalid_grant".into(),
        };
        assert_ne!(unavailable.kind(), expired.kind());
        assert!(unavailable.remedy().is_some());
        assert!(AuthError::Config("x".into()).remedy().is_none());
    }
}
