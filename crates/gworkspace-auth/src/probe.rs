//! Live credential probe: one minimal Drive call.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::BrokerConfig;
use crate::credential::CredentialSource;
use crate::error::AuthError;
use crate::manager::AuthManager;
use crate::service::{GoogleApi, UpstreamApiError};
use crate::setup::{ApiProbe, ProbeOutcome};
use crate::store::CredentialStore;

/// Lists a single Drive file id with a freshly built manager, so nothing
/// cached from an earlier attempt can mask a broken credential.
pub struct LiveProbe {
    store: Arc<CredentialStore>,
    config: BrokerConfig,
}

impl LiveProbe {
    pub fn new(store: Arc<CredentialStore>, config: &BrokerConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl ApiProbe for LiveProbe {
    async fn probe(&self, source: CredentialSource) -> ProbeOutcome {
        let manager = AuthManager::for_source(source, self.store.clone(), &self.config);
        let drive = match manager.get_service(GoogleApi::Drive, "v3").await {
            Ok(handle) => handle,
            Err(e) => return classify_auth_error(e),
        };

        let query = [("pageSize", "1".to_string()), ("fields", "files(id)".to_string())];
        let outcome = match drive.get_json("files", &query).await {
            Ok(_) => ProbeOutcome::Ok,
            Err(e) => classify_upstream_error(e),
        };
        debug!("Probe of {} credentials: {:?}", source, outcome);
        outcome
    }
}

fn classify_auth_error(err: AuthError) -> ProbeOutcome {
    match err {
        AuthError::IncompleteScope { missing, .. } => ProbeOutcome::InsufficientScopes { missing },
        AuthError::Unavailable { .. } | AuthError::Expired { .. } | AuthError::InvalidCredential { .. } => {
            ProbeOutcome::NoCredentials {
                detail: err.to_string(),
            }
        }
        other => ProbeOutcome::Other {
            detail: other.to_string(),
        },
    }
}

fn classify_upstream_error(err: UpstreamApiError) -> ProbeOutcome {
    if err.is_insufficient_scope() {
        ProbeOutcome::InsufficientScopes { missing: Vec::new() }
    } else if err.is_api_not_enabled() {
        ProbeOutcome::ApiNotEnabled {
            detail: err.message,
        }
    } else if err.is_unauthorized() {
        ProbeOutcome::NoCredentials {
            detail: err.to_string(),
        }
    } else {
        ProbeOutcome::Other {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scopes::GMAIL_READONLY;
    use reqwest::StatusCode;

    #[test]
    fn test_local_scope_gap_is_insufficient() {
        let outcome = classify_auth_error(AuthError::IncompleteScope {
            provider: CredentialSource::Ambient,
            missing: vec![GMAIL_READONLY.to_string()],
        });
        assert_eq!(
            outcome,
            ProbeOutcome::InsufficientScopes {
                missing: vec![GMAIL_READONLY.to_string()]
            }
        );
    }

    #[test]
    fn test_missing_source_is_no_credentials() {
        let outcome = classify_auth_error(AuthError::Unavailable {
            provider: CredentialSource::Ambient,
            detail: "no ADC".into(),
        });
        assert!(matches!(outcome, ProbeOutcome::NoCredentials { .. }));
    }

    #[test]
    fn test_disabled_api_is_not_enabled() {
        let err = UpstreamApiError::from_response(
            StatusCode::FORBIDDEN,
            r#"{"error": {"code": 403, "message": "Google Drive API has not been used in project 42 before or it is disabled.", "errors": [{"reason": "accessNotConfigured"}]}}"#,
        );
        assert!(matches!(
            classify_upstream_error(err),
            ProbeOutcome::ApiNotEnabled { .. }
        ));
    }

    #[test]
    fn test_server_error_is_other() {
        let err = UpstreamApiError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert!(matches!(classify_upstream_error(err), ProbeOutcome::Other { .. }));
    }

    #[tokio::test]
    async fn test_probe_without_credentials() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(CredentialStore::new(crate::config::CredentialPaths::in_dir(dir.path())));
        let probe = LiveProbe::new(store, &BrokerConfig::default());
        assert!(matches!(
            probe.probe(CredentialSource::Delegated).await,
            ProbeOutcome::NoCredentials { .. }
        ));
    }
}
