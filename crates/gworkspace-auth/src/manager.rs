//! Auth Manager
//!
//! Owns the active provider, the current credential and the service-handle
//! cache. Tools reach Google only through [`AuthManager::get_service`].
//!
//! Every credential or cache mutation happens under one async mutex, so
//! concurrent callers that find a stale token trigger a single refresh and
//! then share its result. There are no background timers: staleness is
//! checked on demand.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::credential::{Credential, CredentialSource};
use crate::error::AuthError;
use crate::provider::CredentialProvider;
use crate::scopes;
use crate::service::{GoogleApi, ServiceHandle};
use crate::store::CredentialStore;

/// Locally persisted credential metadata. Produced without network access.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthStatus {
    pub configured: bool,
    pub source: Option<CredentialSource>,
    pub scopes: BTreeSet<String>,
    pub expiry: Option<DateTime<Utc>>,
    /// Required scopes absent from `scopes`. Only meaningful when the scope
    /// list is recorded locally (delegated).
    pub missing_scopes: Vec<String>,
    pub quota_project: Option<String>,
    pub path: Option<PathBuf>,
}

impl AuthStatus {
    pub fn is_expired(&self) -> bool {
        self.expiry.map(|e| e <= Utc::now()).unwrap_or(false)
    }
}

/// What `logout` did, and what it left for the user to do.
#[derive(Debug, Clone, Serialize)]
pub struct LogoutReport {
    pub token_removed: bool,
    pub token_path: PathBuf,
    /// Manual steps for clearing the ambient credential (only with `all`).
    pub ambient_steps: Vec<String>,
}

/// Read what is on disk for `source`. `None` when the source has no artifact.
pub fn inspect_local(store: &CredentialStore, source: CredentialSource) -> Option<AuthStatus> {
    match source {
        CredentialSource::Delegated => {
            let token = match store.load_token() {
                Ok(Some(token)) => token,
                Ok(None) => return None,
                Err(e) => {
                    warn!("Unreadable token file: {}", e);
                    return Some(AuthStatus {
                        configured: false,
                        source: Some(source),
                        path: Some(store.paths().token.clone()),
                        ..AuthStatus::default()
                    });
                }
            };
            let granted: BTreeSet<String> = token.scopes.iter().cloned().collect();
            Some(AuthStatus {
                configured: true,
                source: Some(source),
                missing_scopes: scopes::missing_scopes(&granted),
                scopes: granted,
                expiry: Some(token.expiry),
                quota_project: None,
                path: Some(store.paths().token.clone()),
            })
        }
        CredentialSource::Ambient => {
            let adc = match store.load_adc() {
                Ok(Some(adc)) => adc,
                Ok(None) => return None,
                Err(e) => {
                    warn!("Unreadable ADC file: {}", e);
                    return Some(AuthStatus {
                        configured: false,
                        source: Some(source),
                        path: Some(store.paths().adc.clone()),
                        ..AuthStatus::default()
                    });
                }
            };
            Some(AuthStatus {
                configured: true,
                source: Some(source),
                quota_project: adc.quota_project_id.clone(),
                path: Some(store.paths().adc.clone()),
                ..AuthStatus::default()
            })
        }
    }
}

/// First source in `order` with a local artifact, else the first listed.
pub fn select_source(store: &CredentialStore, order: &[CredentialSource]) -> CredentialSource {
    let present = order.iter().copied().find(|source| match source {
        CredentialSource::Ambient => store.adc_exists(),
        CredentialSource::Delegated => store.token_exists(),
    });
    match present {
        Some(source) => {
            info!("Using {} credentials", source);
            source
        }
        None => {
            let fallback = order.first().copied().unwrap_or(CredentialSource::Delegated);
            info!("No credentials found, defaulting to {} source", fallback);
            fallback
        }
    }
}

struct BrokerState {
    credential: Option<Credential>,
    /// Bumped on every successful acquire or refresh.
    generation: u64,
    /// Staleness margin for the installed credential.
    margin_secs: i64,
    services: HashMap<(GoogleApi, String), ServiceHandle>,
}

impl BrokerState {
    fn evict(&mut self) {
        if !self.services.is_empty() {
            debug!("Evicting {} cached service handles", self.services.len());
        }
        self.services.clear();
    }

    /// A token that arrives with less life left than `margin_secs` (gcloud
    /// hands back its cached token until it expires) is kept for half of its
    /// remaining life instead of counting as stale on arrival.
    fn install(&mut self, credential: Credential, margin_secs: i64) {
        let remaining = credential.expiry.signed_duration_since(Utc::now()).num_seconds();
        self.margin_secs = margin_secs.min(remaining / 2).max(0);
        self.credential = Some(credential);
        self.generation += 1;
        self.evict();
    }

    fn discard(&mut self) {
        self.credential = None;
        self.evict();
    }
}

pub struct AuthManager {
    provider: CredentialProvider,
    store: Arc<CredentialStore>,
    probe_order: Vec<CredentialSource>,
    margin_secs: i64,
    http: reqwest::Client,
    /// Serve every API from this root instead of Google's hosts.
    api_root: Option<String>,
    state: Mutex<BrokerState>,
}

impl AuthManager {
    pub fn new(provider: CredentialProvider, store: Arc<CredentialStore>, config: &BrokerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            provider,
            store,
            probe_order: config.probe_order.clone(),
            margin_secs: config.refresh_margin_secs,
            http,
            api_root: None,
            state: Mutex::new(BrokerState {
                credential: None,
                generation: 0,
                margin_secs: config.refresh_margin_secs,
                services: HashMap::new(),
            }),
        }
    }

    /// Point every service handle at `root` (a local mock or proxy).
    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = Some(root.into());
        self
    }

    /// Production manager: source picked from local state and `probe_order`.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, AuthError> {
        config.validate()?;
        let store = Arc::new(CredentialStore::new(config.paths()?));
        let source = select_source(&store, &config.probe_order);
        Ok(Self::for_source(source, store, config))
    }

    pub fn for_source(source: CredentialSource, store: Arc<CredentialStore>, config: &BrokerConfig) -> Self {
        let provider = CredentialProvider::for_source(source, store.clone(), config);
        Self::new(provider, store, config)
    }

    /// Source fixed for the lifetime of this manager.
    pub fn source(&self) -> CredentialSource {
        self.provider.source()
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Authenticated handle for `(api, version)`.
    ///
    /// Reuses the cached handle while the credential it was built from is
    /// still current; otherwise acquires or refreshes first.
    pub async fn get_service(&self, api: GoogleApi, version: &str) -> Result<ServiceHandle, AuthError> {
        let mut state = self.state.lock().await;

        let stale = match &state.credential {
            Some(credential) => credential.is_expired(state.margin_secs),
            None => true,
        };

        if stale {
            let result = match &state.credential {
                Some(current) => {
                    debug!("{} credential is stale, refreshing", self.source());
                    self.provider.refresh(current).await
                }
                None => self.provider.acquire().await,
            };
            match result {
                Ok(credential) => state.install(credential, self.margin_secs),
                Err(e) => {
                    warn!("{} credential unavailable: {}", self.source(), e);
                    state.discard();
                    return Err(e);
                }
            }
        }

        let key = (api, version.to_string());
        let generation = state.generation;
        if let Some(handle) = state.services.get(&key) {
            if handle.generation() == generation {
                return Ok(handle.clone());
            }
        }

        let credential = state.credential.as_ref().ok_or_else(|| AuthError::Unavailable {
            provider: self.source(),
            detail: "no credential after acquisition".into(),
        })?;
        let base_url = match &self.api_root {
            Some(root) => api.base_url_under(root, version),
            None => api.base_url(version),
        };
        let handle = ServiceHandle::new(api, version, base_url, self.http.clone(), credential, generation);
        debug!("Built {} {} handle (generation {})", api, version, generation);
        state.services.insert(key, handle.clone());
        Ok(handle)
    }

    /// Renew the credential now, evicting every cached handle.
    pub async fn force_refresh(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        let result = match &state.credential {
            Some(current) => self.provider.refresh(current).await,
            None => self.provider.acquire().await,
        };
        match result {
            Ok(credential) => {
                state.install(credential, self.margin_secs);
                Ok(())
            }
            Err(e) => {
                state.discard();
                Err(e)
            }
        }
    }

    /// Drop the credential and all handles; the next call re-acquires.
    pub async fn clear_cache(&self) {
        self.state.lock().await.discard();
    }

    /// Local-only view of the configured credential, in probe order.
    pub fn status(&self) -> AuthStatus {
        self.probe_order
            .iter()
            .find_map(|source| inspect_local(&self.store, *source))
            .unwrap_or_default()
    }

    /// Delete the delegated token file. With `all`, also list the steps that
    /// clear the ambient credential; that file is never touched here.
    pub async fn logout(&self, all: bool) -> Result<LogoutReport, AuthError> {
        self.clear_cache().await;
        let token_removed = self.store.delete_token()?;

        let ambient_steps = if all && self.store.adc_exists() {
            vec![
                "gcloud auth application-default revoke".to_string(),
                format!("or delete {}", self.store.paths().adc.display()),
            ]
        } else {
            Vec::new()
        };

        Ok(LogoutReport {
            token_removed,
            token_path: self.store.paths().token.clone(),
            ambient_steps,
        })
    }
}

/// Lazily constructed manager handed to tool functions.
pub struct AuthContext {
    config: BrokerConfig,
    manager: OnceCell<Arc<AuthManager>>,
}

impl AuthContext {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            manager: OnceCell::new(),
        }
    }

    /// Context around an already-built manager.
    pub fn with_manager(manager: Arc<AuthManager>) -> Self {
        Self {
            config: BrokerConfig::default(),
            manager: OnceCell::new_with(Some(manager)),
        }
    }

    pub async fn manager(&self) -> Result<Arc<AuthManager>, AuthError> {
        self.manager
            .get_or_try_init(|| async { AuthManager::from_config(&self.config).map(Arc::new) })
            .await
            .cloned()
    }

    pub async fn get_service(&self, api: GoogleApi, version: &str) -> Result<ServiceHandle, AuthError> {
        self.manager().await?.get_service(api, version).await
    }
}
