//! Setup Orchestrator
//!
//! Interactive state machine that decides whether existing credentials can be
//! kept, backs up the ambient file before overwriting it, and drives the
//! browser grant when a new authorization is needed.
//!
//! ```text
//! Start → DetectSource → CheckExisting ─┬─ Reusable ───────────────────────────→ Done
//!                                       ├─ NeedsBackupAndReauth ─┐
//!                                       └─ NeedsFreshAuth ───────┴→ Authenticating → Verifying → Done | Failed
//! ```
//!
//! Running it again on a reusable credential writes nothing.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::credential::CredentialSource;
use crate::error::AuthError;
use crate::manager::inspect_local;
use crate::scopes::describe_missing;
use crate::store::{BackupRecord, CredentialStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SetupState {
    Start,
    DetectSource,
    CheckExisting,
    Reusable,
    NeedsBackupAndReauth,
    NeedsFreshAuth,
    Authenticating,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for SetupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a live, minimal API call made with the current credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    /// Google rejected the call for missing scopes.
    InsufficientScopes { missing: Vec<String> },
    /// The API is disabled (or unbilled) for the credential's quota project.
    ApiNotEnabled { detail: String },
    /// No usable credential could be loaded.
    NoCredentials { detail: String },
    Other { detail: String },
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }

    pub fn summary(&self) -> String {
        match self {
            ProbeOutcome::Ok => "credentials work".to_string(),
            ProbeOutcome::InsufficientScopes { missing } if missing.is_empty() => {
                "credentials are missing required scopes".to_string()
            }
            ProbeOutcome::InsufficientScopes { missing } => {
                format!("credentials are missing scopes: {}", describe_missing(missing))
            }
            ProbeOutcome::ApiNotEnabled { detail } => format!("API not enabled: {}", detail),
            ProbeOutcome::NoCredentials { detail } => format!("credentials unusable: {}", detail),
            ProbeOutcome::Other { detail } => detail.clone(),
        }
    }
}

/// Progress notifications for whoever is watching setup.
#[derive(Debug, Clone)]
pub enum SetupEvent {
    Entered(SetupState),
    SourceSelected(CredentialSource),
    Probed(ProbeOutcome),
    BackedUp(BackupRecord),
    Diagnostic(String),
}

/// Live check that a source's credential is honored by Google.
#[async_trait]
pub trait ApiProbe: Send + Sync {
    async fn probe(&self, source: CredentialSource) -> ProbeOutcome;
}

/// The interactive browser grant for a source.
#[async_trait]
pub trait GrantFlow: Send + Sync {
    async fn grant(&self, source: CredentialSource) -> Result<(), AuthError>;
}

/// User interaction during setup. `choose_source` and `confirm_reauth` may
/// block on the terminal; the orchestrator calls them off the async runtime.
pub trait SetupPrompt: Send + Sync {
    /// Pick a source for a fresh grant.
    fn choose_source(&self, default: CredentialSource) -> Result<CredentialSource, AuthError>;

    /// Ask before replacing an existing credential.
    fn confirm_reauth(&self, source: CredentialSource, reason: &str) -> Result<bool, AuthError>;

    fn notify(&self, event: &SetupEvent);
}

/// Outcome of one setup run.
#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub source: Option<CredentialSource>,
    /// Every state entered, in order.
    pub trace: Vec<SetupState>,
    #[serde(skip)]
    pub backup: Option<BackupRecord>,
    pub diagnostic: Option<String>,
}

impl SetupReport {
    pub fn final_state(&self) -> SetupState {
        self.trace.last().copied().unwrap_or(SetupState::Start)
    }

    pub fn succeeded(&self) -> bool {
        self.final_state() == SetupState::Done
    }

    pub fn visited(&self, state: SetupState) -> bool {
        self.trace.contains(&state)
    }
}

pub struct SetupOrchestrator {
    store: Arc<CredentialStore>,
    probe_order: Vec<CredentialSource>,
    grant_timeout: Duration,
    probe: Arc<dyn ApiProbe>,
    grant: Arc<dyn GrantFlow>,
    prompt: Arc<dyn SetupPrompt>,
}

/// Mutable state threaded through one run.
struct Run<'a> {
    prompt: &'a dyn SetupPrompt,
    trace: Vec<SetupState>,
    source: Option<CredentialSource>,
    backup: Option<BackupRecord>,
}

impl Run<'_> {
    fn enter(&mut self, state: SetupState) {
        debug!("setup: {}", state);
        self.trace.push(state);
        self.prompt.notify(&SetupEvent::Entered(state));
    }

    fn finish(mut self, state: SetupState, diagnostic: Option<String>) -> SetupReport {
        self.enter(state);
        if let Some(msg) = &diagnostic {
            self.prompt.notify(&SetupEvent::Diagnostic(msg.clone()));
        }
        SetupReport {
            source: self.source,
            trace: self.trace,
            backup: self.backup,
            diagnostic,
        }
    }
}

impl SetupOrchestrator {
    pub fn new(
        store: Arc<CredentialStore>,
        config: &BrokerConfig,
        probe: Arc<dyn ApiProbe>,
        grant: Arc<dyn GrantFlow>,
        prompt: Arc<dyn SetupPrompt>,
    ) -> Self {
        Self {
            store,
            probe_order: config.probe_order.clone(),
            grant_timeout: config.auth_timeout(),
            probe,
            grant,
            prompt,
        }
    }

    /// Drive setup to `Done` or `Failed`.
    ///
    /// Timeout and cancellation of the grant step are returned as errors;
    /// every other failure ends in a `Failed` report with a diagnostic.
    pub async fn run(
        &self,
        requested: Option<CredentialSource>,
        cancel: CancellationToken,
    ) -> Result<SetupReport, AuthError> {
        let mut run = Run {
            prompt: self.prompt.as_ref(),
            trace: Vec::new(),
            source: None,
            backup: None,
        };
        run.enter(SetupState::Start);

        // ── DetectSource ────────────────────────────────────────────────────
        run.enter(SetupState::DetectSource);
        let existing = match requested {
            Some(source) => inspect_local(&self.store, source).map(|status| (source, status)),
            None => self
                .probe_order
                .iter()
                .find_map(|source| inspect_local(&self.store, *source).map(|s| (*source, s))),
        };
        run.source = requested.or(existing.as_ref().map(|(source, _)| *source));
        if let Some(source) = run.source {
            self.prompt.notify(&SetupEvent::SourceSelected(source));
            info!("Setup using {} source", source);
        }

        // ── CheckExisting ───────────────────────────────────────────────────
        run.enter(SetupState::CheckExisting);
        let previous_quota = existing.as_ref().and_then(|(_, s)| s.quota_project.clone());

        let reauth_reason = match &existing {
            None => None,
            Some((source, status)) if !status.configured => {
                Some(format!("the {} credential file could not be read", source))
            }
            Some((source, _)) => {
                let outcome = self.probe_or_cancel(*source, &cancel).await?;
                self.prompt.notify(&SetupEvent::Probed(outcome.clone()));
                if outcome.is_ok() {
                    run.enter(SetupState::Reusable);
                    info!("Existing {} credentials are valid", source);
                    return Ok(run.finish(SetupState::Done, None));
                }
                Some(outcome.summary())
            }
        };

        let source = match reauth_reason {
            Some(reason) => {
                run.enter(SetupState::NeedsBackupAndReauth);
                let source = match run.source {
                    Some(source) => source,
                    None => return Ok(run.finish(SetupState::Failed, Some(reason))),
                };
                warn!("{} credentials need re-authorization: {}", source, reason);
                let question = reason.clone();
                let confirmed = self
                    .ask(move |prompt| prompt.confirm_reauth(source, &question))
                    .await?;
                if !confirmed {
                    let msg = format!("Re-authorization declined; {}", reason);
                    return Ok(run.finish(SetupState::Failed, Some(msg)));
                }
                if source == CredentialSource::Ambient {
                    match self.store.backup_adc() {
                        Ok(Some(record)) => {
                            self.prompt.notify(&SetupEvent::BackedUp(record.clone()));
                            run.backup = Some(record);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let msg = format!("Could not back up existing credentials: {}", e);
                            return Ok(run.finish(SetupState::Failed, Some(msg)));
                        }
                    }
                }
                source
            }
            None => {
                run.enter(SetupState::NeedsFreshAuth);
                let source = match run.source {
                    Some(source) => source,
                    None => {
                        let chosen = self
                            .ask(|prompt| prompt.choose_source(CredentialSource::Delegated))
                            .await?;
                        self.prompt.notify(&SetupEvent::SourceSelected(chosen));
                        chosen
                    }
                };
                run.source = Some(source);
                source
            }
        };

        // ── Authenticating ──────────────────────────────────────────────────
        run.enter(SetupState::Authenticating);
        let granted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Authorization cancelled");
                return Err(AuthError::Cancelled);
            }
            result = tokio::time::timeout(self.grant_timeout, self.grant.grant(source)) => result,
        };

        match granted {
            Err(_) => {
                warn!("Authorization timed out after {:?}", self.grant_timeout);
                return Err(AuthError::Timeout(self.grant_timeout.as_secs()));
            }
            Ok(Err(e @ (AuthError::Timeout(_) | AuthError::Cancelled))) => return Err(e),
            Ok(Err(e)) => {
                return Ok(run.finish(SetupState::Failed, Some(e.to_string())));
            }
            Ok(Ok(())) => {}
        }

        // ── Verifying ───────────────────────────────────────────────────────
        run.enter(SetupState::Verifying);
        let outcome = self.probe_or_cancel(source, &cancel).await?;
        self.prompt.notify(&SetupEvent::Probed(outcome.clone()));
        if outcome.is_ok() {
            info!("Setup complete with {} credentials", source);
            return Ok(run.finish(SetupState::Done, None));
        }

        let mut diagnostic = format!("Verification failed: {}", outcome.summary());
        if let ProbeOutcome::ApiNotEnabled { .. } = outcome {
            if let Some(project) = &previous_quota {
                diagnostic.push_str(&format!(
                    ". The previous quota project was {}; restore it with `gcloud auth application-default set-quota-project {}`",
                    project, project
                ));
            } else {
                diagnostic.push_str(
                    ". Set a quota project with `gcloud auth application-default set-quota-project <PROJECT_ID>`",
                );
            }
        }
        Ok(run.finish(SetupState::Failed, Some(diagnostic)))
    }

    async fn probe_or_cancel(
        &self,
        source: CredentialSource,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, AuthError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Setup cancelled while checking {} credentials", source);
                Err(AuthError::Cancelled)
            }
            outcome = self.probe.probe(source) => Ok(outcome),
        }
    }

    /// Run a terminal prompt on the blocking pool.
    async fn ask<T, F>(&self, question: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SetupPrompt) -> Result<T, AuthError> + Send + 'static,
    {
        let prompt = self.prompt.clone();
        match tokio::task::spawn_blocking(move || question(prompt.as_ref())).await {
            Ok(answer) => answer,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(AuthError::Cancelled),
        }
    }
}
