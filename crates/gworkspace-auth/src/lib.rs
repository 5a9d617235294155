//! Credential broker for the Google Workspace MCP server.
//!
//! Resolves a scope-complete Google credential from either gcloud's
//! application-default login (ambient) or our own OAuth token file
//! (delegated), and hands tools authenticated per-API handles.

pub mod config;
pub mod credential;
pub mod error;
pub mod grant;
pub mod manager;
pub mod probe;
pub mod provider;
pub mod scopes;
pub mod service;
pub mod setup;
pub mod store;

pub use config::{BrokerConfig, CredentialPaths};
pub use credential::{Credential, CredentialSource};
pub use error::{AuthError, AuthResult};
pub use grant::BrowserGrantFlow;
pub use manager::{AuthContext, AuthManager, AuthStatus, LogoutReport};
pub use probe::LiveProbe;
pub use scopes::Capability;
pub use service::{GoogleApi, ServiceHandle, UpstreamApiError};
pub use setup::{
    ApiProbe, GrantFlow, ProbeOutcome, SetupEvent, SetupOrchestrator, SetupPrompt, SetupReport,
    SetupState,
};
pub use store::{BackupRecord, CredentialStore};
