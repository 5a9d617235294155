//! Broker configuration and well-known paths.
//!
//! Configuration lives in `~/.config/g-workspace-mcp/config.json`. The file is
//! optional; every field has a default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::credential::CredentialSource;
use crate::error::AuthError;

const APP_DIR: &str = "g-workspace-mcp";
const CONFIG_FILE: &str = "config.json";
const TOKEN_FILE: &str = "token.json";
const CLIENT_SECRET_FILE: &str = "client_secret.json";
const ADC_FILE: &str = "application_default_credentials.json";

/// Tunables for the broker. Unknown keys are rejected so typos surface early.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Order in which sources are probed when none is requested explicitly.
    pub probe_order: Vec<CredentialSource>,
    /// Deadline for the interactive browser grant.
    pub auth_timeout_secs: u64,
    /// Tokens expiring within this window are treated as stale.
    pub refresh_margin_secs: i64,
    /// Per-request timeout for Google API calls.
    pub http_timeout_secs: u64,
    pub token_path: Option<PathBuf>,
    pub client_secret_path: Option<PathBuf>,
    pub adc_path: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            probe_order: vec![CredentialSource::Ambient, CredentialSource::Delegated],
            auth_timeout_secs: 120,
            refresh_margin_secs: 60,
            http_timeout_secs: 30,
            token_path: None,
            client_secret_path: None,
            adc_path: None,
        }
    }
}

impl BrokerConfig {
    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self, AuthError> {
        Self::load_from(&config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| AuthError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;

        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.probe_order.is_empty() {
            return Err(AuthError::Config("probe_order must name at least one source".into()));
        }
        if self.probe_order.len() == 2 && self.probe_order[0] == self.probe_order[1] {
            return Err(AuthError::Config("probe_order lists the same source twice".into()));
        }
        if self.probe_order.len() > 2 {
            return Err(AuthError::Config("probe_order accepts at most two sources".into()));
        }
        if self.auth_timeout_secs == 0 {
            return Err(AuthError::Config("auth_timeout_secs must be positive".into()));
        }
        if self.http_timeout_secs == 0 {
            return Err(AuthError::Config("http_timeout_secs must be positive".into()));
        }
        if self.refresh_margin_secs < 0 {
            return Err(AuthError::Config("refresh_margin_secs must not be negative".into()));
        }
        Ok(())
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Resolve credential file locations, applying overrides.
    pub fn paths(&self) -> Result<CredentialPaths, AuthError> {
        let token = match &self.token_path {
            Some(p) => p.clone(),
            None => config_dir()?.join(TOKEN_FILE),
        };
        let client_secret = match &self.client_secret_path {
            Some(p) => p.clone(),
            None => config_dir()?.join(CLIENT_SECRET_FILE),
        };
        let adc = match &self.adc_path {
            Some(p) => p.clone(),
            None => gcloud_config_dir()?.join(ADC_FILE),
        };
        Ok(CredentialPaths {
            token,
            client_secret,
            adc,
        })
    }
}

/// Filesystem locations of every credential artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    /// Delegated OAuth token (owned by us).
    pub token: PathBuf,
    /// Installed-app OAuth client used for the delegated grant.
    pub client_secret: PathBuf,
    /// gcloud application-default credentials (owned by gcloud).
    pub adc: PathBuf,
}

impl CredentialPaths {
    /// All artifacts inside one directory; used by tests and sandboxes.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            token: dir.join(TOKEN_FILE),
            client_secret: dir.join(CLIENT_SECRET_FILE),
            adc: dir.join("gcloud").join(ADC_FILE),
        }
    }
}

/// `~/.config/g-workspace-mcp`
pub fn config_dir() -> Result<PathBuf, AuthError> {
    let home = dirs::home_dir()
        .ok_or_else(|| AuthError::Config("could not determine home directory".into()))?;
    Ok(home.join(".config").join(APP_DIR))
}

/// Directory where gcloud keeps application-default credentials.
fn gcloud_config_dir() -> Result<PathBuf, AuthError> {
    #[cfg(windows)]
    {
        let base = dirs::config_dir()
            .ok_or_else(|| AuthError::Config("could not determine APPDATA directory".into()))?;
        Ok(base.join("gcloud"))
    }
    #[cfg(not(windows))]
    {
        let home = dirs::home_dir()
            .ok_or_else(|| AuthError::Config("could not determine home directory".into()))?;
        Ok(home.join(".config").join("gcloud"))
    }
}
