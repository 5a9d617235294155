//! Credential Store
//!
//! Filesystem persistence for the delegated token file, the OAuth client
//! secret, and timestamped backups of gcloud's ADC file. This is the only
//! module that writes credential files. Writes go through a temp file and a
//! rename so a reader never observes a half-written token.

use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::CredentialPaths;
use crate::credential::{AdcFile, ClientSecret, ClientSecretFile, TokenFile};
use crate::error::AuthError;

/// A copy of the ADC file taken right before it is overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

pub struct CredentialStore {
    paths: CredentialPaths,
}

impl CredentialStore {
    pub fn new(paths: CredentialPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    // ── Delegated token ─────────────────────────────────────────────────────

    pub fn token_exists(&self) -> bool {
        self.paths.token.is_file()
    }

    pub fn load_token(&self) -> Result<Option<TokenFile>, AuthError> {
        let path = &self.paths.token;
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::storage(path, e)),
        };

        let token: TokenFile =
            serde_json::from_slice(&data).map_err(|e| AuthError::InvalidCredential {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        Ok(Some(token))
    }

    pub fn save_token(&self, token: &TokenFile) -> Result<(), AuthError> {
        let path = &self.paths.token;
        let json = serde_json::to_vec_pretty(token).map_err(|e| AuthError::storage(path, e))?;
        write_atomic(path, &json).map_err(|e| AuthError::storage(path, e))?;
        info!("Saved delegated token ({} scopes)", token.scopes.len());
        Ok(())
    }

    /// Remove the token file. Returns whether a file was removed.
    pub fn delete_token(&self) -> Result<bool, AuthError> {
        let path = &self.paths.token;
        match fs::remove_file(path) {
            Ok(()) => {
                info!("Removed delegated token at {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AuthError::storage(path, e)),
        }
    }

    // ── OAuth client secret ─────────────────────────────────────────────────

    pub fn load_client_secret(&self) -> Result<Option<ClientSecret>, AuthError> {
        let path = &self.paths.client_secret;
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::storage(path, e)),
        };

        let file: ClientSecretFile =
            serde_json::from_slice(&data).map_err(|e| AuthError::InvalidCredential {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        file.into_client()
            .map(Some)
            .ok_or_else(|| AuthError::InvalidCredential {
                path: path.clone(),
                detail: "expected an \"installed\" or \"web\" client".to_string(),
            })
    }

    /// Copy a downloaded `client_secret.json` into place (mode 0600).
    pub fn install_client_secret(&self, source: &Path) -> Result<PathBuf, AuthError> {
        let dest = &self.paths.client_secret;
        if source == dest.as_path() {
            return Ok(dest.clone());
        }

        let data = fs::read(source).map_err(|e| AuthError::storage(source, e))?;
        let parsed: ClientSecretFile =
            serde_json::from_slice(&data).map_err(|e| AuthError::InvalidCredential {
                path: source.to_path_buf(),
                detail: e.to_string(),
            })?;
        if parsed.into_client().is_none() {
            return Err(AuthError::InvalidCredential {
                path: source.to_path_buf(),
                detail: "expected an \"installed\" or \"web\" client".to_string(),
            });
        }

        write_atomic(dest, &data).map_err(|e| AuthError::storage(dest, e))?;
        info!("Installed OAuth client secret at {:?}", dest);
        Ok(dest.clone())
    }

    // ── Ambient (ADC) file ──────────────────────────────────────────────────

    pub fn adc_exists(&self) -> bool {
        self.paths.adc.is_file()
    }

    pub fn load_adc(&self) -> Result<Option<AdcFile>, AuthError> {
        let path = &self.paths.adc;
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::storage(path, e)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| AuthError::InvalidCredential {
                path: path.clone(),
                detail: e.to_string(),
            })
    }

    /// Copy the ADC file to `<path>.backup.<unix_timestamp>`.
    ///
    /// Returns `None` when there is nothing to back up. Existing backups are
    /// never overwritten; a taken timestamp is bumped by one second.
    pub fn backup_adc(&self) -> Result<Option<BackupRecord>, AuthError> {
        let original = &self.paths.adc;
        let data = match fs::read(original) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::storage(original, e)),
        };

        let created_at = Utc::now();
        let mut stamp = created_at.timestamp();
        loop {
            let backup_path = backup_path_for(original, stamp);
            match create_new_private(&backup_path) {
                Ok(mut file) => {
                    file.write_all(&data)
                        .and_then(|_| file.sync_all())
                        .map_err(|e| AuthError::storage(&backup_path, e))?;
                    info!("Backed up ADC file to {:?}", backup_path);
                    return Ok(Some(BackupRecord {
                        original_path: original.clone(),
                        backup_path,
                        created_at,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("Backup {:?} already exists, trying next timestamp", backup_path);
                    stamp += 1;
                }
                Err(e) => return Err(AuthError::storage(&backup_path, e)),
            }
        }
    }

    /// Put a backup back in place of its original file.
    pub fn restore_backup(&self, record: &BackupRecord) -> Result<(), AuthError> {
        let data =
            fs::read(&record.backup_path).map_err(|e| AuthError::storage(&record.backup_path, e))?;
        write_atomic(&record.original_path, &data)
            .map_err(|e| AuthError::storage(&record.original_path, e))?;
        info!(
            "Restored {:?} from {:?}",
            record.original_path, record.backup_path
        );
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn backup_path_for(original: &Path, stamp: i64) -> PathBuf {
    let mut name = OsString::from(original.as_os_str());
    name.push(format!(".backup.{}", stamp));
    PathBuf::from(name)
}

fn create_new_private(path: &Path) -> io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Write `data` to a sibling temp file (0600), fsync it, then rename over
/// `path`.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(format!(".tmp.{}", std::process::id()));
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
