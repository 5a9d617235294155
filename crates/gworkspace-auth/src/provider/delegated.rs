//! Delegated source: our own OAuth token file.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{OAuthTokens, TokenEndpoint};
use crate::credential::{ClientSecret, Credential, CredentialSource, TokenFile};
use crate::error::AuthError;
use crate::store::CredentialStore;

pub struct DelegatedProvider {
    store: Arc<CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    margin_secs: i64,
}

impl DelegatedProvider {
    pub fn new(store: Arc<CredentialStore>, endpoint: Arc<dyn TokenEndpoint>, margin_secs: i64) -> Self {
        Self {
            store,
            endpoint,
            margin_secs,
        }
    }

    /// Load the token file, refreshing first when the access token is stale.
    pub async fn acquire(&self) -> Result<Credential, AuthError> {
        let token = self.load()?;
        let credential = token.to_credential();
        if credential.is_expired(self.margin_secs) {
            debug!("Delegated token expired at {}, refreshing", credential.expiry);
            return self.refresh_from(&token).await;
        }
        Ok(credential)
    }

    /// Renew the credential with its refresh token.
    ///
    /// The file is re-read first: if another process already rotated the
    /// token, that result is used instead of spending another refresh.
    pub async fn refresh(&self, current: &Credential) -> Result<Credential, AuthError> {
        let token = self.load()?;
        let on_disk = token.to_credential();
        if on_disk.access_token != current.access_token && !on_disk.is_expired(self.margin_secs) {
            debug!("Token file was refreshed elsewhere, reusing it");
            return Ok(on_disk);
        }
        self.refresh_from(&token).await
    }

    fn load(&self) -> Result<TokenFile, AuthError> {
        self.store.load_token()?.ok_or_else(|| AuthError::Unavailable {
            provider: CredentialSource::Delegated,
            detail: format!("no token file at {}", self.store.paths().token.display()),
        })
    }

    async fn refresh_from(&self, token: &TokenFile) -> Result<Credential, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Expired {
                provider: CredentialSource::Delegated,
                detail: "token file has no refresh token".into(),
            })?;

        let client = match token.client() {
            Some(client) => client,
            None => self.store.load_client_secret()?.ok_or_else(|| AuthError::Expired {
                provider: CredentialSource::Delegated,
                detail: "no OAuth client available to refresh with".into(),
            })?,
        };

        let tokens = self
            .endpoint
            .refresh(&client, refresh_token)
            .await
            .map_err(|detail| {
                warn!("Delegated refresh failed: {}", detail);
                AuthError::Expired {
                    provider: CredentialSource::Delegated,
                    detail,
                }
            })?;

        let updated = merge_refresh(token, &tokens);
        self.store.save_token(&updated)?;
        info!("Refreshed delegated token, valid until {}", updated.expiry);
        Ok(updated.to_credential())
    }
}

/// Fold a refresh response into the existing record. Google omits the refresh
/// token (and sometimes the scope list) on refresh; keep the old ones.
fn merge_refresh(previous: &TokenFile, tokens: &OAuthTokens) -> TokenFile {
    TokenFile {
        access_token: tokens.access_token.clone(),
        refresh_token: tokens
            .refresh_token
            .clone()
            .or_else(|| previous.refresh_token.clone()),
        token_type: tokens.token_type.clone(),
        expiry: tokens.expiry,
        scopes: if tokens.scopes.is_empty() {
            previous.scopes.clone()
        } else {
            tokens.scopes.clone()
        },
        client_id: previous.client_id.clone(),
        client_secret: previous.client_secret.clone(),
        token_uri: previous.token_uri.clone(),
        last_refreshed: Some(Utc::now()),
    }
}

/// Persist the result of a fresh consent grant.
///
/// `requested` stands in for the granted scopes only when Google's response
/// did not list them.
pub fn persist_grant(
    store: &CredentialStore,
    client: &ClientSecret,
    tokens: &OAuthTokens,
    requested: &[&str],
) -> Result<Credential, AuthError> {
    let scopes = if tokens.scopes.is_empty() {
        requested.iter().map(|s| s.to_string()).collect()
    } else {
        tokens.scopes.clone()
    };

    let record = TokenFile {
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        token_type: tokens.token_type.clone(),
        expiry: tokens.expiry,
        scopes,
        client_id: Some(client.client_id.clone()),
        client_secret: Some(client.client_secret.clone()),
        token_uri: client.token_uri.clone(),
        last_refreshed: Some(Utc::now()),
    };
    store.save_token(&record)?;
    Ok(record.to_credential())
}
