//! Credential Providers
//!
//! One provider per credential source. A provider turns on-disk state into a
//! validated [`Credential`] and renews it when it goes stale. Network access
//! sits behind the [`TokenEndpoint`] and [`AmbientTokenSource`] traits so the
//! broker can be exercised without Google.

pub mod ambient;
pub mod delegated;
pub mod google;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::BrokerConfig;
use crate::credential::{ClientSecret, Credential, CredentialSource};
use crate::error::AuthError;
use crate::store::CredentialStore;

pub use ambient::{AmbientProvider, AmbientToken, GcloudTokenSource};
pub use delegated::DelegatedProvider;
pub use google::GoogleOAuth;

/// Tokens returned from an OAuth token exchange or refresh.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[zeroize(skip)]
    pub token_type: String,
    #[zeroize(skip)]
    pub expiry: DateTime<Utc>,
    /// Scopes Google reports as granted. Empty when the response omitted them.
    #[zeroize(skip)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Google's token endpoint, as far as refreshing is concerned.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(
        &self,
        client: &ClientSecret,
        refresh_token: &str,
    ) -> Result<OAuthTokens, String>;
}

/// Something that can mint an access token from the ambient credential.
#[async_trait]
pub trait AmbientTokenSource: Send + Sync {
    async fn fetch(&self) -> Result<AmbientToken, AuthError>;
}

/// The provider for one credential source.
pub enum CredentialProvider {
    Ambient(AmbientProvider),
    Delegated(DelegatedProvider),
}

impl CredentialProvider {
    /// Production provider for `source`, wired to gcloud or Google's endpoint.
    pub fn for_source(
        source: CredentialSource,
        store: Arc<CredentialStore>,
        config: &BrokerConfig,
    ) -> Self {
        match source {
            CredentialSource::Ambient => CredentialProvider::Ambient(AmbientProvider::new(
                store,
                Arc::new(GcloudTokenSource::new(config.http_timeout())),
            )),
            CredentialSource::Delegated => CredentialProvider::Delegated(DelegatedProvider::new(
                store,
                Arc::new(GoogleOAuth::new(config.http_timeout())),
                config.refresh_margin_secs,
            )),
        }
    }

    pub fn source(&self) -> CredentialSource {
        match self {
            CredentialProvider::Ambient(_) => CredentialSource::Ambient,
            CredentialProvider::Delegated(_) => CredentialSource::Delegated,
        }
    }

    /// Load (and if needed renew) a credential carrying every required scope.
    pub async fn acquire(&self) -> Result<Credential, AuthError> {
        let credential = match self {
            CredentialProvider::Ambient(p) => p.acquire().await?,
            CredentialProvider::Delegated(p) => p.acquire().await?,
        };
        credential.verify_scopes()?;
        Ok(credential)
    }

    /// Renew `current`. The result is verified the same way `acquire` is.
    pub async fn refresh(&self, current: &Credential) -> Result<Credential, AuthError> {
        let credential = match self {
            CredentialProvider::Ambient(p) => p.refresh(current).await?,
            CredentialProvider::Delegated(p) => p.refresh(current).await?,
        };
        credential.verify_scopes()?;
        Ok(credential)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by broker and orchestrator tests.

    use super::*;
    use crate::scopes;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn full_scopes() -> Vec<String> {
        scopes::required_scopes().into_iter().map(String::from).collect()
    }

    /// Token endpoint that hands out numbered tokens and counts calls.
    pub struct CountingEndpoint {
        pub calls: AtomicUsize,
        pub scopes: Mutex<Vec<String>>,
        pub fail_with: Mutex<Option<String>>,
        pub delay: std::time::Duration,
    }

    impl CountingEndpoint {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                scopes: Mutex::new(full_scopes()),
                fail_with: Mutex::new(None),
                delay: std::time::Duration::from_millis(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenEndpoint for CountingEndpoint {
        async fn refresh(
            &self,
            _client: &ClientSecret,
            _refresh_token: &str,
        ) -> Result<OAuthTokens, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(OAuthTokens {
                access_token: format!("ya29.refreshed-{}", n),
                refresh_token: None,
                token_type: "Bearer".into(),
                expiry: Utc::now() + Duration::hours(1),
                scopes: self.scopes.lock().unwrap().clone(),
            })
        }
    }

    /// Ambient source returning a fixed scope set.
    pub struct FixedAmbient {
        pub scopes: Vec<String>,
        pub calls: AtomicUsize,
        pub lifetime: Duration,
    }

    impl FixedAmbient {
        pub fn new(scopes: Vec<String>) -> Self {
            Self {
                scopes,
                calls: AtomicUsize::new(0),
                lifetime: Duration::hours(1),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AmbientTokenSource for FixedAmbient {
        async fn fetch(&self) -> Result<AmbientToken, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AmbientToken {
                access_token: format!("ya29.ambient-{}", n),
                expiry: Utc::now() + self.lifetime,
                scopes: self.scopes.clone(),
            })
        }
    }
}
