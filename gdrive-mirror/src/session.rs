use gdrive_core::OAuthClient;
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{CredentialStore, OAuthState, StorageError};

/// Renew this long before the recorded expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("token cannot be renewed: {0}")]
    CannotRenew(&'static str),
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] gdrive_core::OAuthError),
    #[error("failed to persist renewed credentials: {0}")]
    Storage(#[from] StorageError),
}

/// Cached credentials together with the means to renew them.
struct Renewal {
    oauth: OAuthClient,
    store: CredentialStore,
}

/// Access token for one run. A cached session renews through OAuth and
/// writes every renewal back to its credential store before handing the
/// new token out; a fixed session only ever returns its token.
pub struct Session {
    state: OAuthState,
    renewal: Option<Renewal>,
}

impl Session {
    pub fn fixed(access_token: impl Into<String>) -> Self {
        Self {
            state: OAuthState {
                access_token: access_token.into(),
                refresh_token: None,
                expires_at: None,
                scope: None,
                token_type: None,
            },
            renewal: None,
        }
    }

    /// `oauth` is `None` when no client secrets are available; the cached
    /// token is then used as long as the API accepts it.
    pub fn cached(store: CredentialStore, state: OAuthState, oauth: Option<OAuthClient>) -> Self {
        Self {
            state,
            renewal: oauth.map(|oauth| Renewal { oauth, store }),
        }
    }

    pub fn state(&self) -> &OAuthState {
        &self.state
    }

    pub fn can_renew(&self) -> bool {
        self.renewal.is_some() && self.state.refresh_token.is_some()
    }

    /// Current access token, renewed first when it is about to expire.
    pub async fn access_token(&mut self) -> Result<String, SessionError> {
        if self.state.expires_within(EXPIRY_SKEW_SECS) {
            debug!("access token about to expire");
            return self.renew().await;
        }
        Ok(self.state.access_token.clone())
    }

    pub async fn renew(&mut self) -> Result<String, SessionError> {
        let Some(renewal) = &self.renewal else {
            return Err(SessionError::CannotRenew("no oauth client configured"));
        };
        let Some(refresh_token) = self.state.refresh_token.as_deref() else {
            return Err(SessionError::CannotRenew("no refresh token saved"));
        };
        let token = renewal.oauth.refresh_token(refresh_token).await?;
        let renewed = self.state.renewed_by(&token);
        renewal.store.save(&renewed)?;
        info!(path = %renewal.store.path().display(), "access token renewed");
        self.state = renewed;
        Ok(self.state.access_token.clone())
    }
}
