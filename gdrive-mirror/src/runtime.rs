use anyhow::{Context, anyhow};
use gdrive_core::{ApiErrorClass, ClientSecrets, DriveClient, DriveError, OAuthClient};
use tracing::{info, warn};

use crate::config::MirrorConfig;
use crate::oauth_flow::OAuthFlow;
use crate::session::Session;
use crate::storage::{CredentialStore, OAuthState, StorageError};
use crate::sync::engine::{Reconciler, SyncReport};
use crate::sync::index::MetadataIndex;
use crate::sync::lock::RunLock;
use crate::sync::transfer::TransferClient;

/// One mirror run: lock, authenticate, list, reconcile, prune, unlock.
pub struct MirrorRuntime {
    config: MirrorConfig,
    static_token: Option<String>,
    drive_base_url: Option<String>,
    oauth_base_url: Option<String>,
}

impl MirrorRuntime {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            config,
            static_token: std::env::var("GDRIVE_TOKEN").ok().filter(|t| !t.is_empty()),
            drive_base_url: None,
            oauth_base_url: None,
        }
    }

    /// Uses `token` as-is instead of the credential cache.
    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.static_token = Some(token.into());
        self
    }

    pub fn with_base_urls(mut self, drive: &str, oauth: &str) -> Self {
        self.drive_base_url = Some(drive.to_string());
        self.oauth_base_url = Some(oauth.to_string());
        self
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub async fn run(&self) -> anyhow::Result<SyncReport> {
        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .with_context(|| {
                format!("failed to create work dir at {}", self.config.work_dir.display())
            })?;
        let lock = RunLock::acquire(self.config.lock_path())?;
        info!(work_dir = %self.config.work_dir.display(), "lock acquired");

        let outcome = tokio::select! {
            res = self.sync_once() => res,
            signal = shutdown_signal() => Err(anyhow!("interrupted by {signal}")),
        };
        let released = lock.release();
        let report = outcome?;
        released.context("failed to remove lock marker")?;
        Ok(report)
    }

    async fn sync_once(&self) -> anyhow::Result<SyncReport> {
        let client = self.connect().await?;
        let policy = self.config.list_retry();
        let page_size = self.config.page_size;
        let files = policy
            .run(
                "listing",
                || client.list_all_files(page_size),
                DriveError::is_retryable,
            )
            .await
            .context("failed to list remote files")?;
        info!(entries = files.len(), "remote listing complete");

        let index = MetadataIndex::from_drive_files(files).context("remote listing is inconsistent")?;
        let transfer = TransferClient::new(client.access_token());
        let reconciler = Reconciler::new(self.config.sync_settings(), transfer);
        let report = reconciler
            .run(&index)
            .await
            .context("sync aborted")?;
        Ok(report)
    }

    async fn connect(&self) -> anyhow::Result<DriveClient> {
        let mut session = match &self.static_token {
            Some(token) => Session::fixed(token.clone()),
            None => {
                let store = CredentialStore::new(&self.config.credentials_path);
                let state = match store.load() {
                    Ok(state) => state,
                    Err(StorageError::TokenNotFound(_)) => self.authenticate_and_store(&store).await?,
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("failed to read {}", store.path().display())
                        });
                    }
                };
                Session::cached(store, state, self.oauth_client()?)
            }
        };
        self.fetch_about_with_retry(&mut session)
            .await
            .context("failed to reach Google Drive")
    }

    async fn authenticate_and_store(&self, store: &CredentialStore) -> anyhow::Result<OAuthState> {
        let secrets = self.client_secrets()?.with_context(|| {
            format!(
                "no saved credentials and no client secrets at {}",
                self.config.client_secrets_path.display()
            )
        })?;
        let flow = OAuthFlow::new(self.build_oauth_client(&secrets)?, secrets.redirect_uri());
        let token = flow.authenticate().await.context("authorization failed")?;
        let state = OAuthState::from_oauth_token(&token);
        store.save(&state).context("failed to save credentials")?;
        info!(path = %store.path().display(), "credentials saved");
        Ok(state)
    }

    fn client_secrets(&self) -> anyhow::Result<Option<ClientSecrets>> {
        let path = &self.config.client_secrets_path;
        if !path.exists() {
            return Ok(None);
        }
        let secrets = ClientSecrets::from_file(path)
            .with_context(|| format!("failed to load client secrets from {}", path.display()))?;
        Ok(Some(secrets))
    }

    fn oauth_client(&self) -> anyhow::Result<Option<OAuthClient>> {
        match self.client_secrets()? {
            Some(secrets) => Ok(Some(self.build_oauth_client(&secrets)?)),
            None => Ok(None),
        }
    }

    fn build_oauth_client(&self, secrets: &ClientSecrets) -> anyhow::Result<OAuthClient> {
        Ok(match self.oauth_base_url.as_deref() {
            Some(url) => OAuthClient::with_base_url(url, &secrets.client_id, &secrets.client_secret)
                .context("invalid oauth base url/config")?,
            None => OAuthClient::from_secrets(secrets).context("invalid oauth config")?,
        })
    }

    async fn fetch_about_with_retry(&self, session: &mut Session) -> anyhow::Result<DriveClient> {
        let token = session
            .access_token()
            .await
            .context("failed to resolve valid access token")?;
        let client = self.build_client(&token)?;
        let (client, about) = match client.get_about().await {
            Ok(about) => (client, about),
            Err(err)
                if matches!(err.classification(), Some(ApiErrorClass::Auth))
                    && session.can_renew() =>
            {
                warn!(%err, "access token rejected, renewing");
                let renewed = session
                    .renew()
                    .await
                    .context("failed to renew token after 401")?;
                let retry_client = self.build_client(&renewed)?;
                let about = retry_client.get_about().await?;
                (retry_client, about)
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(user) = about.user {
            info!(
                user = user.email_address.as_deref().unwrap_or("unknown"),
                "authenticated"
            );
        }
        Ok(client)
    }

    fn build_client(&self, token: &str) -> Result<DriveClient, DriveError> {
        match self.drive_base_url.as_deref() {
            Some(url) => DriveClient::with_base_url(url, token.to_string()),
            None => DriveClient::new(token.to_string()),
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM; never resolves when no handler
/// can be installed.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => match res {
                        Ok(()) => return "SIGINT",
                        Err(err) => warn!(%err, "cannot install interrupt handler"),
                    },
                    _ = term.recv() => return "SIGTERM",
                }
                term.recv().await;
                return "SIGTERM";
            }
            Err(err) => warn!(%err, "cannot install SIGTERM handler"),
        }
    }
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(err) => {
            warn!(%err, "cannot install interrupt handler");
            std::future::pending().await
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
