use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use url::Url;

use gdrive_core::{ClientSecrets, DRIVE_READONLY_SCOPE, OAuthClient, OAuthToken};

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("oauth error: {0}")]
    OAuth(#[from] gdrive_core::OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authorization code missing")]
    MissingCode,
    #[error("authorization state mismatch")]
    StateMismatch,
}

/// Interactive installed-app authorization: print the consent URL, read the
/// verification code the user pastes back, exchange it for tokens.
pub struct OAuthFlow {
    client: OAuthClient,
    redirect_uri: String,
    scope: String,
}

impl OAuthFlow {
    pub fn new(client: OAuthClient, redirect_uri: impl Into<String>) -> Self {
        Self {
            client,
            redirect_uri: redirect_uri.into(),
            scope: DRIVE_READONLY_SCOPE.to_string(),
        }
    }

    pub fn from_secrets(secrets: &ClientSecrets) -> Result<Self, OAuthFlowError> {
        let client = OAuthClient::from_secrets(secrets)?;
        Ok(Self::new(client, secrets.redirect_uri()))
    }

    pub fn authorization_url(&self, state: &str) -> Result<Url, OAuthFlowError> {
        Ok(self
            .client
            .authorize_url(&self.redirect_uri, &self.scope, Some(state))?)
    }

    pub async fn authenticate(&self) -> Result<OAuthToken, OAuthFlowError> {
        let stdin = BufReader::new(tokio::io::stdin());
        self.authenticate_with(stdin, tokio::io::stderr()).await
    }

    pub async fn authenticate_with<R, W>(
        &self,
        mut input: R,
        mut prompt: W,
    ) -> Result<OAuthToken, OAuthFlowError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let state = random_state();
        let url = self.authorization_url(&state)?;
        prompt
            .write_all(
                format!("Open this URL in your browser:\n{url}\nEnter the verification code: ")
                    .as_bytes(),
            )
            .await?;
        prompt.flush().await?;

        let mut line = String::new();
        input.read_line(&mut line).await?;
        let code = parse_pasted_code(&line, &state)?;
        Ok(self.client.exchange_code(&code, &self.redirect_uri).await?)
    }
}

/// Accepts either the bare code or the full redirect URL the browser landed
/// on. A URL carrying a `state` must carry ours.
fn parse_pasted_code(raw: &str, expected_state: &str) -> Result<String, OAuthFlowError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(OAuthFlowError::MissingCode);
    }
    let Ok(url) = Url::parse(raw) else {
        return Ok(raw.to_string());
    };
    if url.cannot_be_a_base() {
        return Ok(raw.to_string());
    }
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "state" if value != expected_state => return Err(OAuthFlowError::StateMismatch),
            _ => {}
        }
    }
    code.ok_or(OAuthFlowError::MissingCode)
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}
