mod credential_store;

use gdrive_core::OAuthToken;
use serde::{Deserialize, Serialize};

pub use credential_store::{CredentialStore, StorageError};

/// Persisted OAuth credentials. `expires_at` is a Unix timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl OAuthState {
    pub fn from_oauth_token(token: &OAuthToken) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|secs| now_unix().saturating_add(secs as i64)),
            scope: token.scope.clone(),
            token_type: Some(token.token_type.clone()),
        }
    }

    /// State after a refresh grant. Google omits the refresh token (and
    /// sometimes the scope) from refresh responses; those carry over.
    pub fn renewed_by(&self, token: &OAuthToken) -> Self {
        let fresh = Self::from_oauth_token(token);
        Self {
            refresh_token: fresh.refresh_token.or_else(|| self.refresh_token.clone()),
            scope: fresh.scope.or_else(|| self.scope.clone()),
            ..fresh
        }
    }

    /// True once the token is within `skew_secs` of expiring. Tokens without
    /// an expiry never count as expiring.
    pub fn expires_within(&self, skew_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now_unix().saturating_add(skew_secs))
    }
}

pub(crate) fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(refresh: Option<&str>, scope: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: "fresh".into(),
            token_type: "Bearer".into(),
            expires_in: Some(3600),
            refresh_token: refresh.map(Into::into),
            scope: scope.map(Into::into),
        }
    }

    fn cached() -> OAuthState {
        OAuthState {
            access_token: "stale".into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: Some(0),
            scope: Some("drive.readonly".into()),
            token_type: Some("Bearer".into()),
        }
    }

    #[test]
    fn renewal_keeps_refresh_token_and_scope_when_omitted() {
        let renewed = cached().renewed_by(&token(None, None));
        assert_eq!(renewed.access_token, "fresh");
        assert_eq!(renewed.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(renewed.scope.as_deref(), Some("drive.readonly"));
        assert!(!renewed.expires_within(60));
    }

    #[test]
    fn renewal_takes_rotated_refresh_token() {
        let renewed = cached().renewed_by(&token(Some("refresh-2"), Some("other")));
        assert_eq!(renewed.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(renewed.scope.as_deref(), Some("other"));
    }

    #[test]
    fn expiry_window() {
        assert!(cached().expires_within(0));
        let never = OAuthState {
            expires_at: None,
            ..cached()
        };
        assert!(!never.expires_within(i64::MAX));
    }
}
