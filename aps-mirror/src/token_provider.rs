use std::sync::Arc;
use std::time::Duration;

use aps_core::{OAuthClient, OAuthError, OAuthToken};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::storage::{MirrorStore, StoreError, TokenKind, TokenRecord, now_unix};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("{0} is not stored")]
    Missing(TokenKind),
    #[error("oauth request failed: {0}")]
    OAuth(#[from] OAuthError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Hands out APS access tokens backed by the `tokens` table.
///
/// Check and refresh run under one lock, so callers that arrive while a
/// refresh is in flight see the rotated token instead of spending the old
/// refresh token a second time.
pub struct TokenProvider {
    store: Arc<MirrorStore>,
    oauth_base_url: String,
    refresh_margin_secs: i64,
    scope: Option<String>,
    refresh_lock: Mutex<()>,
}

impl TokenProvider {
    pub fn new(
        store: Arc<MirrorStore>,
        oauth_base_url: impl Into<String>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            store,
            oauth_base_url: oauth_base_url.into(),
            refresh_margin_secs: i64::try_from(refresh_margin.as_secs()).unwrap_or(i64::MAX),
            scope: None,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Space-separated APS scopes requested at login and on every refresh.
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub async fn valid_access_token(&self) -> Result<String, TokenError> {
        self.valid_access_token_at(now_unix()).await
    }

    /// Same as [`valid_access_token`](Self::valid_access_token) with an
    /// explicit clock, in unix seconds.
    pub async fn valid_access_token_at(&self, now: i64) -> Result<String, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        let token = self.stored(TokenKind::AccessToken).await?;
        if needs_refresh(&token, now, self.refresh_margin_secs) {
            tracing::info!(
                age_secs = now - token.updated_at,
                expires_in = token.expires_in,
                "access token is close to expiry, refreshing"
            );
            return self.refresh_locked().await;
        }
        Ok(token.value)
    }

    pub async fn refresh_now(&self) -> Result<String, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    pub async fn authorize_url(
        &self,
        redirect_uri: &str,
        scope: Option<&str>,
    ) -> Result<Url, TokenError> {
        let client = self.oauth_client().await?;
        let scope = scope.or(self.scope.as_deref());
        Ok(client.authorize_url(redirect_uri, scope, None)?)
    }

    /// Trades an authorization code for the first access and refresh tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        let client = self.oauth_client().await?;
        let token = client.exchange_code(code, redirect_uri).await?;
        self.persist(&token).await?;
        tracing::info!("access token stored from authorization code");
        Ok(token.access_token)
    }

    async fn refresh_locked(&self) -> Result<String, TokenError> {
        let refresh_token = self.stored(TokenKind::RefreshToken).await?;
        let client = self.oauth_client().await?;
        let token = client
            .refresh_token(&refresh_token.value, self.scope.as_deref())
            .await?;
        self.persist(&token).await?;
        tracing::info!(
            expires_in = token.expires_in,
            rotated = token.refresh_token.is_some(),
            "access token refreshed"
        );
        Ok(token.access_token)
    }

    async fn persist(&self, token: &OAuthToken) -> Result<(), TokenError> {
        let expires_in = token.expires_in.and_then(|secs| i64::try_from(secs).ok());
        self.store
            .upsert_token(TokenKind::AccessToken, &token.access_token, expires_in)
            .await?;
        if let Some(refresh_token) = &token.refresh_token {
            self.store
                .upsert_token(TokenKind::RefreshToken, refresh_token, None)
                .await?;
        }
        Ok(())
    }

    async fn oauth_client(&self) -> Result<OAuthClient, TokenError> {
        let client_id = self.stored(TokenKind::ClientId).await?;
        let client_secret = self.stored(TokenKind::ClientSecret).await?;
        Ok(OAuthClient::with_base_url(
            &self.oauth_base_url,
            client_id.value,
            client_secret.value,
        )?)
    }

    async fn stored(&self, kind: TokenKind) -> Result<TokenRecord, TokenError> {
        self.store
            .get_token(kind)
            .await?
            .ok_or(TokenError::Missing(kind))
    }
}

/// A token without a recorded lifetime never expires from our point of view.
fn needs_refresh(token: &TokenRecord, now: i64, margin_secs: i64) -> bool {
    let Some(expires_in) = token.expires_in else {
        return false;
    };
    now.saturating_sub(token.updated_at) > expires_in.saturating_sub(margin_secs)
}
