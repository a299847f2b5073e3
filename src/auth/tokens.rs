use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    auth::{claims::Claims, jwt::JwtKeys, repo::TokenRepo, repo_types::Identity},
    error::{AppError, AppResult},
};

const INVALID_REFRESH: &str = "Invalid or expired refresh token";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues access/refresh tokens and owns the refresh-token lifecycle.
#[derive(Clone)]
pub struct TokenService {
    keys: JwtKeys,
    store: Arc<dyn TokenRepo>,
}

impl TokenService {
    pub fn new(keys: JwtKeys, store: Arc<dyn TokenRepo>) -> Self {
        Self { keys, store }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub fn issue_access(&self, identity: &Identity) -> AppResult<String> {
        Ok(self.keys.sign_access(identity)?)
    }

    /// Signs a refresh token and persists it.
    pub async fn issue_refresh(&self, identity: &Identity) -> AppResult<String> {
        let token = self.keys.sign_refresh(identity)?;
        self.store
            .insert(identity.id, &token, self.keys.refresh_expiry())
            .await?;
        Ok(token)
    }

    pub async fn issue_pair(&self, identity: &Identity) -> AppResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access(identity)?,
            refresh_token: self.issue_refresh(identity).await?,
        })
    }

    pub fn verify_refresh(&self, token: &str) -> AppResult<Claims> {
        self.keys.verify_refresh(token).map_err(|e| {
            warn!(error = %e, "refresh token rejected");
            AppError::unauthorized(INVALID_REFRESH)
        })
    }

    /// Single-use exchange of `old` for a fresh pair. Every failure mode
    /// answers the same `Unauthorized`.
    #[instrument(skip(self, old), fields(user_id = %identity.id))]
    pub async fn rotate(&self, old: &str, identity: &Identity) -> AppResult<TokenPair> {
        let claims = self.verify_refresh(old)?;
        if claims.sub != identity.id {
            warn!("refresh token subject mismatch");
            return Err(AppError::unauthorized(INVALID_REFRESH));
        }

        let refresh_token = self.keys.sign_refresh(identity)?;
        let rotated = self
            .store
            .rotate(old, identity.id, &refresh_token, self.keys.refresh_expiry())
            .await?;
        if !rotated {
            warn!("refresh token missing, expired or already used");
            return Err(AppError::unauthorized(INVALID_REFRESH));
        }

        info!("refresh token rotated");
        Ok(TokenPair {
            access_token: self.issue_access(identity)?,
            refresh_token,
        })
    }

    /// Deletes the persisted token; unknown tokens are ignored.
    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        let n = self.store.revoke(token).await?;
        info!(revoked = n, "refresh token revoked");
        Ok(())
    }

    pub async fn purge_expired(&self, identity: &Identity) -> AppResult<u64> {
        self.store.purge_expired(identity.id).await
    }
}
