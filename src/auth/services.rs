use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest, UpdateProfileRequest},
        password::CredentialStore,
        repo::UserRepo,
        repo_types::{Identity, NewUser, PublicUser, UserChanges},
        tokens::{TokenPair, TokenService},
    },
    error::{AppError, AppResult},
    storage::{ext_from_mime, StorageClient},
};

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const EMAIL_TAKEN: &str = "Email already registered";
const EMAIL_IN_USE: &str = "Email already in use";

/// Registration, login, session and profile operations.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepo>,
    pub tokens: TokenService,
    credentials: Arc<dyn CredentialStore>,
    storage: Arc<dyn StorageClient>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepo>,
        tokens: TokenService,
        credentials: Arc<dyn CredentialStore>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            users,
            tokens,
            credentials,
            storage,
        }
    }

    /// Any existing account with the email is a conflict, whatever its role.
    #[instrument(skip(self, req), fields(email = %req.email, role = ?req.role))]
    pub async fn register(&self, mut req: RegisterRequest) -> AppResult<AuthResponse> {
        req.validate()?;

        if self.users.find_by_email(&req.email).await?.is_some() {
            warn!("email already registered");
            return Err(AppError::conflict(EMAIL_TAKEN));
        }

        let password_hash = self.credentials.hash(&req.password)?;
        let user = self
            .users
            .create(NewUser {
                email: req.email,
                password_hash,
                name: req.name.trim().to_string(),
                role: req.role,
                phone: req.phone.filter(|p| !p.trim().is_empty()),
                doctor_id: None,
            })
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::conflict(EMAIL_TAKEN),
                other => other,
            })?;

        let identity = Identity::from(&user);
        let TokenPair {
            access_token,
            refresh_token,
        } = self.tokens.issue_pair(&identity).await?;

        info!(user_id = %user.id, "user registered");
        Ok(AuthResponse {
            user: user.into(),
            access_token,
            refresh_token,
        })
    }

    /// Unknown email and wrong password fail identically.
    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn login(&self, mut req: LoginRequest) -> AppResult<AuthResponse> {
        req.validate()?;

        let Some(user) = self.users.find_by_email(&req.email).await? else {
            warn!("login unknown email");
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        };

        if !self.credentials.verify(&req.password, &user.password_hash) {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        }

        let identity = Identity::from(&user);
        match self.tokens.purge_expired(&identity).await {
            Ok(n) if n > 0 => info!(user_id = %user.id, purged = n, "expired refresh tokens purged"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "refresh token purge failed"),
        }
        let TokenPair {
            access_token,
            refresh_token,
        } = self.tokens.issue_pair(&identity).await?;

        info!(user_id = %user.id, "user logged in");
        Ok(AuthResponse {
            user: user.into(),
            access_token,
            refresh_token,
        })
    }

    /// Exchanges a refresh token for a new pair using the user's current
    /// email and role.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let claims = self.tokens.verify_refresh(refresh_token)?;
        let Some(user) = self.users.find_by_id(claims.sub).await? else {
            warn!(user_id = %claims.sub, "refresh for missing user");
            return Err(AppError::unauthorized("Invalid or expired refresh token"));
        };
        self.tokens.rotate(refresh_token, &Identity::from(&user)).await
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn logout(&self, refresh_token: &str) -> AppResult<()> {
        self.tokens.revoke(refresh_token).await
    }

    pub async fn profile(&self, user_id: Uuid) -> AppResult<PublicUser> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(PublicUser::from)
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    #[instrument(skip(self, req))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        mut req: UpdateProfileRequest,
    ) -> AppResult<PublicUser> {
        req.validate()?;

        if let Some(email) = &req.email {
            if let Some(other) = self.users.find_by_email(email).await? {
                if other.id != user_id {
                    return Err(AppError::conflict(EMAIL_IN_USE));
                }
            }
        }

        let password_hash = match req.password.as_deref() {
            Some(pw) if !pw.trim().is_empty() => Some(self.credentials.hash(pw)?),
            _ => None,
        };

        let changes = UserChanges {
            email: req.email,
            name: req.name.map(|n| n.trim().to_string()),
            phone: req.phone.map(|p| Some(p).filter(|p| !p.trim().is_empty())),
            password_hash,
            avatar: None,
        };
        let user = self.users.update(user_id, changes).await.map_err(|e| match e {
            AppError::Conflict(_) => AppError::conflict(EMAIL_IN_USE),
            other => other,
        })?;
        info!(%user_id, "profile updated");
        Ok(user.into())
    }

    /// Stores an image as the user's avatar, replacing any previous one.
    #[instrument(skip(self, body), fields(size = body.len()))]
    pub async fn set_avatar(
        &self,
        user_id: Uuid,
        body: Bytes,
        content_type: &str,
    ) -> AppResult<PublicUser> {
        if !content_type.starts_with("image/") {
            return Err(AppError::bad_request("Only image files are allowed"));
        }
        if body.is_empty() {
            return Err(AppError::bad_request("Avatar file is empty"));
        }
        if body.len() > MAX_AVATAR_BYTES {
            return Err(AppError::bad_request("Avatar exceeds 5 MB"));
        }

        let previous = self.profile(user_id).await?.avatar;

        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let ext = ext_from_mime(content_type).unwrap_or("bin");
        let key = format!("avatars/avatar-{}-{}.{}", user_id, millis, ext);
        self.storage
            .put_object(&key, body, content_type)
            .await
            .map_err(|e| AppError::Internal(e.context("store avatar")))?;

        let changes = UserChanges {
            avatar: Some(Some(self.storage.public_url(&key))),
            ..Default::default()
        };
        let user = self.users.update(user_id, changes).await?;

        if let Some(old) = previous {
            self.discard_file(&old).await;
        }
        info!(%user_id, %key, "avatar stored");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn remove_avatar(&self, user_id: Uuid) -> AppResult<PublicUser> {
        let previous = self.profile(user_id).await?.avatar;
        let changes = UserChanges {
            avatar: Some(None),
            ..Default::default()
        };
        let user = self.users.update(user_id, changes).await?;
        if let Some(old) = previous {
            self.discard_file(&old).await;
        }
        Ok(user.into())
    }

    async fn discard_file(&self, url: &str) {
        let Some(key) = self.storage.key_from_url(url) else {
            return;
        };
        if let Err(e) = self.storage.delete_object(key).await {
            error!(error = %e, %key, "failed to delete old avatar");
        }
    }
}
