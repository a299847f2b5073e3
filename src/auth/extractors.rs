use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::{
    auth::{jwt::JwtKeys, repo_types::{Identity, Role}},
    error::AppError,
    policy,
};

/// Extracts and validates the bearer access token.
pub struct AuthUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Access token required"))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::unauthorized("Access token required"))?;

        let keys = JwtKeys::from_ref(state);
        match keys.verify_access(token) {
            Ok(claims) => Ok(AuthUser(claims.identity())),
            Err(e) => {
                warn!(error = %e, "invalid or expired token");
                Err(AppError::unauthorized("Invalid or expired token"))
            }
        }
    }
}

/// An authenticated user holding the DOCTOR role.
pub struct DoctorUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for DoctorUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        policy::require_role(&identity, Role::Doctor)?;
        Ok(DoctorUser(identity))
    }
}

/// An authenticated user holding the PATIENT role.
pub struct PatientUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for PatientUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        policy::require_role(&identity, Role::Patient)?;
        Ok(PatientUser(identity))
    }
}
