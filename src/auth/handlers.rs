use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, UpdateProfileRequest},
        extractors::AuthUser,
        repo_types::PublicUser,
        services::MAX_AVATAR_BYTES,
        tokens::TokenPair,
    },
    error::{AppError, AppResult},
    extract::Json,
    response::ApiResponse,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/profile", get(get_profile).put(update_profile))
        .route(
            "/auth/profile/avatar",
            post(upload_avatar)
                .delete(delete_avatar)
                // multipart framing on top of the file itself
                .layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + 64 * 1024)),
        )
}

/// POST /auth/register
#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let res = state.auth.register(payload).await?;
    Ok(ApiResponse::created(res).with_message("User registered successfully"))
}

/// POST /auth/login
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let res = state.auth.login(payload).await?;
    Ok(ApiResponse::ok(res).with_message("Login successful"))
}

/// POST /auth/refresh
#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<ApiResponse<TokenPair>> {
    let pair = state.auth.refresh(&payload.refresh_token).await?;
    Ok(ApiResponse::ok(pair))
}

/// POST /auth/logout
#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<ApiResponse<()>> {
    state.auth.logout(&payload.refresh_token).await?;
    Ok(ApiResponse::message("Logged out successfully"))
}

#[instrument(skip(state, identity), fields(user_id = %identity.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> AppResult<ApiResponse<PublicUser>> {
    Ok(ApiResponse::ok(state.auth.profile(identity.id).await?))
}

#[instrument(skip(state, identity, payload), fields(user_id = %identity.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = state.auth.update_profile(identity.id, payload).await?;
    Ok(ApiResponse::ok(user).with_message("Profile updated successfully"))
}

/// POST /auth/profile/avatar (multipart, field `avatar`)
#[instrument(skip(state, identity, mp), fields(user_id = %identity.id))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    mut mp: Multipart,
) -> AppResult<ApiResponse<PublicUser>> {
    while let Some(field) = mp.next_field().await? {
        if field.name() != Some("avatar") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = field.bytes().await?;
        info!(size = data.len(), %content_type, "avatar upload");
        let user = state
            .auth
            .set_avatar(identity.id, data, &content_type)
            .await?;
        return Ok(ApiResponse::ok(user).with_message("Avatar uploaded successfully"));
    }
    Err(AppError::bad_request("No file uploaded"))
}

#[instrument(skip(state, identity), fields(user_id = %identity.id))]
pub async fn delete_avatar(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = state.auth.remove_avatar(identity.id).await?;
    Ok(ApiResponse::ok(user).with_message("Avatar removed successfully"))
}
