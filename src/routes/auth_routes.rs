use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{generate_access_token, hash_access_token, token_expiry, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiMessage, ApiOk, AppState},
    store::StoreError,
    user::User,
    validation::{FieldErrors, clean},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub groups: Vec<String>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            groups: u.groups,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub user: UserProfile,
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginData>>, ApiError> {
    let mut errors = FieldErrors::new();
    let email = clean(req.email.as_deref());
    let password = req.password.unwrap_or_default();
    if email.is_none() {
        errors.add("email", "Email is required");
    }
    if password.is_empty() {
        errors.add("password", "Password is required");
    }
    errors.into_result()?;
    let email = email.unwrap_or_default();

    let creds = state
        .store
        .find_credentials_by_email(&email)
        .await?
        .ok_or_else(ApiError::invalid_credentials)?;

    if !creds.user.active || !verify_password(&password, &creds.password_hash) {
        tracing::info!(user_id = creds.user.id, "login rejected");
        return Err(ApiError::invalid_credentials());
    }

    let token = generate_access_token();
    let expires_at = token_expiry(Utc::now(), state.session_ttl_hours);
    state
        .store
        .create_access_token(creds.user.id, &hash_access_token(&token), expires_at)
        .await?;

    tracing::info!(user_id = creds.user.id, "user logged in");
    Ok(Json(ApiOk::with_message(
        LoginData {
            user: creds.user.into(),
            token,
        },
        "Login successful",
    )))
}

/// Revokes every token of the caller, not only the one presented.
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiMessage>, ApiError> {
    let revoked = state.store.revoke_user_tokens(auth.user_id).await?;
    tracing::info!(user_id = auth.user_id, token_id = %auth.token_id, revoked, "user logged out");
    Ok(Json(ApiMessage::new("Logged out successfully")))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    let user = state
        .store
        .get_user(auth.user_id)
        .await?
        .ok_or(StoreError::NotFound("user"))?;
    Ok(Json(ApiOk::new(user.into())))
}
