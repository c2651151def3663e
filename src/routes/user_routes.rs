// src/routes/user_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use crate::{
    auth::hash_password,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiMessage, ApiOk, ApiPage, AppState, PageRequest},
    store::StoreError,
    user::{CreateUserRequest, KNOWN_GROUPS, NewUser, UpdateUserRequest, User, UserChanges},
    validation::clean,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route(
            "/{id}",
            get(get_user)
                .put(update_user)
                .patch(update_user)
                .delete(delete_user),
        )
}

fn hash_or_internal(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(ApiError::Internal)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub group: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListUsersQuery>,
) -> Result<Json<ApiPage<User>>, ApiError> {
    auth.ensure_admin()?;

    let group = clean(q.group.as_deref());
    if let Some(g) = &group {
        if !KNOWN_GROUPS.contains(&g.as_str()) {
            return Err(ApiError::field(
                "group",
                format!("group must be one of: {}", KNOWN_GROUPS.join(", ")),
            ));
        }
    }

    let page = PageRequest::from_query(q.page, q.per_page);
    let (users, total) = state
        .store
        .list_users(group.as_deref(), page.limit(), page.offset())
        .await?;
    Ok(Json(ApiPage::new(users, page, total)))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<User>>, ApiError> {
    auth.ensure_admin()?;
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or(StoreError::NotFound("user"))?;
    Ok(Json(ApiOk::new(user)))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiOk<User>>), ApiError> {
    auth.ensure_admin()?;
    let valid = req.validate()?;

    let user = state
        .store
        .create_user(NewUser {
            username: valid.username,
            email: valid.email,
            password_hash: hash_or_internal(&valid.password)?,
            active: true,
            groups: valid.groups,
        })
        .await?;

    tracing::info!(user_id = user.id, created_by = auth.user_id, "user created");
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::with_message(user, "User created successfully")),
    ))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<ApiOk<User>>, ApiError> {
    auth.ensure_admin()?;
    let valid = req.validate()?;

    let password_hash = match valid.password.as_deref() {
        Some(pw) => Some(hash_or_internal(pw)?),
        None => None,
    };
    let deactivated = valid.active == Some(false);

    let user = state
        .store
        .update_user(
            id,
            &UserChanges {
                username: valid.username,
                email: valid.email,
                password_hash,
                active: valid.active,
                groups: valid.groups,
            },
        )
        .await?;

    if deactivated {
        state.store.revoke_user_tokens(id).await?;
    }
    Ok(Json(ApiOk::with_message(user, "User updated successfully")))
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> Result<Json<ApiMessage>, ApiError> {
    auth.ensure_admin()?;
    if id == auth.user_id {
        return Err(ApiError::Forbidden("Cannot delete your own account".into()));
    }

    state.store.soft_delete_user(id).await?;
    let revoked = state.store.revoke_user_tokens(id).await?;

    tracing::info!(user_id = id, deleted_by = auth.user_id, revoked, "user deleted");
    Ok(Json(ApiMessage::new("User deleted successfully")))
}
