use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::AppState;
use crate::user::is_admin;

/// The authenticated caller behind a `Bearer` token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub groups: Vec<String>,
    pub token_id: Uuid,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        is_admin(&self.groups)
    }

    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::admin_required())
        }
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let session = state
                .store
                .find_session(&token_hash)
                .await?
                .ok_or_else(ApiError::session_expired)?;

            // best-effort
            if let Err(e) = state.store.touch_access_token(session.token_id).await {
                tracing::debug!(error = %e, "failed to touch access token");
            }

            Ok(AuthContext {
                user_id: session.user.id,
                groups: session.user.groups,
                token_id: session.token_id,
            })
        }
    }
}
