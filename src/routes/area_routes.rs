use axum::{
    Json, Router,
    extract::Query,
    routing::get,
};
use serde::Deserialize;

use crate::{
    areas::{Area, search_areas},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/chennai-areas", get(chennai_areas))
}

#[derive(Debug, Default, Deserialize)]
pub struct AreaQuery {
    pub q: Option<String>,
}

pub async fn chennai_areas(
    _auth: AuthContext,
    Query(query): Query<AreaQuery>,
) -> Result<Json<ApiOk<Vec<Area>>>, ApiError> {
    let areas = search_areas(query.q.as_deref().unwrap_or(""));
    Ok(Json(ApiOk::new(areas)))
}
