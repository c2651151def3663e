use crate::models::AppState;
use axum::Router;

pub mod area_routes;
pub mod auth_routes;
pub mod enquiry_routes;
pub mod health_routes;
pub mod patient_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth_routes::router())
        .nest("/api/enquiries", enquiry_routes::router())
        .nest("/api/patients", patient_routes::router())
        .nest("/api/users", user_routes::router())
        .nest("/api", area_routes::router())
        .merge(health_routes::router())
        .with_state(state)
}
