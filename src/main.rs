mod areas;
mod auth;
mod config;
mod conversion;
mod enquiry;
mod middleware;
mod patient;
mod user;
mod validation;

mod db;
mod error;
mod models;
mod routes;
mod store;

use std::sync::Arc;

use crate::{
    config::{BootstrapAdmin, Config, StoreBackend},
    models::AppState,
    store::{ClinicStore, MemoryStore, PgStore},
    user::NewUser,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;

    let store: Arc<dyn ClinicStore> = match cfg.store_backend {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
            let pool = db::connect_pg(url).await?;
            if cfg.run_migrations {
                db::run_migrations(&pool).await?;
            }
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(admin) = &cfg.bootstrap_admin {
        bootstrap_admin(store.as_ref(), admin).await?;
    }

    let state = AppState::new(
        store,
        cfg.conversion_mode,
        cfg.session_ttl_hours,
        cfg.environment.clone(),
    );

    // The admin panel, the public enquiry form and the WebView all call the API cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let conversion_mode = state.conversion.mode();
    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(
        environment = %cfg.environment,
        conversion_mode = ?conversion_mode,
        "Listening on http://{}",
        cfg.bind_addr
    );
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Creates an active superadmin unless a user with that email already exists.
async fn bootstrap_admin(store: &dyn ClinicStore, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    if store.find_credentials_by_email(&admin.email).await?.is_some() {
        return Ok(());
    }

    let username = admin
        .email
        .split('@')
        .next()
        .filter(|local| local.chars().count() >= 3)
        .unwrap_or("superadmin")
        .to_string();
    let password_hash = auth::hash_password(&admin.password).map_err(anyhow::Error::msg)?;

    let user = store
        .create_user(NewUser {
            username,
            email: admin.email.to_lowercase(),
            password_hash,
            active: true,
            groups: vec!["superadmin".to_string()],
        })
        .await?;
    tracing::info!(user_id = user.id, email = %user.email, "bootstrap superadmin created");
    Ok(())
}
