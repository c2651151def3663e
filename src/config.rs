use std::env;

use anyhow::{anyhow, bail};

use crate::conversion::ConversionMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub environment: String,
    pub conversion_mode: ConversionMode,
    pub run_migrations: bool,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Credentials for the superadmin created on an empty user table.
#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Err(_) | Ok("postgres") => StoreBackend::Postgres,
            Ok("memory") => StoreBackend::Memory,
            Ok(other) => bail!("unknown STORE_BACKEND: {other} (expected postgres|memory)"),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("DATABASE_URL is required when STORE_BACKEND=postgres"));
        }

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);
        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let conversion_mode = match env::var("CONVERSION_MODE") {
            Ok(raw) => raw
                .parse::<ConversionMode>()
                .map_err(|e| anyhow!("CONVERSION_MODE: {e}"))?,
            Err(_) => ConversionMode::Atomic,
        };

        let run_migrations = env::var("RUN_MIGRATIONS")
            .map(|s| !matches!(s.as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let bootstrap_admin = match (
            env::var("BOOTSTRAP_ADMIN_EMAIL"),
            env::var("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) if !email.trim().is_empty() => Some(BootstrapAdmin {
                email: email.trim().to_string(),
                password,
            }),
            _ => None,
        };

        Ok(Self {
            store_backend,
            database_url,
            bind_addr,
            session_ttl_hours,
            environment,
            conversion_mode,
            run_migrations,
            bootstrap_admin,
        })
    }
}
