use std::str::FromStr;

use serde::Deserialize;

/// Which `NotificationStore` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow::anyhow!(
                "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            )),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Notification store implementation (default: postgres)
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string, required for the postgres backend
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// JWT secret used to validate recipient identities
    pub jwt_secret: String,

    /// Port the HTTP server binds to (default: 3000)
    pub api_port: u16,

    /// Shared key originators present in `X-API-Key` to dispatch; open when unset
    pub dispatch_api_key: Option<String>,

    /// Timeout for outbound tracking confirmations in milliseconds (default: 5000)
    pub callback_timeout_ms: u64,

    /// Interval between keep-alive comments on push streams (default: 15)
    pub sse_keepalive_secs: u64,

    /// Live events buffered per push stream before dispatch stops pushing (default: 256)
    pub push_queue_capacity: usize,

    /// Emit JSON logs instead of human-readable ones
    pub log_json: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let store_backend: StoreBackend = std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;
        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL environment variable is required when STORE_BACKEND=postgres"
            ));
        }

        Ok(Self {
            store_backend,
            database_url,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            dispatch_api_key: std::env::var("DISPATCH_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            callback_timeout_ms: std::env::var("CALLBACK_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CALLBACK_TIMEOUT_MS must be a valid u64"))?,
            sse_keepalive_secs: std::env::var("SSE_KEEPALIVE_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SSE_KEEPALIVE_SECS must be a valid u64"))?,
            push_queue_capacity: std::env::var("PUSH_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_QUEUE_CAPACITY must be a valid usize"))?,
            log_json: std::env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}
