use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Redis connection string
    pub redis_url: String,

    /// Name of the Redis list carrying notification ids (default: "notificationqueue")
    pub queue_name: String,

    /// Failed deliveries of one queue message before it is dead-lettered (default: 5)
    pub queue_max_redeliveries: u32,

    /// Delay before the first redelivery, in milliseconds; doubles on each
    /// further failure (default: 1000)
    pub queue_retry_base_ms: u64,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Resend API base URL
    pub resend_api_url: String,

    /// Email sender address
    pub email_from: Option<String>,

    /// Per-request timeout for the email provider, in seconds (default: 10)
    pub delivery_timeout_secs: u64,

    /// Maximum in-flight sends within one dispatch pass (default: 8)
    pub dispatch_concurrency: usize,

    /// Number of queue consumer loops run by the worker (default: 1)
    pub worker_concurrency: usize,

    /// Port for the health endpoint (default: 8080)
    pub health_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            queue_name: lookup("QUEUE_NAME").unwrap_or_else(|| "notificationqueue".to_string()),
            queue_max_redeliveries: parse_or(&lookup, "QUEUE_MAX_REDELIVERIES", 5)?,
            queue_retry_base_ms: parse_or(&lookup, "QUEUE_RETRY_BASE_MS", 1000)?,
            resend_api_key: lookup("RESEND_API_KEY"),
            resend_api_url: lookup("RESEND_API_URL")
                .unwrap_or_else(|| "https://api.resend.com".to_string()),
            email_from: lookup("EMAIL_FROM"),
            delivery_timeout_secs: parse_or(&lookup, "DELIVERY_TIMEOUT_SECS", 10)?,
            dispatch_concurrency: parse_or::<usize, _>(&lookup, "DISPATCH_CONCURRENCY", 8)?.max(1),
            worker_concurrency: parse_or::<usize, _>(&lookup, "WORKER_CONCURRENCY", 1)?.max(1),
            health_port: parse_or(&lookup, "HEALTH_PORT", 8080)?,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}
