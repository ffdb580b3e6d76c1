use std::time::Duration;

/// Which [`OrderStore`](crate::store::OrderStore) implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Unknown store backend: {}", s)),
        }
    }
}

/// Service configuration
///
/// | Variable | Default |
/// |----------|---------|
/// | BIND_ADDR | 0.0.0.0:3000 |
/// | STORE_BACKEND | postgres |
/// | DATABASE_URL | (required for postgres) |
/// | RUN_MIGRATIONS | true |
/// | REQUEST_TIMEOUT_MS | 5000 |
/// | DISPATCH_QUEUE_CAPACITY | 1 |
/// | DISPATCH_WRITE_TIMEOUT_MS | 3000 |
/// | MEDIA_BASE_URL | http://localhost:3000/media |
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub run_migrations: bool,
    /// Deadline applied to every storage call on the checkout and transition paths
    pub request_timeout_ms: u64,
    /// Events buffered in front of the dispatch worker before new ones are dropped
    pub dispatch_queue_capacity: usize,
    /// Per-connection write deadline inside the dispatch worker
    pub dispatch_write_timeout_ms: u64,
    pub media_base_url: String,
}

impl Config {
    /// Load from the process environment, falling back to defaults for
    /// anything unset or unparsable
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            store_backend: parse_var("STORE_BACKEND").unwrap_or(StoreBackend::Postgres),
            database_url: std::env::var("DATABASE_URL").ok(),
            run_migrations: parse_var("RUN_MIGRATIONS").unwrap_or(true),
            request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS").unwrap_or(5000),
            dispatch_queue_capacity: parse_var("DISPATCH_QUEUE_CAPACITY")
                .filter(|c: &usize| *c > 0)
                .unwrap_or(1),
            dispatch_write_timeout_ms: parse_var("DISPATCH_WRITE_TIMEOUT_MS").unwrap_or(3000),
            media_base_url: std::env::var("MEDIA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/media".into()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn dispatch_write_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_write_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            run_migrations: false,
            request_timeout_ms: 5000,
            dispatch_queue_capacity: 1,
            dispatch_write_timeout_ms: 3000,
            media_base_url: "http://localhost:3000/media".into(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("PostgreSQL".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_default_durations() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.dispatch_write_timeout(), Duration::from_secs(3));
        assert_eq!(config.dispatch_queue_capacity, 1);
    }
}
