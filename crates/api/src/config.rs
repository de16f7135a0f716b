//! Application configuration loaded from environment variables.

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `DATABASE_URL` — PostgreSQL connection string; unset runs the
///   in-memory store
/// - `HOLD_TTL_SECS` — reservation lifetime (default: `900`, 15 minutes)
/// - `SESSION_TTL_SECS` — checkout session lifetime (default: `86400`)
/// - `SWEEP_INTERVAL_SECS` — expiry sweep period (default: `60`)
/// - `SHIPPING_COST_CENTS` — flat shipping applied to quotes (default: `0`)
/// - `TAX_RATE_BPS` — tax rate in basis points (default: `0`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub hold_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub shipping_cost_cents: i64,
    pub tax_rate_bps: u32,
    pub log_level: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT", 3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            hold_ttl_secs: env_parsed("HOLD_TTL_SECS", 900),
            session_ttl_secs: env_parsed("SESSION_TTL_SECS", 86_400),
            sweep_interval_secs: env_parsed("SWEEP_INTERVAL_SECS", 60),
            shipping_cost_cents: env_parsed("SHIPPING_COST_CENTS", 0),
            tax_rate_bps: env_parsed("TAX_RATE_BPS", 0),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reservation lifetime as a chrono duration.
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_ttl_secs as i64)
    }

    /// Session lifetime as a chrono duration.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs as i64)
    }

    /// Sweep period as a std duration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            hold_ttl_secs: 900,
            session_ttl_secs: 86_400,
            sweep_interval_secs: 60,
            shipping_cost_cents: 0,
            tax_rate_bps: 0,
            log_level: "info".to_string(),
        }
    }
}
