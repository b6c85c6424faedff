use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub storage: StorageBackend,
    pub host: String,
    pub port: u16,

    pub quote_server_addr: String,
    // stamped on audit events and sent as the quote caller id by the pollers
    pub server_name: String,

    pub staged_trade_window: Duration,
    pub trigger_poll_interval: Duration,

    // 0 = keep retrying
    pub quote_max_attempts: u32,
    pub quote_retry_delay: Duration,

    pub audit_max_attempts: u32,
    pub audit_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_db: "daytrader".to_string(),
            storage: StorageBackend::Mongo,
            host: "127.0.0.1".to_string(),
            port: 3000,
            quote_server_addr: "127.0.0.1:4444".to_string(),
            server_name: "txserver".to_string(),
            staged_trade_window: Duration::from_secs(60),
            trigger_poll_interval: Duration::from_millis(1000),
            quote_max_attempts: 0,
            quote_retry_delay: Duration::ZERO,
            audit_max_attempts: 5,
            audit_backoff: Duration::from_millis(1000),
        }
    }
}

fn var_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    let defaults = Settings::default();

    let storage = match env::var("LEDGER_BACKEND") {
        Ok(v) if v.eq_ignore_ascii_case("memory") => StorageBackend::Memory,
        _ => StorageBackend::Mongo,
    };

    Settings {
        mongodb_uri: var_or("MONGODB_URI", defaults.mongodb_uri),
        mongodb_db: var_or("MONGODB_DB", defaults.mongodb_db),
        storage,
        host: var_or("HOST", defaults.host),
        port: parsed_or("PORT", defaults.port),
        quote_server_addr: var_or("QUOTE_SERVER_ADDR", defaults.quote_server_addr),
        server_name: var_or("HOSTNAME", defaults.server_name),
        staged_trade_window: Duration::from_secs(parsed_or("STAGED_TRADE_WINDOW_SECS", 60)),
        trigger_poll_interval: Duration::from_millis(parsed_or("TRIGGER_POLL_INTERVAL_MS", 1000)),
        quote_max_attempts: parsed_or("QUOTE_MAX_ATTEMPTS", defaults.quote_max_attempts),
        quote_retry_delay: Duration::from_millis(parsed_or("QUOTE_RETRY_DELAY_MS", 0)),
        audit_max_attempts: parsed_or("AUDIT_MAX_ATTEMPTS", defaults.audit_max_attempts),
        audit_backoff: Duration::from_millis(parsed_or("AUDIT_BACKOFF_MS", 1000)),
    }
}
