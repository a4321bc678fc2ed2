use crate::TradingMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
    pub paper_initial_balance: f64,

    // Database
    pub database_url: String,

    // Config files
    pub risk_config_path: String,
    pub generator_config_path: Option<String>,

    // Schedules
    pub evaluation_interval_secs: u64,
    pub equity_refresh_secs: u64,
    pub reconcile_interval_secs: u64,

    // Exchange gateway
    pub gateway_timeout_ms: u64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        Config {
            trading_mode,
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 10.0),
            paper_initial_balance: parsed_env("PAPER_INITIAL_BALANCE", 10_000.0),
            database_url: required_env("DATABASE_URL"),
            risk_config_path: optional_env("RISK_CONFIG_PATH")
                .unwrap_or_else(|| "config/risk.toml".to_string()),
            generator_config_path: optional_env("GENERATOR_CONFIG_PATH"),
            evaluation_interval_secs: parsed_env("EVALUATION_INTERVAL_SECS", 30),
            equity_refresh_secs: parsed_env("EQUITY_REFRESH_SECS", 60),
            reconcile_interval_secs: parsed_env("RECONCILE_INTERVAL_SECS", 300),
            gateway_timeout_ms: parsed_env("GATEWAY_TIMEOUT_MS", 5_000),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    optional_env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
