//! Process configuration (ambient stack, spec §6/§9). Every knob is a
//! flag or an env var with the documented default, loaded via `clap`'s
//! derive + env features; `.env` is read first via `dotenv` so local
//! runs don't need exported shell vars.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "loan-monitor", about = "BTC loan monitor price + alert core")]
pub struct CoreConfig {
    /// TWAP window, seconds.
    #[arg(long, env = "TWAP_WINDOW_SECONDS", default_value_t = 300)]
    pub twap_window_seconds: u64,

    /// Circuit breaker deviation threshold, percent.
    #[arg(long, env = "CIRCUIT_BREAKER_PCT", default_value_t = 10.0)]
    pub circuit_breaker_pct: f64,

    /// Minimum fresh sources required to trust an update.
    #[arg(long, env = "MIN_SOURCES", default_value_t = 1)]
    pub min_sources: usize,

    /// How often the oracle recomputes the aggregated price, milliseconds.
    #[arg(long, env = "PRICE_POLL_INTERVAL_MS", default_value_t = 5_000)]
    pub price_poll_interval_ms: u64,

    /// Dashboard/API bind address.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Path to the JSON state file.
    #[arg(long, env = "STATE_PATH", default_value = "./loan_monitor_state.json")]
    pub state_path: String,

    /// `tracing_subscriber::EnvFilter` directive.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Webhook URL the `HttpNotifier` posts alerts to. Unset runs with
    /// `NullNotifier` (offline/test mode).
    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    pub notify_webhook_url: Option<String>,
}

impl CoreConfig {
    /// Load `.env` (if present) then parse flags/env into `CoreConfig`.
    pub fn load() -> Self {
        let _ = dotenv::dotenv();
        Self::parse()
    }

    pub fn aggregator_config(&self) -> crate::aggregator::AggregatorConfig {
        crate::aggregator::AggregatorConfig {
            twap_window_ms: (self.twap_window_seconds * 1000) as i64,
            circuit_breaker_pct: self.circuit_breaker_pct,
            min_sources: self.min_sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = CoreConfig::parse_from(["loan-monitor"]);
        assert_eq!(config.twap_window_seconds, 300);
        assert_eq!(config.circuit_breaker_pct, 10.0);
        assert_eq!(config.min_sources, 1);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.state_path, "./loan_monitor_state.json");
        assert_eq!(config.log_level, "info");
        assert!(config.notify_webhook_url.is_none());
    }
}
