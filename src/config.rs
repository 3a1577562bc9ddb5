//! Run configuration loaded from `BACKFILL_*` environment variables.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillConfig {
    pub concurrency: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub tsym: String,
    pub exchange: String,
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://min-api.cryptocompare.com".to_string(),
            tsym: "USD".to_string(),
            exchange: "CCCAGG".to_string(),
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Gaps,
    Recent,
    All,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gaps => "gaps",
            Self::Recent => "recent",
            Self::All => "all",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gaps" | "gap-fill" => Some(Self::Gaps),
            "recent" | "catch-up" => Some(Self::Recent),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub store_path: PathBuf,
    pub mode: RunMode,
    pub seed_symbols: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/histo_minute.sqlite"),
            mode: RunMode::All,
            seed_symbols: Vec::new(),
        }
    }
}

pub fn backfill_config_from_env() -> BackfillConfig {
    let mut config = BackfillConfig::default();

    if let Some(concurrency) = env_parsed::<usize>("BACKFILL_CONCURRENCY") {
        if concurrency >= 1 {
            config.concurrency = concurrency;
        }
    }

    config
}

pub fn provider_config_from_env() -> ProviderConfig {
    let mut config = ProviderConfig::default();

    if let Some(base_url) = env_non_empty("BACKFILL_PROVIDER_BASE_URL") {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(tsym) = env_non_empty("BACKFILL_PROVIDER_TSYM") {
        config.tsym = tsym.to_ascii_uppercase();
    }
    if let Some(exchange) = env_non_empty("BACKFILL_PROVIDER_EXCHANGE") {
        config.exchange = exchange;
    }
    if let Some(timeout_ms) = env_parsed::<u64>("BACKFILL_PROVIDER_TIMEOUT_MS") {
        if timeout_ms > 0 {
            config.timeout_ms = timeout_ms;
        }
    }

    config
}

pub fn run_config_from_env() -> RunConfig {
    let mut config = RunConfig::default();

    if let Some(path) = env_non_empty("BACKFILL_STORE_PATH") {
        config.store_path = PathBuf::from(path);
    }
    if let Some(mode) = env_non_empty("BACKFILL_MODE").and_then(|raw| RunMode::parse(&raw)) {
        config.mode = mode;
    }
    if let Some(symbols) = env_non_empty("BACKFILL_SYMBOLS") {
        config.seed_symbols = parse_symbols(&symbols);
    }

    config
}

fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_ascii_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

fn env_non_empty(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_non_empty(key)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::test_env::with_env_vars;

    #[test]
    fn defaults_when_env_missing() {
        let (backfill, provider, run) = with_env_vars(
            &[
                ("BACKFILL_CONCURRENCY", None),
                ("BACKFILL_PROVIDER_BASE_URL", None),
                ("BACKFILL_PROVIDER_TSYM", None),
                ("BACKFILL_PROVIDER_EXCHANGE", None),
                ("BACKFILL_PROVIDER_TIMEOUT_MS", None),
                ("BACKFILL_STORE_PATH", None),
                ("BACKFILL_MODE", None),
                ("BACKFILL_SYMBOLS", None),
            ],
            || {
                (
                    backfill_config_from_env(),
                    provider_config_from_env(),
                    run_config_from_env(),
                )
            },
        );

        assert_eq!(backfill, BackfillConfig::default());
        assert_eq!(provider, ProviderConfig::default());
        assert_eq!(run, RunConfig::default());
    }

    #[test]
    fn parses_overrides_from_env() {
        let (backfill, provider, run) = with_env_vars(
            &[
                ("BACKFILL_CONCURRENCY", Some("8")),
                ("BACKFILL_PROVIDER_BASE_URL", Some("http://localhost:9000/")),
                ("BACKFILL_PROVIDER_TSYM", Some("eur")),
                ("BACKFILL_PROVIDER_EXCHANGE", Some("Kraken")),
                ("BACKFILL_PROVIDER_TIMEOUT_MS", Some("2500")),
                ("BACKFILL_STORE_PATH", Some("/tmp/candles.sqlite")),
                ("BACKFILL_MODE", Some("recent")),
                ("BACKFILL_SYMBOLS", Some("btc, eth,,BTC ,sol")),
            ],
            || {
                (
                    backfill_config_from_env(),
                    provider_config_from_env(),
                    run_config_from_env(),
                )
            },
        );

        assert_eq!(backfill.concurrency, 8);
        assert_eq!(provider.base_url, "http://localhost:9000");
        assert_eq!(provider.tsym, "EUR");
        assert_eq!(provider.exchange, "Kraken");
        assert_eq!(provider.timeout_ms, 2_500);
        assert_eq!(run.store_path, PathBuf::from("/tmp/candles.sqlite"));
        assert_eq!(run.mode, RunMode::Recent);
        assert_eq!(run.seed_symbols, vec!["BTC", "ETH", "SOL"]);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let (backfill, provider, run) = with_env_vars(
            &[
                ("BACKFILL_CONCURRENCY", Some("0")),
                ("BACKFILL_PROVIDER_BASE_URL", Some("   ")),
                ("BACKFILL_PROVIDER_TSYM", None),
                ("BACKFILL_PROVIDER_EXCHANGE", None),
                ("BACKFILL_PROVIDER_TIMEOUT_MS", Some("soon")),
                ("BACKFILL_STORE_PATH", None),
                ("BACKFILL_MODE", Some("sideways")),
                ("BACKFILL_SYMBOLS", Some(" , ")),
            ],
            || {
                (
                    backfill_config_from_env(),
                    provider_config_from_env(),
                    run_config_from_env(),
                )
            },
        );

        assert_eq!(backfill.concurrency, 4);
        assert_eq!(provider, ProviderConfig::default());
        assert_eq!(run.mode, RunMode::All);
        assert!(run.seed_symbols.is_empty());
    }

    #[test]
    fn run_mode_accepts_aliases() {
        assert_eq!(RunMode::parse("GAPS"), Some(RunMode::Gaps));
        assert_eq!(RunMode::parse("gap-fill"), Some(RunMode::Gaps));
        assert_eq!(RunMode::parse(" catch-up "), Some(RunMode::Recent));
        assert_eq!(RunMode::parse("all"), Some(RunMode::All));
        assert_eq!(RunMode::parse("daily"), None);
        assert_eq!(RunMode::Recent.as_str(), "recent");
    }
}
