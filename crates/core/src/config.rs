use serde::{Deserialize, Serialize};
use std::env;

/// Which message bus backend to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub bus: BusKind,
    pub exchanges: Vec<String>,
    pub symbols: Vec<String>,
    pub bind_addr: String,
    pub launch_workers: usize,
    pub retry_forever: bool,
    pub enable_metrics: bool,
    pub metrics_port: u16,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let bus = match env::var("BUS")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => BusKind::Memory,
            "redis" => BusKind::Redis,
            other => anyhow::bail!("BUS must be 'memory' or 'redis', got '{other}'"),
        };

        Ok(Config {
            database_url,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bus,
            exchanges: split_csv(
                &env::var("EXCHANGES").unwrap_or_else(|_| "binance,bybit".to_string()),
            ),
            symbols: split_csv(&env::var("SYMBOLS").unwrap_or_else(|_| "BTC/USDT".to_string())),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            launch_workers: env::var("LAUNCH_WORKERS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            retry_forever: env::var("RETRY_FOREVER")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            enable_metrics: env::var("ENABLE_METRICS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9000".to_string())
                .parse()
                .unwrap_or(9000),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
