//! Configuration management for Emberchain

use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// UDP address of the bootstrap node used for discovery.
    #[serde(default = "default_bootstrap_addr")]
    pub bootstrap_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Minimum pending transactions before a production tick builds a block.
    #[serde(default = "default_txs_per_block")]
    pub txs_per_block: usize,
    /// Maximum transactions extracted into one block.
    #[serde(default = "default_max_txs_per_block")]
    pub max_txs_per_block: usize,
    #[serde(default = "default_block_interval_secs")]
    pub block_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            api_port: default_api_port(),
            bootstrap_addr: default_bootstrap_addr(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            txs_per_block: default_txs_per_block(),
            max_txs_per_block: default_max_txs_per_block(),
            block_interval_secs: default_block_interval_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: NetworkConfig::default(),
            chain: ChainConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

fn default_tcp_port() -> u16 {
    7001
}

fn default_udp_port() -> u16 {
    7002
}

fn default_api_port() -> u16 {
    8545
}

fn default_bootstrap_addr() -> String {
    "127.0.0.1:8282".to_string()
}

fn default_txs_per_block() -> usize {
    5
}

fn default_max_txs_per_block() -> usize {
    10
}

fn default_block_interval_secs() -> u64 {
    10
}

fn default_db_path() -> String {
    "./data/ember.db".to_string()
}

/// Loads `config.toml` (or the given path), falling back to defaults when
/// the file is absent.
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = path.unwrap_or("config.toml");
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    // Validate critical values
    if config.database.path.is_empty() {
        return Err("database.path must be set".into());
    }
    if config.chain.txs_per_block == 0 {
        return Err("chain.txs_per_block must be at least 1".into());
    }
    if config.chain.max_txs_per_block < config.chain.txs_per_block {
        return Err("chain.max_txs_per_block must be >= chain.txs_per_block".into());
    }
    if config.chain.block_interval_secs == 0 {
        return Err("chain.block_interval_secs must be at least 1".into());
    }

    Ok(config)
}
