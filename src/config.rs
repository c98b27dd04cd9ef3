//! Ledger configuration, read from a TOML file

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs;
use std::path::Path;

use crate::blockchain::block::MiningBudget;
use crate::blockchain::crypto::{generate_key_pair, KeyPair, SecretKey};

/// Errors that can occur while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Constants consumed when the chain and its blocks are built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex digits required in a block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,

    /// Amount minted for the miner of each block
    #[serde(default = "default_mining_reward")]
    pub mining_reward: f64,

    /// Currency label
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Flat fee applied to every transfer in a block
    #[serde(default = "default_transaction_fee")]
    pub transaction_fee: f64,

    /// Balance credited to the issuing authority when the chain is created
    #[serde(default = "default_issuer_supply")]
    pub issuer_supply: f64,

    /// Hex encoded secret key of the issuing authority. A fresh key is
    /// generated when absent.
    #[serde(default)]
    pub issuer_secret_key: Option<String>,

    /// Cap on nonces tried per block before mining gives up
    #[serde(default = "default_max_mining_attempts")]
    pub max_mining_attempts: u64,

    /// Seconds the HTTP server lets a single `/mine` request search
    #[serde(default = "default_mining_timeout_secs")]
    pub mining_timeout_secs: u64,
}

fn default_difficulty() -> usize {
    2
}

fn default_mining_reward() -> f64 {
    12.5
}

fn default_currency() -> String {
    "XSC".to_string()
}

fn default_transaction_fee() -> f64 {
    1.0
}

fn default_issuer_supply() -> f64 {
    1e8
}

// About 16^5 expected attempts at difficulty 5, with headroom
fn default_max_mining_attempts() -> u64 {
    10_000_000
}

fn default_mining_timeout_secs() -> u64 {
    30
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
            currency: default_currency(),
            transaction_fee: default_transaction_fee(),
            issuer_supply: default_issuer_supply(),
            issuer_secret_key: None,
            max_mining_attempts: default_max_mining_attempts(),
            mining_timeout_secs: default_mining_timeout_secs(),
        }
    }
}

impl LedgerConfig {
    /// Parses and validates a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the TOML file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Like [`LedgerConfig::load`], falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > 64 {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds the 64 hex digits of a hash",
                self.difficulty
            )));
        }
        if !(self.mining_reward > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "mining_reward must be positive: {}",
                self.mining_reward
            )));
        }
        if !(self.transaction_fee >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "transaction_fee must not be negative: {}",
                self.transaction_fee
            )));
        }
        if !(self.issuer_supply >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "issuer_supply must not be negative: {}",
                self.issuer_supply
            )));
        }
        if self.max_mining_attempts == 0 || self.mining_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "max_mining_attempts and mining_timeout_secs must be positive".to_string(),
            ));
        }
        if self.currency.trim().is_empty() {
            return Err(ConfigError::Invalid("currency must not be empty".to_string()));
        }
        Ok(())
    }

    /// Key pair of the issuing authority
    pub fn issuer_key_pair(&self) -> Result<KeyPair, ConfigError> {
        match &self.issuer_secret_key {
            Some(encoded) => SecretKey::from_hex(encoded)
                .map(KeyPair::from_secret_key)
                .map_err(|e| ConfigError::Invalid(format!("issuer_secret_key: {}", e))),
            None => Ok(generate_key_pair()),
        }
    }

    pub fn mining_budget(&self) -> MiningBudget {
        MiningBudget::unbounded().with_max_attempts(self.max_mining_attempts)
    }
}
