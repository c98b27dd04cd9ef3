//! Export and import of a whole ledger.
//!
//! Snapshots are encoded with bincode for compact storage or with JSON for
//! the HTTP API. A restored chain is validated block by block before use.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::account::BalanceIndex;
use super::block::Block;
use super::chain::Blockchain;
use super::crypto::KeyPair;
use super::transaction::Transaction;
use crate::config::{ConfigError, LedgerConfig};

/// Errors that can occur while encoding or restoring a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Snapshot does not start with a genesis block")]
    MissingGenesis,

    #[error("Snapshot chain is invalid")]
    InvalidChain,

    #[error("Pending transaction {hash} is invalid")]
    InvalidPending { hash: String },

    #[error("Transaction {hash} in block {height} is invalid")]
    InvalidTransaction { hash: String, height: u64 },

    #[error("Snapshot settings are invalid: {0}")]
    Config(#[from] ConfigError),
}

/// Serializable state of a [`Blockchain`]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainSnapshot {
    pub blocks: Vec<Block>,
    pub pending: Vec<Transaction>,
    #[schema(value_type = Object)]
    pub balances: BalanceIndex,
    pub difficulty: usize,
    pub mining_reward: f64,
    pub currency: String,
    pub transaction_fee: f64,
}

impl ChainSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        bincode::deserialize(bytes).map_err(|e| SnapshotError::DeserializationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SnapshotError::SerializationError(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(content).map_err(|e| SnapshotError::DeserializationError(e.to_string()))
    }
}

impl Blockchain {
    /// Captures blocks, pending transactions, balances and chain settings
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            blocks: self.blocks().to_vec(),
            pending: self.pending_transactions().to_vec(),
            balances: self.balances().clone(),
            difficulty: self.difficulty(),
            mining_reward: self.mining_reward(),
            currency: self.currency().to_string(),
            transaction_fee: self.transaction_fee(),
        }
    }

    /// Rebuilds a chain from a snapshot
    ///
    /// Chain settings come from the snapshot. `config` only supplies the
    /// mining limits and `issuer` signs future rewards. Every transaction,
    /// mined or pending, must still match its hash and signature.
    pub fn restore(
        snapshot: ChainSnapshot,
        config: &LedgerConfig,
        issuer: KeyPair,
    ) -> Result<Self, SnapshotError> {
        let settings = LedgerConfig {
            difficulty: snapshot.difficulty,
            mining_reward: snapshot.mining_reward,
            currency: snapshot.currency,
            transaction_fee: snapshot.transaction_fee,
            issuer_supply: 0.0,
            issuer_secret_key: None,
            max_mining_attempts: config.max_mining_attempts,
            mining_timeout_secs: config.mining_timeout_secs,
        };
        settings.validate()?;

        if !snapshot.blocks.first().is_some_and(Block::is_genesis) {
            return Err(SnapshotError::MissingGenesis);
        }

        for block in &snapshot.blocks {
            if let Some(transaction) = block.transactions().iter().find(|tx| !tx.is_valid()) {
                return Err(SnapshotError::InvalidTransaction {
                    hash: transaction.hash().to_string(),
                    height: block.height(),
                });
            }
        }

        if let Some(transaction) = snapshot.pending.iter().find(|tx| !tx.is_valid()) {
            return Err(SnapshotError::InvalidPending {
                hash: transaction.hash().to_string(),
            });
        }

        let chain = Blockchain::from_parts(
            snapshot.blocks,
            snapshot.pending,
            snapshot.balances,
            &settings,
            issuer,
        );
        if !chain.is_valid() {
            warn!("Refusing to restore an invalid chain of {} blocks", chain.size());
            return Err(SnapshotError::InvalidChain);
        }

        info!("Restored chain of {} blocks", chain.size());
        Ok(chain)
    }
}
