use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, ProofStep};

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,

    /// Required leading zero hex digits
    pub difficulty: usize,

    /// Currency label
    pub currency: String,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The transaction fee. Replaced by the chain fee when mined.
    #[serde(default)]
    pub fee: f64,

    /// The sender's secret key, hex encoded (for signing)
    pub private_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// Hash of the queued transaction
    pub hash: String,

    /// The height of the block that will include this transaction
    pub block_index: u64,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's public key (base58)
    pub public_key: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Request for the fund wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct FundWalletRequest {
    /// The address to fund
    pub address: String,

    /// The amount to fund
    pub amount: f64,
}

/// Balance of one address
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
    pub currency: String,
}

/// Inclusion proof of one transaction
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProofResponse {
    /// Leaf digest of the transaction
    pub leaf: String,

    /// Sibling hashes from the leaf up to the root
    pub proof: Vec<ProofStep>,

    /// Merkle root stored in the block
    pub root: String,

    /// Whether the proof leads to the stored root
    pub verified: bool,
}

/// Error body returned by every failing endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl ToString) -> Self {
        ErrorResponse {
            error: error.to_string(),
        }
    }
}
