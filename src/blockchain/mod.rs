// Blockchain module
//
// This module contains the ledger core:
// - Hashing helpers and key handling
// - Transactions and their Merkle commitment
// - Blocks and proof of work
// - The chain, its balance index and snapshots
// - Password-protected wallets

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod digest;
pub mod merkle;
pub mod snapshot;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use account::{Account, BalanceIndex};
pub use block::{Block, BlockError, CancelToken, MiningBudget};
pub use chain::{Blockchain, BlockchainError};
pub use crypto::{generate_key_pair, Address, DigitalSignature, KeyPair, PublicKey, SecretKey};
pub use merkle::{MerkleError, MerkleTree, ProofStep, Side};
pub use snapshot::{ChainSnapshot, SnapshotError};
pub use transaction::{Transaction, TransactionError, TransactionKind, ValidationError};
pub use wallet::{AuthError, Wallet, WalletError};
