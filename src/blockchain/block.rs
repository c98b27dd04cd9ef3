use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::crypto::Address;
use super::digest::{has_leading_zeros, sha256_hex};
use super::merkle::{leaf_digest, MerkleTree, ProofStep};
use super::transaction::{Transaction, TransactionError};

/// Previous hash carried by every genesis block
pub const GENESIS_PREV_HASH: &str =
    "b076b4ac5dfd570677538e23b54818022a379d2e8da1ef6f1b40f08965b528ff";

/// Merkle root of a block without transactions
pub const EMPTY_MERKLE_ROOT: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Errors that can occur during block operations
#[derive(Debug, Error, PartialEq)]
pub enum BlockError {
    #[error("Invalid block {hash}: {reason}")]
    Invalid { hash: String, reason: String },

    #[error("Block {hash} does not extend the tip: expected previous hash {expected}, found {found}")]
    BrokenLink {
        hash: String,
        expected: String,
        found: String,
    },

    #[error("Mining gave up after {attempts} attempts below difficulty {difficulty}")]
    MiningExhausted { attempts: u64, difficulty: usize },

    #[error("Mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },
}

/// Shared flag used to stop a running nonce search from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits applied to a nonce search
#[derive(Debug, Clone, Default)]
pub struct MiningBudget {
    max_attempts: Option<u64>,
    cancel: Option<CancelToken>,
}

impl MiningBudget {
    /// No attempt cap and no cancellation
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn max_attempts(&self) -> Option<u64> {
        self.max_attempts
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Root of the Merkle tree over the transactions
    merkle_root: String,

    /// Hash of the previous block
    prev_hash: String,

    /// Proof of work
    nonce: u64,

    /// Position in the chain, genesis is 0
    height: u64,

    /// Address credited with the fees of this block
    beneficiary: Address,

    /// Fee applied to every transfer in the block
    transaction_fee: f64,

    /// Number of leading zero hex digits the hash must have
    difficulty: usize,

    /// Hash of the header
    hash: String,

    /// List of transactions included in this block
    transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new, unmined block
    ///
    /// # Arguments
    ///
    /// * `prev_hash` - The hash of the previous block
    /// * `transactions` - Transactions to include; each must be valid
    /// * `nonce` - Starting nonce
    /// * `height` - The height of the block in the chain
    /// * `beneficiary` - The address receiving the fees
    /// * `transaction_fee` - Fee applied to every transfer in the block
    /// * `difficulty` - Required leading zero hex digits
    pub fn new(
        prev_hash: String,
        transactions: Vec<Transaction>,
        nonce: u64,
        height: u64,
        beneficiary: Address,
        transaction_fee: f64,
        difficulty: usize,
    ) -> Result<Self, TransactionError> {
        let mut transactions = transactions;
        for transaction in transactions.iter_mut() {
            if !transaction.is_valid() {
                return Err(TransactionError::Invalid {
                    hash: transaction.hash().to_string(),
                });
            }
            if !transaction.is_reward() {
                transaction.set_fee(transaction_fee);
            }
        }

        let mut block = Block {
            timestamp: Utc::now(),
            merkle_root: String::new(),
            prev_hash,
            nonce,
            height,
            beneficiary,
            transaction_fee,
            difficulty,
            hash: String::new(),
            transactions,
        };
        block.update_tree();

        Ok(block)
    }

    /// Genesis block: sentinel previous hash, height 0, no transactions, unmined
    pub fn genesis(beneficiary: Address, transaction_fee: f64, difficulty: usize) -> Self {
        let mut block = Block {
            timestamp: Utc::now(),
            merkle_root: EMPTY_MERKLE_ROOT.to_string(),
            prev_hash: GENESIS_PREV_HASH.to_string(),
            nonce: 0,
            height: 0,
            beneficiary,
            transaction_fee,
            difficulty,
            hash: String::new(),
            transactions: Vec::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    fn header_prefix(&self) -> String {
        format!(
            "{}{}{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.merkle_root,
            self.prev_hash
        )
    }

    /// Hash of timestamp, Merkle root, previous hash and nonce
    pub fn calculate_hash(&self) -> String {
        sha256_hex(&[self.header_prefix(), self.nonce.to_string()])
    }

    /// Rebuilds the Merkle commitment from the current transactions.
    /// Returns `None` for a block without transactions.
    pub fn merkle_tree(&self) -> Option<MerkleTree> {
        MerkleTree::from_transactions(&self.transactions).ok()
    }

    fn update_tree(&mut self) {
        self.merkle_root = self
            .merkle_tree()
            .map(|tree| tree.root().to_string())
            .unwrap_or_else(|| EMPTY_MERKLE_ROOT.to_string());
        self.hash = self.calculate_hash();
    }

    /// Inclusion proof of the transaction at `index`
    pub fn transaction_proof(&self, index: usize) -> Option<(String, Vec<ProofStep>)> {
        let transaction = self.transactions.get(index)?;
        let leaf = leaf_digest(transaction);
        let proof = self.merkle_tree()?.proof(&leaf).ok()?;
        Some((leaf, proof))
    }

    /// Searches nonces until the hash meets the difficulty. Never gives up.
    pub fn mine(&mut self) -> u64 {
        // an unbounded budget without a token has no way to stop early
        self.mine_with(&MiningBudget::unbounded()).unwrap_or_default()
    }

    /// Searches nonces until the hash meets the difficulty or the budget runs out
    ///
    /// Returns the number of nonces tried. A block that already satisfies the
    /// difficulty is left untouched. When the budget runs out the block keeps
    /// its last nonce, so calling again resumes the search.
    pub fn mine_with(&mut self, budget: &MiningBudget) -> Result<u64, BlockError> {
        let prefix = self.header_prefix();
        let expected = sha256_hex(&[prefix.as_str(), self.nonce.to_string().as_str()]);
        if self.hash != expected {
            self.hash = expected;
        }

        let mut attempts: u64 = 0;
        while !has_leading_zeros(&self.hash, self.difficulty) {
            if budget.max_attempts.is_some_and(|max| attempts >= max) {
                debug!(
                    "Mining block {} stopped after {} attempts",
                    self.height, attempts
                );
                return Err(BlockError::MiningExhausted {
                    attempts,
                    difficulty: self.difficulty,
                });
            }
            if budget.is_cancelled() {
                return Err(BlockError::MiningCancelled { attempts });
            }

            self.nonce = self.nonce.wrapping_add(1);
            self.hash = sha256_hex(&[prefix.as_str(), self.nonce.to_string().as_str()]);
            attempts += 1;
        }

        if attempts > 0 {
            info!(
                "Mined block {} with nonce {} after {} attempts: {}",
                self.height, self.nonce, attempts, self.hash
            );
        }

        Ok(attempts)
    }

    /// Adds a transaction before the block is appended to a chain
    ///
    /// Any previous mining is invalidated since the header changes.
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), TransactionError> {
        let mut transaction = transaction;
        if !transaction.is_valid() {
            return Err(TransactionError::Invalid {
                hash: transaction.hash().to_string(),
            });
        }
        if self
            .transactions
            .iter()
            .any(|existing| existing.is_same_instance(&transaction))
        {
            return Err(TransactionError::AlreadyInBlock {
                hash: transaction.hash().to_string(),
            });
        }

        if !transaction.is_reward() {
            transaction.set_fee(self.transaction_fee);
        }
        self.transactions.push(transaction);
        self.update_tree();

        Ok(())
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn has_valid_padding(&self) -> bool {
        has_leading_zeros(&self.hash, self.difficulty)
    }

    /// The commitment rebuilt from the current transactions matches the stored root
    pub fn has_valid_tree(&self) -> bool {
        match self.merkle_tree() {
            Some(tree) => tree.root() == self.merkle_root && tree.verify_all(),
            None => self.merkle_root == EMPTY_MERKLE_ROOT,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.has_valid_hash() && self.has_valid_padding() && self.has_valid_tree()
    }

    /// Hash is current and meets the difficulty
    pub fn is_mined(&self) -> bool {
        self.has_valid_hash() && self.has_valid_padding()
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash == GENESIS_PREV_HASH
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }

    pub fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn beneficiary(&self) -> &Address {
        &self.beneficiary
    }

    pub fn transaction_fee(&self) -> f64 {
        self.transaction_fee
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    #[cfg(test)]
    pub(crate) fn transactions_mut(&mut self) -> &mut Vec<Transaction> {
        &mut self.transactions
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block(height={}, transactions={}, prev_hash={}, merkle_root={}, nonce={}, hash={}, beneficiary={}, fee={})",
            self.height,
            self.transactions.len(),
            self.prev_hash,
            self.merkle_root,
            self.nonce,
            self.hash,
            self.beneficiary,
            self.transaction_fee
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::{generate_key_pair, KeyPair};

    fn signed(sender: &KeyPair, to: &Address, amount: f64) -> Transaction {
        let mut transaction = Transaction::new(
            sender.address(),
            sender.public_key.clone(),
            to.clone(),
            amount,
            0.0,
        )
        .unwrap();
        transaction.sign(&sender.secret_key);
        transaction
    }

    fn empty_block(difficulty: usize) -> Block {
        Block::genesis(Address("beneficiary".to_string()), 1.0, difficulty)
    }

    #[test]
    fn test_new_block() {
        let sender = generate_key_pair();
        let recipient = generate_key_pair().address();
        let transactions = vec![signed(&sender, &recipient, 10.0), signed(&sender, &recipient, 20.0)];

        let block = Block::new(
            "previous_hash".to_string(),
            transactions,
            0,
            1,
            sender.address(),
            2.0,
            1,
        )
        .unwrap();

        assert_eq!(block.height(), 1);
        assert_eq!(block.prev_hash(), "previous_hash");
        assert_eq!(block.transactions().len(), 2);
        assert!(block.transactions().iter().all(|tx| tx.fee() == 2.0));
        assert_ne!(block.merkle_root(), EMPTY_MERKLE_ROOT);
        assert_eq!(block.hash(), block.calculate_hash());
        assert_eq!(block.hash().len(), 64);
        assert!(block.has_valid_tree());
        assert!(!block.is_genesis());
    }

    #[test]
    fn test_invalid_transaction_is_rejected() {
        let sender = generate_key_pair();
        let unsigned = Transaction::new(
            sender.address(),
            sender.public_key.clone(),
            sender.address(),
            1.0,
            0.0,
        )
        .unwrap();
        let hash = unsigned.hash().to_string();

        let err = Block::new(
            GENESIS_PREV_HASH.to_string(),
            vec![unsigned],
            0,
            0,
            sender.address(),
            1.0,
            1,
        )
        .unwrap_err();

        assert_eq!(err, TransactionError::Invalid { hash });
    }

    #[test]
    fn test_genesis_matches_empty_construction() {
        let genesis = empty_block(1);
        let built = Block::new(
            GENESIS_PREV_HASH.to_string(),
            Vec::new(),
            0,
            0,
            Address("beneficiary".to_string()),
            1.0,
            1,
        )
        .unwrap();

        assert_eq!(genesis.merkle_root(), built.merkle_root());
        assert_eq!(genesis.prev_hash(), built.prev_hash());
        assert_eq!(genesis.height(), 0);
        assert!(built.is_genesis());
    }

    #[test]
    fn test_empty_block() {
        let block = empty_block(1);

        assert!(block.is_genesis());
        assert_eq!(block.merkle_root(), EMPTY_MERKLE_ROOT);
        assert!(block.merkle_tree().is_none());
        assert!(block.has_valid_tree());
        assert!(block.transaction_proof(0).is_none());
    }

    #[test]
    fn test_mining_meets_difficulty() {
        let mut block = empty_block(2);
        block.mine();

        assert!(block.hash().starts_with("00"));
        assert!(block.is_mined());
        assert!(block.is_valid());

        // already mined: nothing changes
        let (nonce, hash) = (block.nonce(), block.hash().to_string());
        assert_eq!(block.mine(), 0);
        assert_eq!(block.nonce(), nonce);
        assert_eq!(block.hash(), hash);
    }

    #[test]
    fn test_zero_difficulty_needs_no_work() {
        let mut block = empty_block(0);
        assert!(block.is_valid());
        assert_eq!(block.mine(), 0);
    }

    #[test]
    fn test_mining_budget_exhausts_and_resumes() {
        let mut block = empty_block(64);
        let err = block
            .mine_with(&MiningBudget::unbounded().with_max_attempts(10))
            .unwrap_err();

        assert_eq!(err, BlockError::MiningExhausted { attempts: 10, difficulty: 64 });
        assert_eq!(block.nonce(), 10);
        assert!(block.has_valid_hash());
        assert!(!block.is_mined());
        assert!(!block.is_valid());
    }

    #[test]
    fn test_mining_cancellation() {
        let token = CancelToken::new();
        token.cancel();

        let mut block = empty_block(64);
        let err = block
            .mine_with(&MiningBudget::unbounded().with_cancel_token(token))
            .unwrap_err();

        assert_eq!(err, BlockError::MiningCancelled { attempts: 0 });
    }

    #[test]
    fn test_add_transaction() {
        let sender = generate_key_pair();
        let recipient = generate_key_pair().address();
        let mut block = empty_block(1);
        block.mine();
        let mined_hash = block.hash().to_string();

        let transaction = signed(&sender, &recipient, 4.0);
        block.add_transaction(transaction.clone()).unwrap();

        assert_eq!(block.transactions().len(), 1);
        assert_eq!(block.transactions()[0].fee(), 1.0);
        assert_ne!(block.hash(), mined_hash);
        assert!(block.has_valid_tree());

        let err = block.add_transaction(transaction.clone()).unwrap_err();
        assert_eq!(
            err,
            TransactionError::AlreadyInBlock { hash: transaction.hash().to_string() }
        );

        // value-equal but distinct instance is accepted
        block.add_transaction(signed(&sender, &recipient, 4.0)).unwrap();
        assert_eq!(block.transactions().len(), 2);
    }

    #[test]
    fn test_tampering_breaks_tree() {
        let sender = generate_key_pair();
        let recipient = generate_key_pair().address();
        let mut block = Block::new(
            GENESIS_PREV_HASH.to_string(),
            vec![signed(&sender, &recipient, 1.0), signed(&sender, &recipient, 2.0)],
            0,
            0,
            sender.address(),
            1.0,
            1,
        )
        .unwrap();
        block.mine();
        assert!(block.is_valid());

        block.transactions_mut()[1].set_fee(0.0);

        assert!(block.has_valid_hash());
        assert!(!block.has_valid_tree());
        assert!(!block.is_valid());
    }

    #[test]
    fn test_transaction_proof() {
        let sender = generate_key_pair();
        let recipient = generate_key_pair().address();
        let block = Block::new(
            GENESIS_PREV_HASH.to_string(),
            (1..=3).map(|n| signed(&sender, &recipient, n as f64)).collect(),
            0,
            0,
            sender.address(),
            1.0,
            0,
        )
        .unwrap();

        for index in 0..3 {
            let (leaf, proof) = block.transaction_proof(index).unwrap();
            assert!(MerkleTree::verify(&leaf, &proof, block.merkle_root()));
        }
        assert!(block.transaction_proof(3).is_none());
    }

    #[test]
    fn test_reward_keeps_zero_fee() {
        let issuer = generate_key_pair();
        let miner = generate_key_pair().address();
        let reward = Transaction::reward(&issuer, miner.clone(), 12.5);

        let block = Block::new(
            GENESIS_PREV_HASH.to_string(),
            vec![reward],
            0,
            0,
            miner,
            3.0,
            0,
        )
        .unwrap();

        assert_eq!(block.transactions()[0].fee(), 0.0);
    }
}
