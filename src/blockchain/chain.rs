use log::{debug, info, warn};
use thiserror::Error;

use super::account::BalanceIndex;
use super::block::{Block, BlockError, MiningBudget};
use super::crypto::{Address, KeyPair};
use super::digest::has_leading_zeros;
use super::transaction::{Transaction, TransactionError, TransactionKind};
use crate::config::{ConfigError, LedgerConfig};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Index {index} out of bounds for a chain of {len} blocks")]
    OutOfBounds { index: isize, len: usize },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Represents the blockchain
///
/// The chain owns its blocks, its pending queue and its balance index. It
/// performs no locking: callers sharing a chain must serialize access.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    blocks: Vec<Block>,

    /// Transactions waiting for the next block
    pending: Vec<Transaction>,

    /// Unspent balance per address
    balances: BalanceIndex,

    /// Mining difficulty (number of leading zero hex digits required in hash)
    difficulty: usize,

    /// Amount minted for each mined block
    mining_reward: f64,

    /// Currency label
    currency: String,

    /// Flat fee applied to transfers in new blocks
    transaction_fee: f64,

    /// Issuing authority signing mining rewards
    issuer: KeyPair,

    /// Limits on every nonce search run by the chain
    mining_budget: MiningBudget,
}

impl Blockchain {
    /// Creates a new blockchain with a freshly mined genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty, reward, currency, fee and issuer supply
    /// * `issuer` - Key pair of the issuing authority
    pub fn new(config: &LedgerConfig, issuer: KeyPair) -> Result<Self, BlockchainError> {
        let genesis =
            Self::create_genesis_block(issuer.address(), config.transaction_fee, config.difficulty);
        Self::with_genesis(config, issuer, genesis)
    }

    /// Creates a new blockchain on top of a caller-supplied genesis block,
    /// mining it if needed
    pub fn with_genesis(
        config: &LedgerConfig,
        issuer: KeyPair,
        genesis: Block,
    ) -> Result<Self, BlockchainError> {
        config.validate()?;

        let mining_budget = config.mining_budget();
        let mut genesis = genesis;
        genesis.mine_with(&mining_budget)?;

        let mut balances = BalanceIndex::new();
        if config.issuer_supply > 0.0 {
            balances.credit(&issuer.address(), config.issuer_supply);
        }

        info!(
            "Created {} chain with difficulty {}, genesis {}",
            config.currency,
            config.difficulty,
            genesis.hash()
        );

        Ok(Blockchain {
            blocks: vec![genesis],
            pending: Vec::new(),
            balances,
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
            currency: config.currency.clone(),
            transaction_fee: config.transaction_fee,
            issuer,
            mining_budget,
        })
    }

    /// Reassembles a chain from already validated parts
    pub(crate) fn from_parts(
        blocks: Vec<Block>,
        pending: Vec<Transaction>,
        balances: BalanceIndex,
        config: &LedgerConfig,
        issuer: KeyPair,
    ) -> Self {
        Blockchain {
            blocks,
            pending,
            balances,
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
            currency: config.currency.clone(),
            transaction_fee: config.transaction_fee,
            issuer,
            mining_budget: config.mining_budget(),
        }
    }

    /// Creates an unmined genesis block
    pub fn create_genesis_block(beneficiary: Address, transaction_fee: f64, difficulty: usize) -> Block {
        Block::genesis(beneficiary, transaction_fee, difficulty)
    }

    /// Replaces the limits applied when the chain mines
    pub fn with_mining_budget(mut self, budget: MiningBudget) -> Self {
        self.mining_budget = budget;
        self
    }

    /// Number of blocks, genesis included
    pub fn size(&self) -> usize {
        self.blocks.len()
    }

    /// The last block in the chain
    pub fn tip(&self) -> &Block {
        // genesis is always present
        &self.blocks[self.blocks.len() - 1]
    }

    /// Gets a block by position; negative indices count from the end
    pub fn get_block(&self, index: isize) -> Result<&Block, BlockchainError> {
        let len = self.blocks.len();
        let resolved = if index < 0 {
            len.checked_sub(index.unsigned_abs())
        } else {
            Some(index as usize)
        };

        resolved
            .and_then(|position| self.blocks.get(position))
            .ok_or(BlockchainError::OutOfBounds { index, len })
    }

    /// Gets the block with the given hash
    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.hash() == hash)
    }

    /// Every transaction recorded in the chain, oldest first
    pub fn all_transactions(&self) -> Vec<&Transaction> {
        self.blocks
            .iter()
            .flat_map(|block| block.transactions())
            .collect()
    }

    /// Transactions recorded in the chain with the given hash
    pub fn transactions_by_hash(&self, hash: &str) -> Vec<&Transaction> {
        self.blocks
            .iter()
            .flat_map(|block| block.transactions())
            .filter(|transaction| transaction.hash() == hash)
            .collect()
    }

    /// What `address` is already committed to spend in the pending queue
    ///
    /// Transfers count at the chain fee since the block overrides theirs.
    pub fn pending_outflow(&self, address: &Address) -> f64 {
        self.pending
            .iter()
            .filter(|transaction| transaction.from_address() == address)
            .map(|transaction| transaction.amount() + self.fee_for(transaction))
            .sum()
    }

    fn fee_for(&self, transaction: &Transaction) -> f64 {
        match transaction.kind() {
            TransactionKind::Transfer => self.transaction_fee,
            TransactionKind::Reward => 0.0,
        }
    }

    /// Adds a transaction to the pending queue
    ///
    /// The transaction must be valid, be a transfer signed by the key owning
    /// the sender address, be covered by the sender's unspent balance minus
    /// what the sender already has queued, and not already be in the chain
    /// or the queue.
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), BlockchainError> {
        let hash = transaction.hash().to_string();

        if !transaction.is_valid() {
            return Err(TransactionError::Invalid { hash }.into());
        }

        if transaction.is_reward() {
            return Err(TransactionError::RewardSubmitted { hash }.into());
        }

        let sender = transaction.from_address();
        if Address::from_public_key(transaction.from_public_key()) != *sender {
            return Err(TransactionError::Unauthorized {
                address: sender.clone(),
            }
            .into());
        }

        let balance = self
            .balances
            .balance(sender)
            .ok_or_else(|| TransactionError::NoBalance {
                address: sender.clone(),
            })?;

        let available = balance - self.pending_outflow(sender);
        let required = transaction.amount() + self.fee_for(&transaction);
        if available < required {
            return Err(TransactionError::InsufficientFunds {
                address: sender.clone(),
                required,
                available,
            }
            .into());
        }

        if !self.transactions_by_hash(&hash).is_empty() {
            return Err(TransactionError::AlreadyInChain { hash }.into());
        }

        if self
            .pending
            .iter()
            .any(|pending| pending.is_same_instance(&transaction))
        {
            return Err(TransactionError::AlreadyPending { hash }.into());
        }

        debug!("Queued {}", transaction);
        self.pending.push(transaction);

        Ok(())
    }

    /// Mines every pending transaction into a new block credited to `miner`,
    /// within the chain's mining budget
    pub fn mine_pending_transactions(&mut self, miner: &Address) -> Result<&Block, BlockchainError> {
        let budget = self.mining_budget.clone();
        self.mine_pending_transactions_with(miner, &budget)
    }

    /// Mines every pending transaction into a new block credited to `miner`
    ///
    /// On success the balance index is updated, `mining_reward` is minted to
    /// the issuer and the queue is reset to a single reward moving it from
    /// the issuer to `miner`, to be carried by the next block. If the block
    /// cannot be built or mined within `budget` the chain is left unchanged.
    pub fn mine_pending_transactions_with(
        &mut self,
        miner: &Address,
        budget: &MiningBudget,
    ) -> Result<&Block, BlockchainError> {
        let tip = self.tip();
        let mut block = Block::new(
            tip.hash().to_string(),
            self.pending.clone(),
            0,
            tip.height() + 1,
            miner.clone(),
            self.transaction_fee,
            self.difficulty,
        )?;

        block.mine_with(budget)?;

        self.apply_balances(&block);
        info!(
            "Appended block {} with {} transactions for {}",
            block.height(),
            block.transactions().len(),
            miner
        );
        self.blocks.push(block);

        let issuer = self.issuer.address();
        self.balances.credit(&issuer, self.mining_reward);
        debug!("Minted {} {} to {}", self.mining_reward, self.currency, issuer);

        self.pending = vec![Transaction::reward(
            &self.issuer,
            miner.clone(),
            self.mining_reward,
        )];

        Ok(self.tip())
    }

    // Rewards carry no fee, so both kinds move amount + fee the same way
    fn apply_balances(&mut self, block: &Block) {
        let beneficiary = block.beneficiary();

        for transaction in block.transactions() {
            self.balances
                .credit(transaction.from_address(), -transaction.total_amount());
            self.balances
                .credit(transaction.to_address(), transaction.amount());
            if transaction.fee() != 0.0 {
                self.balances.credit(beneficiary, transaction.fee());
            }
        }
    }

    /// Appends an already mined block without touching balances
    pub fn add_block(&mut self, block: Block) -> Result<(), BlockchainError> {
        if let Some(reason) = self.rejection_reason(&block) {
            warn!("Rejected block {}: {}", block.hash(), reason);
            return Err(BlockError::Invalid {
                hash: block.hash().to_string(),
                reason,
            }
            .into());
        }

        let tip_hash = self.tip().hash();
        if block.prev_hash() != tip_hash {
            return Err(BlockError::BrokenLink {
                hash: block.hash().to_string(),
                expected: tip_hash.to_string(),
                found: block.prev_hash().to_string(),
            }
            .into());
        }

        info!("Appended block {} at height {}", block.hash(), block.height());
        self.blocks.push(block);
        Ok(())
    }

    fn rejection_reason(&self, block: &Block) -> Option<String> {
        if !block.has_valid_hash() {
            return Some("hash does not match header".to_string());
        }
        if !block.has_valid_padding() {
            return Some(format!(
                "hash lacks the {} leading zeros of the block difficulty",
                block.difficulty()
            ));
        }
        if !has_leading_zeros(block.hash(), self.difficulty) {
            return Some(format!(
                "hash lacks the {} leading zeros of the chain difficulty",
                self.difficulty
            ));
        }
        if !block.has_valid_tree() {
            return Some("Merkle root does not match transactions".to_string());
        }
        block
            .transactions()
            .iter()
            .find(|transaction| !transaction.is_valid())
            .map(|transaction| format!("transaction {} is invalid", transaction.hash()))
    }

    /// Validates every block, its transactions and every link of the chain
    pub fn is_valid(&self) -> bool {
        for (position, block) in self.blocks.iter().enumerate() {
            if let Some(reason) = self.rejection_reason(block) {
                warn!("Block {} is invalid: {}", position, reason);
                return false;
            }
        }

        for pair in self.blocks.windows(2) {
            if pair[1].prev_hash() != pair[0].hash() {
                warn!(
                    "Block {} does not link to {}",
                    pair[1].hash(),
                    pair[0].hash()
                );
                return false;
            }
        }

        true
    }

    /// Credits `amount` to `address` outside of any block
    ///
    /// Used to seed balances when bootstrapping a ledger.
    pub fn allocate(&mut self, address: &Address, amount: f64) -> f64 {
        self.balances.credit(address, amount);
        info!("Allocated {} {} to {}", amount, self.currency, address);
        self.balances.balance(address).unwrap_or(amount)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn balances(&self) -> &BalanceIndex {
        &self.balances
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn transaction_fee(&self) -> f64 {
        self.transaction_fee
    }

    pub fn issuer_address(&self) -> Address {
        self.issuer.address()
    }

    pub fn mining_budget(&self) -> &MiningBudget {
        &self.mining_budget
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }

    #[cfg(test)]
    pub(crate) fn set_difficulty(&mut self, difficulty: usize) {
        self.difficulty = difficulty;
    }
}
