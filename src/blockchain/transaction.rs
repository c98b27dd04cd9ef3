use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use std::fmt;

use super::crypto::{self, Address, DigitalSignature, KeyPair, PublicKey, SecretKey};
use super::digest::sha256_hex;

/// Errors raised while constructing a transaction
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Missing sender address")]
    MissingSenderAddress,

    #[error("Missing sender public key")]
    MissingSenderKey,

    #[error("Missing recipient address")]
    MissingRecipientAddress,
}

/// Errors raised when a transaction is rejected
#[derive(Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("Invalid transaction {hash} (bad hash, signature, amount or fee)")]
    Invalid { hash: String },

    #[error("Reward transaction {hash} can only be issued by the chain")]
    RewardSubmitted { hash: String },

    #[error("Public key does not own sender address {address}")]
    Unauthorized { address: Address },

    #[error("Sender {address} has no unspent coins")]
    NoBalance { address: Address },

    #[error("Insufficient funds for {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: Address,
        required: f64,
        available: f64,
    },

    #[error("Transaction {hash} is already in the blockchain")]
    AlreadyInChain { hash: String },

    #[error("Transaction {hash} is already pending")]
    AlreadyPending { hash: String },

    #[error("Transaction {hash} is already in the block")]
    AlreadyInBlock { hash: String },
}

/// What a transaction does to the balance index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TransactionKind {
    /// Moves `amount` from sender to recipient, `fee` to the block beneficiary
    Transfer,

    /// Mints `amount` to the recipient; signed by the issuing authority
    Reward,
}

impl TransactionKind {
    pub fn tag(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Reward => "reward",
        }
    }
}

/// A signed transfer of value between two addresses
///
/// The hash covers sender, recipient, amount and timestamp. The fee is not
/// part of it, so the enclosing block may overwrite the fee after signing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    from_address: Address,

    to_address: Address,

    amount: f64,

    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    from_public_key: PublicKey,

    fee: f64,

    kind: TransactionKind,

    #[serde(default)]
    signature: Option<DigitalSignature>,

    hash: String,

    /// Instance identity; value-equal transactions keep distinct ids
    #[schema(value_type = String)]
    id: Uuid,
}

impl Transaction {
    /// Creates a new unsigned transfer
    ///
    /// # Arguments
    ///
    /// * `from_address` - The address of the sender
    /// * `from_public_key` - The sender's public key, used to verify the signature
    /// * `to_address` - The address of the recipient
    /// * `amount` - The amount to transfer
    /// * `fee` - The transaction fee
    pub fn new(
        from_address: Address,
        from_public_key: PublicKey,
        to_address: Address,
        amount: f64,
        fee: f64,
    ) -> Result<Self, ValidationError> {
        if from_address.is_empty() {
            return Err(ValidationError::MissingSenderAddress);
        }
        if from_public_key.is_empty() {
            return Err(ValidationError::MissingSenderKey);
        }
        if to_address.is_empty() {
            return Err(ValidationError::MissingRecipientAddress);
        }

        Ok(Self::build(
            from_address,
            from_public_key,
            to_address,
            amount,
            fee,
            TransactionKind::Transfer,
        ))
    }

    /// Creates a signed reward minted by `issuer` for `to_address`
    pub fn reward(issuer: &KeyPair, to_address: Address, amount: f64) -> Self {
        let mut transaction = Self::build(
            issuer.address(),
            issuer.public_key.clone(),
            to_address,
            amount,
            0.0,
            TransactionKind::Reward,
        );
        transaction.sign(&issuer.secret_key);
        transaction
    }

    fn build(
        from_address: Address,
        from_public_key: PublicKey,
        to_address: Address,
        amount: f64,
        fee: f64,
        kind: TransactionKind,
    ) -> Self {
        let mut transaction = Transaction {
            from_address,
            to_address,
            amount,
            timestamp: Utc::now(),
            from_public_key,
            fee,
            kind,
            signature: None,
            hash: String::new(),
            id: Uuid::new_v4(),
        };
        transaction.hash = transaction.calculate_hash();
        transaction
    }

    /// Recomputes the digest of sender, recipient, amount and timestamp
    pub fn calculate_hash(&self) -> String {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let amount = self.amount.to_string();

        sha256_hex(&[
            self.from_address.as_str(),
            self.to_address.as_str(),
            amount.as_str(),
            timestamp.as_str(),
        ])
    }

    /// Signs the transaction hash with `secret_key`, replacing any previous signature
    pub fn sign(&mut self, secret_key: &SecretKey) {
        self.signature = Some(crypto::sign(secret_key, self.hash.as_bytes()));
    }

    /// Checks that a signature is present and verifies over the hash
    pub fn has_valid_signature(&self) -> bool {
        match &self.signature {
            Some(signature) => crypto::verify(&self.from_public_key, self.hash.as_bytes(), signature),
            None => false,
        }
    }

    /// Hash matches its fields, signature verifies, amount is positive and fee non-negative
    pub fn is_valid(&self) -> bool {
        self.hash == self.calculate_hash()
            && self.has_valid_signature()
            && self.amount > 0.0
            && self.fee >= 0.0
    }

    /// Overrides the fee. The hash and signature are left untouched.
    pub fn set_fee(&mut self, fee: f64) {
        self.fee = fee;
    }

    /// Whether `other` is this very transaction (or a copy of it)
    pub fn is_same_instance(&self, other: &Transaction) -> bool {
        self.id == other.id
    }

    pub fn is_reward(&self) -> bool {
        self.kind == TransactionKind::Reward
    }

    /// Amount plus fee, i.e. what the sender is debited
    pub fn total_amount(&self) -> f64 {
        self.amount + self.fee
    }

    pub fn from_address(&self) -> &Address {
        &self.from_address
    }

    pub fn from_public_key(&self) -> &PublicKey {
        &self.from_public_key
    }

    pub fn to_address(&self) -> &Address {
        &self.to_address
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signature(&self) -> Option<&DigitalSignature> {
        self.signature.as_ref()
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction(kind={}, from={}, to={}, amount={}, fee={}, timestamp={}, hash={})",
            self.kind.tag(),
            self.from_address,
            self.to_address,
            self.amount,
            self.fee,
            self.timestamp.to_rfc3339(),
            self.hash
        )
    }
}
