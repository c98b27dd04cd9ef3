use log::warn;
use thiserror::Error;

use std::fmt;

use super::account::BalanceIndex;
use super::chain::Blockchain;
use super::crypto::{generate_key_pair, Address, KeyPair, PublicKey, SecretKey};
use super::digest::sha256_hex;
use super::transaction::{Transaction, ValidationError};

/// Failed password checks tolerated before the secret key is locked
pub const MAX_SECRET_KEY_ATTEMPTS: u32 = 3;

/// Errors raised when the wallet password is checked
#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Wrong password for wallet {address} ({attempts} failed attempts)")]
    WrongPassword { address: Address, attempts: u32 },

    #[error("Secret key of wallet {address} is locked after {} failed attempts", MAX_SECRET_KEY_ATTEMPTS)]
    AttemptsExceeded { address: Address },
}

/// Errors that can occur while the wallet builds a transaction
#[derive(Debug, Error, PartialEq)]
pub enum WalletError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Transactions recorded in the chain that involve one address
#[derive(Debug, Default)]
pub struct TransactionHistory<'a> {
    pub incoming: Vec<&'a Transaction>,
    pub outgoing: Vec<&'a Transaction>,
}

/// Password-protected key pair
///
/// The secret key is only handed out after the password is checked. After
/// [`MAX_SECRET_KEY_ATTEMPTS`] failures it stays locked until [`Wallet::reset`]
/// succeeds.
pub struct Wallet {
    key_pair: KeyPair,
    address: Address,
    password_hash: String,
    failed_attempts: u32,
}

impl Wallet {
    /// Creates a wallet with a random key pair
    pub fn new(password: &str) -> Self {
        Self::from_key_pair(generate_key_pair(), password)
    }

    pub fn from_key_pair(key_pair: KeyPair, password: &str) -> Self {
        let address = key_pair.address();
        Wallet {
            key_pair,
            address,
            password_hash: sha256_hex(&[password]),
            failed_attempts: 0,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    fn matches(&self, password: &str) -> bool {
        sha256_hex(&[password]) == self.password_hash
    }

    /// Gets the secret key, counting failed password checks
    pub fn secret_key(&mut self, password: &str) -> Result<&SecretKey, AuthError> {
        if self.failed_attempts >= MAX_SECRET_KEY_ATTEMPTS {
            return Err(AuthError::AttemptsExceeded {
                address: self.address.clone(),
            });
        }

        if !self.matches(password) {
            self.failed_attempts += 1;
            warn!(
                "Secret key recovery attempted on {} ({} attempts)",
                self.address, self.failed_attempts
            );
            return Err(AuthError::WrongPassword {
                address: self.address.clone(),
                attempts: self.failed_attempts,
            });
        }

        Ok(&self.key_pair.secret_key)
    }

    /// Clears the failed attempt counter
    pub fn reset(&mut self, password: &str) -> Result<(), AuthError> {
        if !self.matches(password) {
            return Err(AuthError::WrongPassword {
                address: self.address.clone(),
                attempts: self.failed_attempts,
            });
        }
        self.failed_attempts = 0;
        Ok(())
    }

    pub fn sign_transaction(
        &mut self,
        transaction: &mut Transaction,
        password: &str,
    ) -> Result<(), AuthError> {
        let secret_key = self.secret_key(password)?;
        transaction.sign(secret_key);
        Ok(())
    }

    /// Builds and signs a transfer from this wallet
    pub fn create_transaction(
        &mut self,
        to_address: Address,
        amount: f64,
        fee: f64,
        password: &str,
    ) -> Result<Transaction, WalletError> {
        let mut transaction = Transaction::new(
            self.address.clone(),
            self.key_pair.public_key.clone(),
            to_address,
            amount,
            fee,
        )?;
        self.sign_transaction(&mut transaction, password)?;
        Ok(transaction)
    }

    /// Balance recorded in the index, if the address has an entry
    pub fn unspent_balance(&self, balances: &BalanceIndex) -> Option<f64> {
        balances.balance(&self.address)
    }

    /// Replays every block of `chain` to compute this wallet's balance
    ///
    /// Credits made outside of blocks are not part of the history and are
    /// not counted: issuer supply, allocations and the reward minted to the
    /// issuer by each mining run.
    pub fn calculate_balance(&self, chain: &Blockchain) -> f64 {
        let mut balance = 0.0;

        for block in chain.blocks() {
            let is_beneficiary = *block.beneficiary() == self.address;

            for transaction in block.transactions() {
                if *transaction.to_address() == self.address {
                    balance += transaction.amount();
                }
                if *transaction.from_address() == self.address {
                    balance -= transaction.total_amount();
                }
                if is_beneficiary {
                    balance += transaction.fee();
                }
            }
        }

        balance
    }

    pub fn history<'a>(&self, chain: &'a Blockchain) -> TransactionHistory<'a> {
        let mut history = TransactionHistory::default();

        for transaction in chain.all_transactions() {
            if *transaction.to_address() == self.address {
                history.incoming.push(transaction);
            }
            if *transaction.from_address() == self.address {
                history.outgoing.push(transaction);
            }
        }

        history
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wallet(address={}, publicKey={})",
            self.address, self.key_pair.public_key.0
        )
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("failed_attempts", &self.failed_attempts)
            .finish_non_exhaustive()
    }
}
