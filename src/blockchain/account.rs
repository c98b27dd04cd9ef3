use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::collections::HashMap;

use super::crypto::Address;

/// A single entry of the balance index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// The account's address
    pub address: Address,

    /// The account's unspent balance
    pub balance: f64,
}

/// Running per-address balance ledger ("unspent pool")
///
/// An address without an entry has no unspent balance at all, which is
/// different from an entry holding zero. Balances are signed: bookkeeping may
/// take an entry below zero even though submission checks prevent overdrafts.
///
/// The index is not synchronized. Callers sharing it must serialize calls to
/// [`BalanceIndex::credit`] themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceIndex {
    balances: HashMap<Address, f64>,
}

impl BalanceIndex {
    /// Creates an empty balance index
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` (possibly negative) to the balance of `address`,
    /// creating the entry if it does not exist yet
    pub fn credit(&mut self, address: &Address, delta: f64) {
        *self.balances.entry(address.clone()).or_insert(0.0) += delta;
    }

    /// Returns the balance of `address`, or `None` if it has no entry
    pub fn balance(&self, address: &Address) -> Option<f64> {
        self.balances.get(address).copied()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.balances.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Sum of every balance in the index
    pub fn total(&self) -> f64 {
        self.balances.values().sum()
    }

    /// Returns every entry, ordered by address
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .balances
            .iter()
            .map(|(address, balance)| Account {
                address: address.clone(),
                balance: *balance,
            })
            .collect();
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        accounts
    }
}

impl FromIterator<(Address, f64)> for BalanceIndex {
    fn from_iter<I: IntoIterator<Item = (Address, f64)>>(iter: I) -> Self {
        let mut index = BalanceIndex::new();
        for (address, amount) in iter {
            index.credit(&address, amount);
        }
        index
    }
}
