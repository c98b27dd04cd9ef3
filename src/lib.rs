//! Single-process proof-of-work ledger.
//!
//! Signed transfers are queued on a [`Blockchain`](blockchain::Blockchain),
//! committed to blocks through a Merkle tree and sealed by a nonce search.
//! Balances are kept in an index updated as blocks are mined.

pub mod api;
pub mod blockchain;
pub mod config;
