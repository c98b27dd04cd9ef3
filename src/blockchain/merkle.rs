//! Binary Merkle commitment over an ordered list of leaf digests.
//!
//! Inner nodes are `SHA-256(left_hex || right_hex)`. When a layer has an odd
//! number of nodes the last one is promoted to the next layer unchanged, so
//! its proof simply has no step for that layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::digest::{sha256_hex, sha3_hex};
use super::transaction::Transaction;

/// Errors that can occur while building or querying a Merkle tree
#[derive(Debug, Error, PartialEq)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree without leaves")]
    EmptyInput,

    #[error("Leaf {leaf} is not part of the tree")]
    NotFound { leaf: String },
}

/// Which side of the running hash the sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProofStep {
    pub sibling: String,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MerkleTree {
    /// `layers[0]` holds the leaves, the last layer holds only the root
    layers: Vec<Vec<String>>,
}

/// Leaf digest of a transaction: SHA3-256 over its hash, fee, signature and kind
pub fn leaf_digest(transaction: &Transaction) -> String {
    let fee = transaction.fee().to_string();
    let signature = transaction
        .signature()
        .map(|signature| signature.0.as_str())
        .unwrap_or_default();

    sha3_hex(&[
        transaction.hash(),
        fee.as_str(),
        signature,
        transaction.kind().tag(),
    ])
}

fn hash_pair(left: &str, right: &str) -> String {
    sha256_hex(&[left, right])
}

impl MerkleTree {
    /// Builds the tree bottom-up from `leaves`, keeping their order
    pub fn build(leaves: Vec<String>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyInput);
        }

        let mut layers = vec![leaves];
        while let Some(layer) = layers.last().filter(|layer| layer.len() > 1) {
            let next = layer
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [lone] => lone.clone(),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            layers.push(next);
        }

        Ok(MerkleTree { layers })
    }

    /// Builds the tree over the leaf digests of `transactions`
    pub fn from_transactions(transactions: &[Transaction]) -> Result<Self, MerkleError> {
        Self::build(transactions.iter().map(leaf_digest).collect())
    }

    pub fn root(&self) -> &str {
        // build() never produces an empty layer
        &self.layers[self.layers.len() - 1][0]
    }

    pub fn leaves(&self) -> &[String] {
        &self.layers[0]
    }

    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Number of layers, leaves and root included
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Inclusion proof for the first occurrence of `leaf`, ordered from the leaf upward
    pub fn proof(&self, leaf: &str) -> Result<Vec<ProofStep>, MerkleError> {
        let index = self
            .leaves()
            .iter()
            .position(|candidate| candidate == leaf)
            .ok_or_else(|| MerkleError::NotFound {
                leaf: leaf.to_string(),
            })?;

        Ok(self.proof_at(index))
    }

    fn proof_at(&self, mut index: usize) -> Vec<ProofStep> {
        let mut steps = Vec::with_capacity(self.depth());

        for layer in &self.layers[..self.layers.len() - 1] {
            if index % 2 == 1 {
                steps.push(ProofStep {
                    sibling: layer[index - 1].clone(),
                    side: Side::Left,
                });
            } else if let Some(sibling) = layer.get(index + 1) {
                steps.push(ProofStep {
                    sibling: sibling.clone(),
                    side: Side::Right,
                });
            }
            index /= 2;
        }

        steps
    }

    /// Recomputes the path from `leaf` through `proof` and compares it with `root`
    pub fn verify(leaf: &str, proof: &[ProofStep], root: &str) -> bool {
        let computed = proof.iter().fold(leaf.to_string(), |acc, step| match step.side {
            Side::Left => hash_pair(&step.sibling, &acc),
            Side::Right => hash_pair(&acc, &step.sibling),
        });

        computed == root
    }

    /// Checks every leaf's proof against the root
    pub fn verify_all(&self) -> bool {
        let root = self.root();
        self.leaves()
            .iter()
            .enumerate()
            .all(|(index, leaf)| Self::verify(leaf, &self.proof_at(index), root))
    }
}
