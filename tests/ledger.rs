//! End-to-end ledger scenarios through the public library API

use std::thread;
use std::time::Duration;

use powledger::blockchain::digest::sha3_hex;
use powledger::blockchain::{
    generate_key_pair, Block, BlockError, Blockchain, BlockchainError, KeyPair, MerkleTree,
    Transaction, TransactionError,
};
use powledger::config::LedgerConfig;

fn config() -> LedgerConfig {
    LedgerConfig {
        difficulty: 2,
        issuer_supply: 1_000.0,
        ..LedgerConfig::default()
    }
}

fn signed_transfer(sender: &KeyPair, to: &KeyPair, amount: f64) -> Transaction {
    let mut transaction = Transaction::new(
        sender.address(),
        sender.public_key.clone(),
        to.address(),
        amount,
        1.0,
    )
    .expect("complete transaction");
    transaction.sign(&sender.secret_key);
    transaction
}

#[test]
fn genesis_only_chain() {
    let chain = Blockchain::new(&config(), generate_key_pair()).expect("chain");

    assert_eq!(chain.size(), 1);
    assert!(chain.is_valid());
    assert_eq!(
        chain.get_block(-1).unwrap().hash(),
        chain.get_block(0).unwrap().hash()
    );
    assert!(chain.get_block(0).unwrap().hash().starts_with("00"));
}

#[test]
fn overdraft_is_rejected() {
    let issuer = generate_key_pair();
    let mut chain = Blockchain::new(&config(), issuer.clone()).expect("chain");
    let recipient = generate_key_pair();

    let err = chain
        .add_transaction(signed_transfer(&issuer, &recipient, 5_000.0))
        .unwrap_err();

    assert!(matches!(
        err,
        BlockchainError::Transaction(TransactionError::InsufficientFunds { .. })
    ));
    assert!(chain.pending_transactions().is_empty());
}

#[test]
fn identical_transfers_at_different_times_are_both_pending() {
    let issuer = generate_key_pair();
    let mut chain = Blockchain::new(&config(), issuer.clone()).expect("chain");
    let recipient = generate_key_pair();

    let first = signed_transfer(&issuer, &recipient, 10.0);
    thread::sleep(Duration::from_millis(2));
    let second = signed_transfer(&issuer, &recipient, 10.0);
    assert_ne!(first.hash(), second.hash());

    chain.add_transaction(first).unwrap();
    chain.add_transaction(second).unwrap();

    assert_eq!(chain.pending_transactions().len(), 2);
}

#[test]
fn merkle_proof_over_three_leaves() {
    let leaves: Vec<String> = ["a", "b", "c"].iter().map(|item| sha3_hex(&[item])).collect();
    let tree = MerkleTree::build(leaves.clone()).unwrap();

    let proof = tree.proof(&leaves[1]).unwrap();
    assert!(MerkleTree::verify(&leaves[1], &proof, tree.root()));

    let stranger = sha3_hex(&["d"]);
    assert!(tree.proof(&stranger).is_err());
    assert!(!MerkleTree::verify(&stranger, &proof, tree.root()));
}

#[test]
fn unlinked_block_is_rejected() {
    let issuer = generate_key_pair();
    let mut chain = Blockchain::new(&config(), issuer.clone()).expect("chain");

    let mut block = Block::new(
        "f".repeat(64),
        Vec::new(),
        0,
        1,
        issuer.address(),
        1.0,
        chain.difficulty(),
    )
    .unwrap();
    block.mine();

    let err = chain.add_block(block).unwrap_err();

    assert!(matches!(err, BlockchainError::Block(BlockError::BrokenLink { .. })));
    assert_eq!(chain.size(), 1);
    assert!(chain.is_valid());
}

#[test]
fn each_mining_run_adds_exactly_the_reward() {
    let issuer = generate_key_pair();
    let mut chain = Blockchain::new(&config(), issuer.clone()).expect("chain");
    let alice = generate_key_pair();
    let bob = generate_key_pair();
    let miner = generate_key_pair();
    let reward = chain.mining_reward();

    chain.add_transaction(signed_transfer(&issuer, &alice, 100.0)).unwrap();
    chain.mine_pending_transactions(&miner.address()).unwrap();
    assert_eq!(chain.balances().total(), 1_000.0 + reward);

    thread::sleep(Duration::from_millis(2));
    chain.add_transaction(signed_transfer(&alice, &bob, 40.0)).unwrap();
    chain.mine_pending_transactions(&miner.address()).unwrap();

    let balances = chain.balances();
    assert_eq!(balances.balance(&issuer.address()), Some(899.0 + reward));
    assert_eq!(balances.balance(&alice.address()), Some(59.0));
    assert_eq!(balances.balance(&bob.address()), Some(40.0));
    // two fees plus the reward queued by the first run
    assert_eq!(balances.balance(&miner.address()), Some(2.0 + reward));
    assert_eq!(balances.total(), 1_000.0 + 2.0 * reward);

    assert_eq!(chain.size(), 3);
    assert!(chain.is_valid());
}

#[test]
fn queued_transfers_cannot_overspend() {
    let issuer = generate_key_pair();
    let mut chain = Blockchain::new(&config(), issuer.clone()).expect("chain");
    let sender = generate_key_pair();
    let recipient = generate_key_pair();
    chain.allocate(&sender.address(), 100.0);

    chain.add_transaction(signed_transfer(&sender, &recipient, 90.0)).unwrap();
    for _ in 0..2 {
        thread::sleep(Duration::from_millis(2));
        let err = chain
            .add_transaction(signed_transfer(&sender, &recipient, 90.0))
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::Transaction(TransactionError::InsufficientFunds { .. })
        ));
    }

    chain.mine_pending_transactions(&issuer.address()).unwrap();
    assert_eq!(chain.balances().balance(&sender.address()), Some(9.0));
    assert_eq!(chain.balances().balance(&recipient.address()), Some(90.0));
}
