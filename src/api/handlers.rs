use actix_web::rt::time::timeout;
use actix_web::{web, HttpResponse, Responder};
use log::{error, info, warn};

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::schema::{
    BalanceResponse, ChainResponse, ErrorResponse, FundWalletRequest, MineRequest, MineResponse,
    ProofResponse, TransactionRequest, TransactionResponse, WalletResponse,
};
use crate::blockchain::{
    generate_key_pair, Account, Address, Block, BlockError, Blockchain, BlockchainError,
    CancelToken, ChainSnapshot, KeyPair, MerkleTree, SecretKey, Transaction,
};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Mutex<Blockchain>>;

/// How long `/mine` may search for a nonce before the search is cancelled
#[derive(Debug, Clone, Copy)]
pub struct MiningTimeout(pub Duration);

impl Default for MiningTimeout {
    fn default() -> Self {
        MiningTimeout(Duration::from_secs(30))
    }
}

enum MiningFailure {
    Poisoned,
    Chain(BlockchainError),
}

fn lock(blockchain: &BlockchainData) -> Result<MutexGuard<'_, Blockchain>, HttpResponse> {
    blockchain.lock().map_err(|_| {
        error!("Blockchain lock is poisoned");
        HttpResponse::InternalServerError().json(ErrorResponse::new("Blockchain state is unavailable"))
    })
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = match lock(&blockchain) {
        Ok(chain) => chain,
        Err(response) => return response,
    };

    let response = ChainResponse {
        length: chain.size(),
        chain: chain.blocks().to_vec(),
        is_valid: chain.is_valid(),
        difficulty: chain.difficulty(),
        currency: chain.currency().to_string(),
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    match lock(&blockchain) {
        Ok(chain) => HttpResponse::Ok().json(chain.pending_transactions()),
        Err(response) => response,
    }
}

/// Create a new transaction
///
/// Signs a transfer with the given secret key and queues it
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let key_pair = match SecretKey::from_hex(&transaction_req.private_key) {
        Ok(secret_key) => KeyPair::from_secret_key(secret_key),
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new(format!("Invalid private key: {}", err)));
        }
    };

    // Check if the key owns the sender address
    if key_pair.address().as_str() != transaction_req.sender {
        return HttpResponse::BadRequest()
            .json(ErrorResponse::new("Private key does not match sender address"));
    }

    let mut transaction = match Transaction::new(
        key_pair.address(),
        key_pair.public_key.clone(),
        Address(transaction_req.recipient.clone()),
        transaction_req.amount,
        transaction_req.fee,
    ) {
        Ok(transaction) => transaction,
        Err(err) => return HttpResponse::BadRequest().json(ErrorResponse::new(err)),
    };
    transaction.sign(&key_pair.secret_key);
    let hash = transaction.hash().to_string();

    let mut chain = match lock(&blockchain) {
        Ok(chain) => chain,
        Err(response) => return response,
    };

    match chain.add_transaction(transaction) {
        Ok(()) => {
            let response = TransactionResponse {
                message: "Transaction will be added to Block".to_string(),
                hash,
                block_index: chain.tip().height() + 1,
            };

            HttpResponse::Created().json(response)
        }
        Err(err) => HttpResponse::BadRequest()
            .json(ErrorResponse::new(format!("Failed to add transaction: {}", err))),
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid mining request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Mining gave up or timed out", body = ErrorResponse)
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    mining_timeout: Option<web::Data<MiningTimeout>>,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    if mine_req.miner_address.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("Miner address is required"));
    }

    let limit = mining_timeout.map(|data| *data.get_ref()).unwrap_or_default().0;
    let miner = Address(mine_req.miner_address.clone());
    let token = CancelToken::new();

    // The nonce search runs off the worker thread and holds the lock until it stops
    let search_token = token.clone();
    let search = web::block(move || {
        let mut chain = blockchain.lock().map_err(|_| MiningFailure::Poisoned)?;
        let budget = chain.mining_budget().clone().with_cancel_token(search_token);
        chain
            .mine_pending_transactions_with(&miner, &budget)
            .map(Block::clone)
            .map_err(MiningFailure::Chain)
    });

    match timeout(limit, search).await {
        Ok(Ok(Ok(block))) => {
            let response = MineResponse {
                message: "New Block Mined".to_string(),
                block,
            };

            HttpResponse::Ok().json(response)
        }
        Ok(Ok(Err(MiningFailure::Chain(
            err @ BlockchainError::Block(
                BlockError::MiningExhausted { .. } | BlockError::MiningCancelled { .. },
            ),
        )))) => HttpResponse::ServiceUnavailable()
            .json(ErrorResponse::new(format!("Failed to mine block: {}", err))),
        Ok(Ok(Err(MiningFailure::Chain(err)))) => HttpResponse::BadRequest()
            .json(ErrorResponse::new(format!("Failed to mine block: {}", err))),
        Ok(Ok(Err(MiningFailure::Poisoned))) => {
            error!("Blockchain lock is poisoned");
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Blockchain state is unavailable"))
        }
        Ok(Err(err)) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Mining task failed"))
        }
        Err(_) => {
            token.cancel();
            warn!("Mining cancelled after {:?}", limit);
            HttpResponse::ServiceUnavailable().json(ErrorResponse::new(format!(
                "Mining did not finish within {:?}",
                limit
            )))
        }
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    match lock(&blockchain) {
        Ok(chain) => HttpResponse::Ok().json(chain.is_valid()),
        Err(response) => response,
    }
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let key_pair = generate_key_pair();

    let response = WalletResponse {
        address: key_pair.address().0,
        public_key: key_pair.public_key.0.clone(),
        private_key: key_pair.secret_key.to_hex(),
    };

    HttpResponse::Created().json(response)
}

/// Fund a wallet
///
/// Adds funds to a wallet for testing
#[utoipa::path(
    post,
    path = "/api/v1/wallet/fund",
    request_body = FundWalletRequest,
    responses(
        (status = 200, description = "Wallet funded successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address or amount", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn fund_wallet(
    blockchain: BlockchainData,
    fund_req: web::Json<FundWalletRequest>,
) -> impl Responder {
    if fund_req.address.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("Address is required"));
    }
    if !(fund_req.amount > 0.0) || !fund_req.amount.is_finite() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
            "Amount must be positive: {}",
            fund_req.amount
        )));
    }

    let mut chain = match lock(&blockchain) {
        Ok(chain) => chain,
        Err(response) => return response,
    };

    let address = Address(fund_req.address.clone());
    let balance = chain.allocate(&address, fund_req.amount);
    info!("Funded {} with {}", address, fund_req.amount);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
        currency: chain.currency().to_string(),
    })
}

/// Get wallet balance
///
/// Returns the unspent balance of a wallet
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    params(
        ("address" = String, Path, description = "Wallet address")
    ),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse),
        (status = 404, description = "Address has no balance entry", body = ErrorResponse)
    )
)]
pub async fn get_wallet_balance(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> impl Responder {
    let wallet_address = Address(address.into_inner());

    let chain = match lock(&blockchain) {
        Ok(chain) => chain,
        Err(response) => return response,
    };

    match chain.balances().balance(&wallet_address) {
        Some(balance) => HttpResponse::Ok().json(BalanceResponse {
            address: wallet_address.0,
            balance,
            currency: chain.currency().to_string(),
        }),
        None => HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "No balance recorded for {}",
            wallet_address
        ))),
    }
}

/// Get all accounts
///
/// Returns every address in the balance index
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    responses(
        (status = 200, description = "Accounts retrieved successfully", body = Vec<Account>)
    )
)]
pub async fn get_all_accounts(blockchain: BlockchainData) -> impl Responder {
    match lock(&blockchain) {
        Ok(chain) => HttpResponse::Ok().json(chain.balances().accounts()),
        Err(response) => response,
    }
}

/// Get a block
///
/// Negative indices count from the tip, -1 being the latest block
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}",
    params(
        ("index" = isize, Path, description = "Block position")
    ),
    responses(
        (status = 200, description = "Block retrieved successfully", body = Block),
        (status = 404, description = "No block at this position", body = ErrorResponse)
    )
)]
pub async fn get_block(blockchain: BlockchainData, index: web::Path<isize>) -> impl Responder {
    let chain = match lock(&blockchain) {
        Ok(chain) => chain,
        Err(response) => return response,
    };

    match chain.get_block(index.into_inner()) {
        Ok(block) => HttpResponse::Ok().json(block),
        Err(err) => HttpResponse::NotFound().json(ErrorResponse::new(err)),
    }
}

/// Get a transaction inclusion proof
///
/// Returns the Merkle path of a transaction of a block
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}/proof/{position}",
    params(
        ("index" = isize, Path, description = "Block position"),
        ("position" = usize, Path, description = "Transaction position in the block")
    ),
    responses(
        (status = 200, description = "Proof computed successfully", body = ProofResponse),
        (status = 404, description = "No such block or transaction", body = ErrorResponse)
    )
)]
pub async fn get_transaction_proof(
    blockchain: BlockchainData,
    path: web::Path<(isize, usize)>,
) -> impl Responder {
    let (index, position) = path.into_inner();

    let chain = match lock(&blockchain) {
        Ok(chain) => chain,
        Err(response) => return response,
    };

    let block = match chain.get_block(index) {
        Ok(block) => block,
        Err(err) => return HttpResponse::NotFound().json(ErrorResponse::new(err)),
    };

    match block.transaction_proof(position) {
        Some((leaf, proof)) => {
            let root = block.merkle_root().to_string();
            let verified = MerkleTree::verify(&leaf, &proof, &root);

            HttpResponse::Ok().json(ProofResponse {
                leaf,
                proof,
                root,
                verified,
            })
        }
        None => HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Block {} has no transaction at position {}",
            block.height(),
            position
        ))),
    }
}

/// Export the ledger
///
/// Returns blocks, pending transactions, balances and settings
#[utoipa::path(
    get,
    path = "/api/v1/snapshot",
    responses(
        (status = 200, description = "Snapshot exported successfully", body = ChainSnapshot)
    )
)]
pub async fn get_snapshot(blockchain: BlockchainData) -> impl Responder {
    match lock(&blockchain) {
        Ok(chain) => HttpResponse::Ok().json(chain.snapshot()),
        Err(response) => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::LedgerConfig;
    use actix_web::{http::StatusCode, test, App};

    fn test_data() -> BlockchainData {
        let config = LedgerConfig {
            difficulty: 1,
            issuer_supply: 0.0,
            ..LedgerConfig::default()
        };
        let chain = Blockchain::new(&config, generate_key_pair()).unwrap();
        web::Data::new(Mutex::new(chain))
    }

    #[actix_web::test]
    async fn test_mine_times_out_and_releases_chain() {
        let data = test_data();
        data.lock().unwrap().set_difficulty(64);
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .app_data(web::Data::new(MiningTimeout(Duration::from_millis(50))))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest {
                miner_address: "miner".to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        // the cancelled search gives the lock back without touching the chain
        let chain = data.lock().unwrap();
        assert_eq!(chain.size(), 1);
        assert!(chain.pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_get_chain() {
        let app = test::init_service(
            App::new().app_data(test_data()).configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let response: ChainResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(response.length, 1);
        assert!(response.is_valid);
        assert_eq!(response.currency, "XSC");
    }

    #[actix_web::test]
    async fn test_fund_transfer_and_mine() {
        let data = test_data();
        let app = test::init_service(
            App::new().app_data(data.clone()).configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let wallet: WalletResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/wallet/fund")
            .set_json(FundWalletRequest {
                address: wallet.address.clone(),
                amount: 50.0,
            })
            .to_request();
        let funded: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(funded.balance, 50.0);

        let recipient = generate_key_pair().address();
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: wallet.address.clone(),
                recipient: recipient.0.clone(),
                amount: 10.0,
                fee: 1.0,
                private_key: wallet.private_key.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest {
                miner_address: "miner".to_string(),
            })
            .to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined.block.height(), 1);
        assert_eq!(mined.block.transactions().len(), 1);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/wallet/balance/{}", wallet.address))
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance.balance, 39.0);

        let req = test::TestRequest::get().uri("/api/v1/accounts").to_request();
        let accounts: Vec<Account> = test::call_and_read_body_json(&app, req).await;
        // wallet, recipient, miner and the issuer holding the minted reward
        assert_eq!(accounts.len(), 4);

        let req = test::TestRequest::get().uri("/api/v1/blocks/-1/proof/0").to_request();
        let proof: ProofResponse = test::call_and_read_body_json(&app, req).await;
        assert!(proof.verified);

        assert!(data.lock().unwrap().is_valid());
    }

    #[actix_web::test]
    async fn test_rejects_bad_requests() {
        let app = test::init_service(
            App::new().app_data(test_data()).configure(configure_routes),
        )
        .await;

        // key does not own the sender address
        let key_pair = generate_key_pair();
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: "someone-else".to_string(),
                recipient: "recipient".to_string(),
                amount: 1.0,
                fee: 0.0,
                private_key: key_pair.secret_key.to_hex(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // unfunded sender
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: key_pair.address().0,
                recipient: "recipient".to_string(),
                amount: 1.0,
                fee: 0.0,
                private_key: key_pair.secret_key.to_hex(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/wallet/fund")
            .set_json(FundWalletRequest {
                address: "someone".to_string(),
                amount: -5.0,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/v1/wallet/balance/nobody").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/v1/blocks/7").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_block_and_snapshot() {
        let app = test::init_service(
            App::new().app_data(test_data()).configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/blocks/-1").to_request();
        let block: Block = test::call_and_read_body_json(&app, req).await;
        assert!(block.is_genesis());

        let req = test::TestRequest::get().uri("/api/v1/snapshot").to_request();
        let snapshot: ChainSnapshot = test::call_and_read_body_json(&app, req).await;
        assert_eq!(snapshot.blocks.len(), 1);
        assert_eq!(snapshot.blocks[0].hash(), block.hash());
    }
}
