use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Mutex;
use std::time::Duration;

use powledger::api;
use powledger::api::handlers::MiningTimeout;
use powledger::blockchain::{self, Blockchain};
use powledger::config::LedgerConfig;

const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

// Read the configuration file named by LEDGER_CONFIG
fn load_config() -> anyhow::Result<LedgerConfig> {
    let path = std::env::var("LEDGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    LedgerConfig::load_or_default(&path)
        .with_context(|| format!("failed to load configuration from {}", path))
}

fn initialize_blockchain(config: &LedgerConfig) -> anyhow::Result<Blockchain> {
    let issuer = config.issuer_key_pair()?;
    if config.issuer_secret_key.is_none() {
        // Generated keys are lost on exit; print it so the supply can be spent
        info!("Issuer secret key: {}", issuer.secret_key.to_hex());
    }

    let chain = Blockchain::new(config, issuer).context("failed to create the genesis block")?;
    info!(
        "Issuer {} holds {} {}",
        chain.issuer_address(),
        config.issuer_supply,
        chain.currency()
    );

    Ok(chain)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_block,
        api::handlers::get_transaction_proof,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::fund_wallet,
        api::handlers::get_wallet_balance,
        api::handlers::get_all_accounts,
        api::handlers::get_snapshot
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::TransactionKind,
            blockchain::Account,
            blockchain::ChainSnapshot,
            blockchain::ProofStep,
            blockchain::Side,
            blockchain::crypto::Address,
            blockchain::crypto::PublicKey,
            blockchain::crypto::DigitalSignature,
            api::schema::ChainResponse,
            api::schema::TransactionRequest,
            api::schema::TransactionResponse,
            api::schema::MineRequest,
            api::schema::MineResponse,
            api::schema::WalletResponse,
            api::schema::FundWalletRequest,
            api::schema::BalanceResponse,
            api::schema::ProofResponse,
            api::schema::ErrorResponse
        )
    ),
    tags(
        (name = "ledger", description = "Proof-of-work ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "0.1.0",
        description = "A single-process proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = load_config()?;
    let blockchain = web::Data::new(Mutex::new(initialize_blockchain(&config)?));
    let mining_timeout = web::Data::new(MiningTimeout(Duration::from_secs(
        config.mining_timeout_secs,
    )));

    info!("Starting HTTP server at http://localhost:8080");

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .app_data(mining_timeout.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(("127.0.0.1", 8080))?
    .run()
    .await?;

    Ok(())
}
