// API module
//
// HTTP interface to a shared ledger. Handlers lock the chain for the whole
// request, so requests are applied one at a time.

pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use handlers::BlockchainData;
pub use routes::configure_routes;
