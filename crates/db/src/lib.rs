pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod stores;

pub use connection::{connect, connect_from_config, connect_with_settings, ping, DbPool};
pub use fixtures::{DemoCatalog, SeedResult, VerificationResult};
pub use repositories::{
    SqlCheckpointStore, SqlOrderRepository, SqlPaymentRepository, SqlProductCatalog,
};
pub use stores::{checkpoint_store, payment_state_machine};
