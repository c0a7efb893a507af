//! Orders, payment requests and the state machine that keeps them consistent.

pub mod memory;
pub mod repository;
pub mod service;

pub use memory::{InMemoryOrderRepository, InMemoryPaymentRepository, InMemoryProductCatalog};
pub use repository::{
    OrderRepository, OrderStatusChange, PaymentRepository, ProductCatalog, RepositoryError,
};
pub use service::{
    OrderLine, PaymentError, PaymentPolicy, PaymentRequestOutcome, PaymentStateMachine,
    MAX_CAS_ATTEMPTS,
};
