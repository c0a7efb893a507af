pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod memory;
pub mod payments;
pub mod workflow;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use config::{AppConfig, CheckpointBackend, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::conversation::{
    ConversationState, Intent, Message, Role, SessionId, StateUpdate, TurnContext,
};
pub use domain::order::{Order, OrderId, OrderItem, OrderStatus};
pub use domain::payment::{PaymentRequest, PaymentStatus, TransactionId};
pub use domain::product::{Product, ProductId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use memory::{MemorySettings, SessionMemoryManager};
pub use payments::{
    OrderLine, PaymentError, PaymentPolicy, PaymentRequestOutcome, PaymentStateMachine,
};
pub use workflow::{GraphBuilder, GraphState, Node, NodeError, Workflow, END};
