pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, OrderFlow, PaymentFlow};
pub use states::{FlowAction, FlowEvent, FlowType, TransitionOutcome};
