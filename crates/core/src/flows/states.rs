use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    Order,
    Payment,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Payment => "payment",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    PaymentRequested,
    PaymentConfirmed,
    PaymentFailed,
    CancelRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    /// A confirmed payment must carry its linked order to paid.
    PropagatePaid,
    /// The order's live payment request must be cancelled first.
    CancelLivePayment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome<S> {
    pub from: S,
    pub to: S,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
