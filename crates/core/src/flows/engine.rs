use std::fmt::Debug;

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::order::OrderStatus;
use crate::domain::payment::PaymentStatus;
use crate::flows::states::{FlowAction, FlowEvent, FlowType, TransitionOutcome};

/// Lifecycle status that a flow can move through.
pub trait FlowStatus: Clone + Debug + PartialEq {
    fn label(&self) -> &'static str;
}

impl FlowStatus for OrderStatus {
    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl FlowStatus for PaymentStatus {
    fn label(&self) -> &'static str {
        self.as_str()
    }
}

pub trait FlowDefinition {
    type State: FlowStatus;

    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> Self::State;
    fn transition(
        &self,
        current: &Self::State,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome<Self::State>, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct OrderFlow;

impl FlowDefinition for OrderFlow {
    type State = OrderStatus;

    fn flow_type(&self) -> FlowType {
        FlowType::Order
    }

    fn initial_state(&self) -> OrderStatus {
        OrderStatus::Pending
    }

    fn transition(
        &self,
        current: &OrderStatus,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome<OrderStatus>, FlowTransitionError> {
        use FlowAction::CancelLivePayment;
        use FlowEvent::{CancelRequested, PaymentConfirmed, PaymentRequested};
        use OrderStatus::{AwaitingPayment, Cancelled, Paid, Pending};

        let (to, actions) = match (current, event) {
            (Pending, PaymentRequested) => (AwaitingPayment, Vec::new()),
            // a failed request leaves the order awaiting a fresh one
            (AwaitingPayment, PaymentRequested) => (AwaitingPayment, Vec::new()),
            (AwaitingPayment, PaymentConfirmed) => (Paid, Vec::new()),
            (Pending, CancelRequested) => (Cancelled, Vec::new()),
            (AwaitingPayment, CancelRequested) => (Cancelled, vec![CancelLivePayment]),
            _ => return Err(FlowTransitionError::invalid(FlowType::Order, current, event)),
        };

        Ok(TransitionOutcome { from: current.clone(), to, event: *event, actions })
    }
}

#[derive(Clone, Debug, Default)]
pub struct PaymentFlow;

impl FlowDefinition for PaymentFlow {
    type State = PaymentStatus;

    fn flow_type(&self) -> FlowType {
        FlowType::Payment
    }

    fn initial_state(&self) -> PaymentStatus {
        PaymentStatus::Pending
    }

    fn transition(
        &self,
        current: &PaymentStatus,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome<PaymentStatus>, FlowTransitionError> {
        use FlowAction::PropagatePaid;
        use FlowEvent::{CancelRequested, PaymentConfirmed, PaymentFailed, PaymentRequested};
        use PaymentStatus::{AwaitingPayment, Cancelled, Failed, Paid, Pending};

        let (to, actions) = match (current, event) {
            (Pending, PaymentRequested) => (AwaitingPayment, Vec::new()),
            (AwaitingPayment, PaymentConfirmed) => (Paid, vec![PropagatePaid]),
            (Pending | AwaitingPayment, PaymentFailed) => (Failed, Vec::new()),
            (Pending | AwaitingPayment, CancelRequested) => (Cancelled, Vec::new()),
            _ => return Err(FlowTransitionError::invalid(FlowType::Payment, current, event)),
        };

        Ok(TransitionOutcome { from: current.clone(), to, event: *event, actions })
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> F::State {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &F::State,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome<F::State>, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &F::State,
        event: &FlowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome<F::State>, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let category = match self.flow_type() {
            FlowType::Order => AuditCategory::Order,
            FlowType::Payment => AuditCategory::Payment,
        };
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_applied",
                        category,
                        AuditOutcome::Success,
                    )
                    .with_metadata("flow", self.flow_type().as_str())
                    .with_metadata("from", outcome.from.label())
                    .with_metadata("to", outcome.to.label())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_rejected",
                        category,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("flow", self.flow_type().as_str())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<OrderFlow> {
    fn default() -> Self {
        Self::new(OrderFlow)
    }
}

impl Default for FlowEngine<PaymentFlow> {
    fn default() -> Self {
        Self::new(PaymentFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid {} transition from {state} using event {event:?}", flow.as_str())]
    InvalidTransition { flow: FlowType, state: String, event: FlowEvent },
}

impl FlowTransitionError {
    pub fn invalid<S: FlowStatus>(flow: FlowType, state: &S, event: &FlowEvent) -> Self {
        Self::InvalidTransition { flow, state: state.label().to_string(), event: *event }
    }

    pub fn state(&self) -> &str {
        match self {
            Self::InvalidTransition { state, .. } => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::order::{OrderId, OrderStatus};
    use crate::domain::payment::PaymentStatus;
    use crate::flows::engine::{FlowEngine, FlowTransitionError, OrderFlow, PaymentFlow};
    use crate::flows::states::{FlowAction, FlowEvent, FlowType};

    #[test]
    fn order_flow_happy_path_reaches_paid() {
        let engine = FlowEngine::new(OrderFlow);
        let mut state = engine.initial_state();

        state = engine
            .apply(&state, &FlowEvent::PaymentRequested)
            .expect("pending -> awaiting")
            .to;
        let paid = engine.apply(&state, &FlowEvent::PaymentConfirmed).expect("awaiting -> paid");

        assert_eq!(paid.to, OrderStatus::Paid);
        assert!(paid.actions.is_empty());
    }

    #[test]
    fn awaiting_order_may_request_payment_again() {
        let engine = FlowEngine::<OrderFlow>::default();
        let outcome = engine
            .apply(&OrderStatus::AwaitingPayment, &FlowEvent::PaymentRequested)
            .expect("re-request after failure");

        assert_eq!(outcome.to, OrderStatus::AwaitingPayment);
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn terminal_orders_reject_every_event() {
        let engine = FlowEngine::<OrderFlow>::default();
        for state in [OrderStatus::Paid, OrderStatus::Cancelled] {
            for event in [
                FlowEvent::PaymentRequested,
                FlowEvent::PaymentConfirmed,
                FlowEvent::PaymentFailed,
                FlowEvent::CancelRequested,
            ] {
                let error = engine.apply(&state, &event).expect_err("terminal state");
                assert!(matches!(
                    error,
                    FlowTransitionError::InvalidTransition { flow: FlowType::Order, .. }
                ));
            }
        }
    }

    #[test]
    fn pending_order_cannot_be_confirmed_directly() {
        let engine = FlowEngine::<OrderFlow>::default();
        let error = engine
            .apply(&OrderStatus::Pending, &FlowEvent::PaymentConfirmed)
            .expect_err("pending cannot jump to paid");

        assert_eq!(error.state(), "pending");
        assert_eq!(
            error.to_string(),
            "invalid order transition from pending using event PaymentConfirmed"
        );
    }

    #[test]
    fn cancelling_awaiting_order_cascades_to_payment() {
        let engine = FlowEngine::<OrderFlow>::default();
        let outcome = engine
            .apply(&OrderStatus::AwaitingPayment, &FlowEvent::CancelRequested)
            .expect("awaiting -> cancelled");

        assert_eq!(outcome.to, OrderStatus::Cancelled);
        assert!(outcome.actions.contains(&FlowAction::CancelLivePayment));
    }

    #[test]
    fn payment_flow_moves_from_pending_to_paid() {
        let engine = FlowEngine::new(PaymentFlow);
        let issued = engine
            .apply(&engine.initial_state(), &FlowEvent::PaymentRequested)
            .expect("pending -> awaiting");
        assert_eq!(issued.to, PaymentStatus::AwaitingPayment);

        let paid = engine.apply(&issued.to, &FlowEvent::PaymentConfirmed).expect("awaiting -> paid");
        assert_eq!(paid.to, PaymentStatus::Paid);
        assert_eq!(paid.actions, vec![FlowAction::PropagatePaid]);
    }

    #[test]
    fn settled_payments_never_move_again() {
        let engine = FlowEngine::<PaymentFlow>::default();
        for state in [PaymentStatus::Paid, PaymentStatus::Cancelled, PaymentStatus::Failed] {
            assert!(engine.apply(&state, &FlowEvent::PaymentConfirmed).is_err());
            assert!(engine.apply(&state, &FlowEvent::CancelRequested).is_err());
            assert!(engine.apply(&state, &FlowEvent::PaymentFailed).is_err());
        }
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::<PaymentFlow>::default();
        let events = [FlowEvent::PaymentRequested, FlowEvent::PaymentConfirmed];

        let run = |engine: &FlowEngine<PaymentFlow>| {
            let mut state = engine.initial_state();
            let mut actions = Vec::new();
            for event in &events {
                let outcome = engine.apply(&state, event).expect("deterministic run");
                actions.push(outcome.actions);
                state = outcome.to;
            }
            (state, actions)
        };

        assert_eq!(run(&engine), run(&engine));
        assert_eq!(engine.flow_type(), FlowType::Payment);
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = FlowEngine::<OrderFlow>::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(
            Some(OrderId("ord_0123456789ab".to_string())),
            None,
            "req-42",
            "payment-state-machine",
        );

        engine
            .apply_with_audit(&OrderStatus::Pending, &FlowEvent::PaymentRequested, &sink, &audit)
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(
            &OrderStatus::Paid,
            &FlowEvent::CancelRequested,
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("awaiting_payment"));
        assert_eq!(events[1].event_type, "flow.transition_rejected");
        assert_eq!(events[1].correlation_id, "req-42");
    }
}
