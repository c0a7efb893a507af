use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::flows::FlowTransitionError;
use crate::workflow::GraphExecutionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input; the message is shown to the user verbatim.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("workflow failure: {0}")]
    Workflow(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Text safe to show an end user. Client-caused errors carry their specific
    /// message; server-side failures are generic.
    pub fn user_message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. } => message,
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation(message)) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::FlowTransition(error)) => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(message))
            | ApplicationError::Workflow(message)
            | ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
            error @ ApplicationError::NotFound { .. } => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

impl From<FlowTransitionError> for ApplicationError {
    fn from(value: FlowTransitionError) -> Self {
        Self::Domain(DomainError::FlowTransition(value))
    }
}

impl From<CheckpointError> for ApplicationError {
    fn from(value: CheckpointError) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<GraphExecutionError> for ApplicationError {
    fn from(value: GraphExecutionError) -> Self {
        match value {
            GraphExecutionError::Checkpoint(error) => error.into(),
            other => Self::Workflow(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::checkpoint::CheckpointError;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::flows::{FlowEvent, FlowTransitionError, FlowType};
    use crate::workflow::GraphExecutionError;

    #[test]
    fn validation_error_keeps_its_specific_message() {
        let interface =
            ApplicationError::from(DomainError::Validation("Amount must be greater than 0".to_owned()))
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(interface.user_message(), "Amount must be greater than 0");
    }

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let interface = ApplicationError::from(FlowTransitionError::InvalidTransition {
            flow: FlowType::Order,
            state: "paid".to_owned(),
            event: FlowEvent::CancelRequested,
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert!(interface.user_message().contains("from paid"));
    }

    #[test]
    fn not_found_names_the_entity() {
        let interface = ApplicationError::NotFound { entity: "order", id: "ord_x".to_owned() }
            .into_interface("req-3");

        assert_eq!(interface.user_message(), "order `ord_x` was not found");
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn checkpoint_failures_are_persistence_failures() {
        let error: ApplicationError =
            GraphExecutionError::Checkpoint(CheckpointError::Storage("disk full".to_owned())).into();
        assert!(matches!(error, ApplicationError::Persistence(_)));

        let error: ApplicationError =
            GraphExecutionError::StepLimitExceeded { limit: 25, next_node: "classify".to_owned() }
                .into();
        assert!(matches!(error, ApplicationError::Workflow(_)));
        assert_eq!(error.into_interface("req-5").user_message(), "An unexpected internal error occurred.");
    }
}
