//! Error handling shared by the ICOstate crates.

use crate::state::{describe_states, State};

/// Core error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A guarded operation was invoked outside its allowed states.
    #[error(
        "{operation} only allowed in the {}: {} (current state: {current})",
        state_noun(.allowed),
        describe_states(.allowed)
    )]
    IncorrectState {
        operation: String,
        current: State,
        allowed: Vec<State>,
    },

    /// An event listener failed while fail-fast dispatch was configured.
    #[error("Listener for event '{event}' failed: {message}")]
    Listener { event: String, message: String },

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a state violation error for `operation`.
    pub fn incorrect_state(operation: impl Into<String>, current: State, allowed: &[State]) -> Self {
        Self::IncorrectState {
            operation: operation.into(),
            current,
            allowed: allowed.to_vec(),
        }
    }

    /// Whether this error is a state violation.
    pub fn is_incorrect_state(&self) -> bool {
        matches!(self, Self::IncorrectState { .. })
    }
}

fn state_noun(states: &[State]) -> &'static str {
    if states.len() == 1 {
        "state"
    } else {
        "states"
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Check that `current` is one of `allowed`.
///
/// Returns [`Error::IncorrectState`] naming `operation` otherwise.
pub fn ensure_state(operation: &str, current: State, allowed: &[State]) -> Result<()> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(Error::incorrect_state(operation, current, allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incorrect_state_message_single() {
        let error = Error::incorrect_state(
            "Resetting STU",
            State::Disconnected,
            &[State::HubConnected],
        );
        assert_eq!(
            error.to_string(),
            "Resetting STU only allowed in the state: STU Connected (current state: Disconnected)"
        );
        assert!(error.is_incorrect_state());
    }

    #[test]
    fn test_incorrect_state_message_multiple() {
        let error = Error::incorrect_state(
            "Renaming sensor node",
            State::Disconnected,
            &[State::HubConnected, State::SensorNodeConnected],
        );
        let msg = error.to_string();
        assert!(msg.starts_with("Renaming sensor node only allowed in the states:"));
        assert!(msg.contains("STU Connected, Sensor Node Connected"));
    }

    #[test]
    fn test_ensure_state() {
        assert!(ensure_state("op", State::HubConnected, &[State::HubConnected]).is_ok());

        let err = ensure_state("op", State::Disconnected, &[State::HubConnected]).unwrap_err();
        match err {
            Error::IncorrectState {
                operation,
                current,
                allowed,
            } => {
                assert_eq!(operation, "op");
                assert_eq!(current, State::Disconnected);
                assert_eq!(allowed, vec![State::HubConnected]);
            }
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_listener_error_display() {
        let error = Error::Listener {
            event: "sensor_node_name".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Listener for event 'sensor_node_name' failed: boom"
        );
    }
}
