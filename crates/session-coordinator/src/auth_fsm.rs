//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │  Uninitialized  │ (initial)
//! └────────┬────────┘
//!          │ RestoreStarted (persisted refresh token found)
//!          ▼
//! ┌─────────────────┐  RefreshFailed   ┌─────────────────┐
//! │    Restoring    │ ───────────────► │    LoggedOut    │
//! └────────┬────────┘                  └────────┬────────┘
//!          │ RefreshSucceeded                   │ LoginSucceeded
//!          ▼                                    ▼
//! ┌─────────────────┐  RefreshStarted  ┌─────────────────┐
//! │  Authenticated  │ ───────────────► │   Refreshing    │
//! │                 │ ◄─────────────── │                 │
//! └─────────────────┘ RefreshSucceeded └─────────────────┘
//!                                               │ RefreshFailed
//!                                               ▼
//!                                           LoggedOut
//! ```
//!
//! `SessionCleared` (logout, external invalidation) moves every state to
//! `LoggedOut`. `LoginSucceeded` is accepted from every state.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        RestoreStarted => Restoring,
        LoginSucceeded => Authenticated,
        SessionCleared => LoggedOut
    },
    Restoring => {
        RefreshSucceeded => Authenticated,
        RefreshFailed => LoggedOut,
        LoginSucceeded => Authenticated,
        SessionCleared => LoggedOut
    },
    Authenticated => {
        RefreshStarted => Refreshing,
        LoginSucceeded => Authenticated,
        SessionCleared => LoggedOut
    },
    Refreshing => {
        RefreshSucceeded => Authenticated,
        RefreshFailed => LoggedOut,
        LoginSucceeded => Authenticated,
        SessionCleared => LoggedOut
    },
    LoggedOut => {
        RestoreStarted => Restoring,
        LoginSucceeded => Authenticated,
        SessionCleared => LoggedOut
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Nothing has been attempted yet.
    Uninitialized,
    /// Startup refresh with a persisted refresh token is in flight.
    Restoring,
    /// An access token is held.
    Authenticated,
    /// An access token is held and a renewal is in flight.
    Refreshing,
    /// No session. Terminal until the next login.
    LoggedOut,
}

impl AuthState {
    /// Returns true while a session (and an access token) is held.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Refreshing)
    }

    /// Returns true if a refresh call is outstanding in this state.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthState::Restoring | AuthState::Refreshing)
    }
}

impl From<&SessionMachineState> for AuthState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => AuthState::Uninitialized,
            SessionMachineState::Restoring => AuthState::Restoring,
            SessionMachineState::Authenticated => AuthState::Authenticated,
            SessionMachineState::Refreshing => AuthState::Refreshing,
            SessionMachineState::LoggedOut => AuthState::LoggedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_uninitialized() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Uninitialized);
    }

    #[test]
    fn test_restore_flow() {
        let mut machine = SessionMachine::new();

        machine.consume(&SessionMachineInput::RestoreStarted).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Restoring);

        machine
            .consume(&SessionMachineInput::RefreshSucceeded)
            .unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_failed_restore_logs_out() {
        let mut machine = SessionMachine::new();

        machine.consume(&SessionMachineInput::RestoreStarted).unwrap();
        machine.consume(&SessionMachineInput::RefreshFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::LoggedOut);
    }

    #[test]
    fn test_refresh_round_trip() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::LoginSucceeded).unwrap();

        machine.consume(&SessionMachineInput::RefreshStarted).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);

        machine
            .consume(&SessionMachineInput::RefreshSucceeded)
            .unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_refresh_cannot_start_twice() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::LoginSucceeded).unwrap();
        machine.consume(&SessionMachineInput::RefreshStarted).unwrap();

        assert!(machine
            .consume(&SessionMachineInput::RefreshStarted)
            .is_err());
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);
    }

    #[test]
    fn test_logged_out_only_leaves_through_login_or_restore() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::LoginSucceeded).unwrap();
        machine.consume(&SessionMachineInput::SessionCleared).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::LoggedOut);

        assert!(machine
            .consume(&SessionMachineInput::RefreshStarted)
            .is_err());
        assert!(machine
            .consume(&SessionMachineInput::RefreshSucceeded)
            .is_err());

        machine.consume(&SessionMachineInput::LoginSucceeded).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_session_cleared_from_every_state() {
        let setups: Vec<Vec<SessionMachineInput>> = vec![
            vec![],
            vec![SessionMachineInput::RestoreStarted],
            vec![SessionMachineInput::LoginSucceeded],
            vec![
                SessionMachineInput::LoginSucceeded,
                SessionMachineInput::RefreshStarted,
            ],
        ];

        for inputs in setups {
            let mut machine = SessionMachine::new();
            for input in &inputs {
                machine.consume(input).unwrap();
            }
            machine.consume(&SessionMachineInput::SessionCleared).unwrap();
            assert_eq!(*machine.state(), SessionMachineState::LoggedOut);
        }
    }

    #[test]
    fn test_auth_state_conversion() {
        assert_eq!(
            AuthState::from(&SessionMachineState::Uninitialized),
            AuthState::Uninitialized
        );
        assert_eq!(
            AuthState::from(&SessionMachineState::Restoring),
            AuthState::Restoring
        );
        assert_eq!(
            AuthState::from(&SessionMachineState::Authenticated),
            AuthState::Authenticated
        );
        assert_eq!(
            AuthState::from(&SessionMachineState::Refreshing),
            AuthState::Refreshing
        );
        assert_eq!(
            AuthState::from(&SessionMachineState::LoggedOut),
            AuthState::LoggedOut
        );
    }

    #[test]
    fn test_auth_state_flags() {
        assert!(!AuthState::Uninitialized.is_authenticated());
        assert!(!AuthState::Restoring.is_authenticated());
        assert!(AuthState::Authenticated.is_authenticated());
        assert!(AuthState::Refreshing.is_authenticated());
        assert!(!AuthState::LoggedOut.is_authenticated());

        assert!(AuthState::Restoring.is_transient());
        assert!(AuthState::Refreshing.is_transient());
        assert!(!AuthState::Authenticated.is_transient());
    }
}
