//! Session coordination for the cashflow dashboard.
//!
//! This crate provides:
//! - Single-flight access token renewal shared by every in-flight request
//! - Proactive refresh ahead of token expiry
//! - Logout that always clears local state, even if the remote call fails
//! - Cross-context invalidation through the credential store
//! - An authenticated REST client that recovers from 401 responses once
//! - Explicit FSM-based session state management

mod auth_fsm;
mod client;
mod config;
mod coordinator;
mod error;
mod session;
mod transport;

#[cfg(test)]
mod testing;

pub use auth_fsm::session_machine;
pub use auth_fsm::{AuthState, SessionMachine, SessionMachineInput, SessionMachineState};
pub use client::ApiClient;
pub use config::{
    CoordinatorConfig, DEFAULT_API_URL, DEFAULT_MIN_PROACTIVE_DELAY, DEFAULT_REFRESH_BUFFER,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use coordinator::{SessionCoordinator, SessionEventCallback};
pub use error::{AuthError, AuthResult};
pub use session::{SessionEvent, SessionSnapshot, SignOutReason, TokenGrant, UserIdentity};
pub use transport::{
    is_auth_endpoint, AuthTransport, HttpAuthTransport, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH,
};
