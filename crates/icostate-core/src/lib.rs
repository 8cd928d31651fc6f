//! Core types for stateful access to an ICOtronic system.
//!
//! This crate holds the pieces of the orchestration layer that know nothing
//! about the devices themselves:
//! - [`State`]: the connection lifecycle value
//! - [`EventRegistry`]: named, ordered, asynchronous event listeners
//! - [`Error`]: the shared error type
//! - [`SystemConfig`]: tunables of the orchestration layer

pub mod config;
pub mod error;
pub mod eventbus;
pub mod state;

pub use config::{ListenerPolicy, SystemConfig};
pub use error::{ensure_state, Error, Result};
pub use eventbus::{EmitReport, EventRegistry, Listener, ListenerFuture};
pub use state::State;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{ListenerPolicy, SystemConfig};
    pub use crate::error::{Error, Result};
    pub use crate::eventbus::{EmitReport, EventRegistry, Listener};
    pub use crate::state::State;
}
