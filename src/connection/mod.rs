//! Connection management for the daemon channel.
//!
//! This module provides:
//! - The connection state machine (`Disconnected` / `Connecting` / `Connected`)
//! - Connection statistics
//! - Binding configuration
//!
//! # Example
//!
//! ```
//! use someip_binding::connection::{ConnectionState, ConnectionStateMachine};
//!
//! let mut machine = ConnectionStateMachine::new();
//! assert!(machine.connect());
//! machine.on_transport_connected().unwrap();
//! assert_eq!(machine.state(), ConnectionState::Connected);
//!
//! machine.on_transport_lost();
//! assert_eq!(machine.state(), ConnectionState::Disconnected);
//! ```

mod config;
mod machine;
mod state;

pub use config::BindingConfig;
pub use machine::{ConnectionStateMachine, StateObserver};
pub use state::{ConnectionState, ConnectionStats};
