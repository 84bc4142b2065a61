//! TCP front door
//!
//! - `listener` - Dual-stack listening socket and accept error policy
//! - `connection` - Per-client thread: read, parse, reply, teardown
//! - `supervisor` - Acceptor threads and the shutdown state machine

pub mod connection;
pub mod listener;
pub mod supervisor;

pub use connection::{Connection, ConnectionSet, ConnectionSettings};
pub use supervisor::{Supervisor, SupervisorState};
