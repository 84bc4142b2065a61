//! # shoreline-runtime
//!
//! OS-specific half of the shoreline server: sockets, threads, NUMA
//! locality and signals. All canvas and protocol logic lives in
//! `shoreline-core`.
//!
//! ## Modules
//!
//! - `config` - Server configuration (defaults + environment + builder)
//! - `locality` - NUMA node discovery and thread binding
//! - `workqueue` - Per-locality task threads
//! - `net` - Listener, acceptors, connection threads
//! - `signal` - SIGINT/SIGTERM to cancellation
//! - `stats` - Traffic and pixel statistics
//! - `frontend` - Output backend interface and the headless backend
//! - `render` - Render tick loop

pub mod config;
pub mod locality;
pub mod workqueue;
pub mod net;
pub mod signal;
pub mod stats;
pub mod frontend;
pub mod render;

pub use config::ServerConfig;
pub use locality::Topology;
pub use workqueue::WorkQueue;
pub use net::{Supervisor, SupervisorState};
pub use stats::{Statistics, TrafficSource};
pub use frontend::{Frontend, Headless};
pub use render::Renderer;
