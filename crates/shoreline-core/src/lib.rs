//! # shoreline-core
//!
//! Platform-agnostic core of the shoreline pixelflut server.
//!
//! Nothing in here touches sockets, threads-per-node or signals; all of that
//! lives in `shoreline-runtime`.
//!
//! ## Modules
//!
//! - `pixel` - 32-bit RGBA pixel value
//! - `canvas` - Lock-free pixel grid with resize exclusion
//! - `ring` - Per-connection receive ring buffer
//! - `protocol` - Incremental pixelflut command engine
//! - `registry` - Per-locality shards and the coalescer
//! - `board` - Canonical canvas plus shards, as used by the server
//! - `dispatch` - Locality-targeted deferred tasks
//! - `cancel` - Cancellation token for cooperative shutdown
//! - `error` - Error types

pub mod pixel;
pub mod canvas;
pub mod ring;
pub mod protocol;
pub mod registry;
pub mod board;
pub mod dispatch;
pub mod cancel;
pub mod error;

// Re-exports for convenience
pub use pixel::Pixel;
pub use canvas::{Canvas, CanvasView, Size};
pub use ring::{ReadMark, RingBuffer};
pub use protocol::{Outcome, PixelMode, ProtocolEngine};
pub use registry::{CoalesceStats, ShardRegistry};
pub use board::Board;
pub use dispatch::{Dispatcher, ErrorAction, InlineDispatcher, Task};
pub use cancel::CancellationToken;
pub use error::{ProtocolViolation, Result, RingError, ShorelineError};

/// Server-wide defaults
pub mod constants {
    /// Default TCP port
    pub const DEFAULT_PORT: u16 = 1234;

    /// Default canvas width
    pub const DEFAULT_WIDTH: u32 = 1024;

    /// Default canvas height
    pub const DEFAULT_HEIGHT: u32 = 768;

    /// Default per-connection receive ring capacity (64 KB)
    pub const DEFAULT_RING_SIZE: usize = 64 * 1024;

    /// Default render rate
    pub const DEFAULT_FPS: u32 = 60;

    /// Backlog passed to listen(2)
    pub const LISTEN_BACKLOG: i32 = 4096;

    pub use crate::protocol::{DEFAULT_GARBAGE_LIMIT, MAX_COMMAND_LEN, REPLY_FLUSH_THRESHOLD};
}
