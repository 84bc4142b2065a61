//! Server configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Command-line flags (applied by the binary through the builder)
//! 2. Environment variables
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use shoreline_runtime::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .acceptors(4)
//!     .canvas_size(1920, 1080);
//! config.validate()?;
//! ```

pub mod defaults;
pub mod env;

use std::net::SocketAddr;
use std::time::Duration;

use shoreline_core::constants::MAX_COMMAND_LEN;
use shoreline_core::{PixelMode, Result, ShorelineError, Size};

use env::{env_get, env_get_bool, env_get_opt};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listening socket binds to
    pub listen: SocketAddr,
    /// Number of acceptor threads sharing the listening socket
    pub acceptors: usize,
    /// Initial canvas dimensions
    pub size: Size,
    /// Per-connection receive ring capacity in bytes
    pub ring_size: usize,
    /// Longest unrecognized token tolerated before disconnecting
    pub garbage_limit: usize,
    /// Render ticks per second
    pub fps: u32,
    /// Composite non-opaque pixels instead of overwriting
    pub blend: bool,
    /// Shard per NUMA node; off means everything is locality 0
    pub numa: bool,
    /// How often statistics are sampled
    pub stats_interval: Duration,
    /// Pending task capacity per locality
    pub work_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SHORELINE_LISTEN` - Bind address, e.g. `0.0.0.0:1234`
    /// - `SHORELINE_ACCEPTORS` - Acceptor thread count
    /// - `SHORELINE_WIDTH` / `SHORELINE_HEIGHT` - Canvas size
    /// - `SHORELINE_RING_SIZE` - Receive ring capacity per connection
    /// - `SHORELINE_GARBAGE_LIMIT` - Longest tolerated garbage token
    /// - `SHORELINE_FPS` - Render rate
    /// - `SHORELINE_BLEND` - Alpha blending (0/1)
    /// - `SHORELINE_NUMA` - Per-node shards (0/1)
    /// - `SHORELINE_STATS_INTERVAL_MS` - Statistics sampling interval
    pub fn from_env() -> Self {
        let listen = env_get_opt("SHORELINE_LISTEN").unwrap_or_else(default_listen);
        Self {
            listen,
            acceptors: env_get("SHORELINE_ACCEPTORS", defaults::ACCEPTORS),
            size: Size::new(
                env_get("SHORELINE_WIDTH", defaults::WIDTH),
                env_get("SHORELINE_HEIGHT", defaults::HEIGHT),
            ),
            ring_size: env_get("SHORELINE_RING_SIZE", defaults::RING_SIZE),
            garbage_limit: env_get("SHORELINE_GARBAGE_LIMIT", defaults::GARBAGE_LIMIT),
            fps: env_get("SHORELINE_FPS", defaults::FPS),
            blend: env_get_bool("SHORELINE_BLEND", defaults::BLEND),
            numa: env_get_bool("SHORELINE_NUMA", defaults::NUMA),
            stats_interval: Duration::from_millis(env_get(
                "SHORELINE_STATS_INTERVAL_MS",
                defaults::STATS_INTERVAL_MS,
            )),
            work_queue_depth: defaults::WORK_QUEUE_DEPTH,
        }
    }

    /// Library defaults only, no environment. Used by tests.
    pub fn new() -> Self {
        Self {
            listen: default_listen(),
            acceptors: defaults::ACCEPTORS,
            size: Size::new(defaults::WIDTH, defaults::HEIGHT),
            ring_size: defaults::RING_SIZE,
            garbage_limit: defaults::GARBAGE_LIMIT,
            fps: defaults::FPS,
            blend: defaults::BLEND,
            numa: defaults::NUMA,
            stats_interval: Duration::from_millis(defaults::STATS_INTERVAL_MS),
            work_queue_depth: defaults::WORK_QUEUE_DEPTH,
        }
    }

    // Builder methods

    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = addr;
        self
    }

    pub fn acceptors(mut self, n: usize) -> Self {
        self.acceptors = n;
        self
    }

    pub fn canvas_size(mut self, width: u32, height: u32) -> Self {
        self.size = Size::new(width, height);
        self
    }

    pub fn ring_size(mut self, bytes: usize) -> Self {
        self.ring_size = bytes;
        self
    }

    pub fn garbage_limit(mut self, bytes: usize) -> Self {
        self.garbage_limit = bytes;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn blend(mut self, enable: bool) -> Self {
        self.blend = enable;
        self
    }

    pub fn numa(mut self, enable: bool) -> Self {
        self.numa = enable;
        self
    }

    pub fn stats_interval(mut self, d: Duration) -> Self {
        self.stats_interval = d;
        self
    }

    pub fn work_queue_depth(mut self, depth: usize) -> Self {
        self.work_queue_depth = depth;
        self
    }

    pub fn pixel_mode(&self) -> PixelMode {
        if self.blend {
            PixelMode::Blend
        } else {
            PixelMode::Overwrite
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.acceptors == 0 {
            return Err(ShorelineError::config("acceptors must be > 0"));
        }
        if self.size.width == 0 || self.size.height == 0 {
            return Err(ShorelineError::config("canvas width and height must be > 0"));
        }
        if self.size.area().is_none() {
            return Err(ShorelineError::config("canvas is too large to address"));
        }
        // One byte of the ring is always kept free
        if self.ring_size <= MAX_COMMAND_LEN {
            return Err(ShorelineError::config(format!(
                "ring_size must be > {} (longest command)",
                MAX_COMMAND_LEN
            )));
        }
        if self.garbage_limit == 0 {
            return Err(ShorelineError::config("garbage_limit must be > 0"));
        }
        if self.fps == 0 {
            return Err(ShorelineError::config("fps must be > 0"));
        }
        if self.work_queue_depth == 0 {
            return Err(ShorelineError::config("work_queue_depth must be > 0"));
        }
        Ok(())
    }

    /// Log the effective configuration
    pub fn log(&self) {
        tracing::info!(
            listen = %self.listen,
            acceptors = self.acceptors,
            width = self.size.width,
            height = self.size.height,
            ring_size = self.ring_size,
            garbage_limit = self.garbage_limit,
            fps = self.fps,
            blend = self.blend,
            numa = self.numa,
            stats_interval = ?self.stats_interval,
            "configuration"
        );
    }
}

fn default_listen() -> SocketAddr {
    // The literal is a valid socket address
    defaults::LISTEN
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], shoreline_core::constants::DEFAULT_PORT)))
}
