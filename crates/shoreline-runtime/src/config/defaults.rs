//! Compile-time defaults for [`ServerConfig`](super::ServerConfig)

use shoreline_core::constants;

/// Listen on every address, IPv4 and IPv6
pub const LISTEN: &str = "[::]:1234";

pub const ACCEPTORS: usize = 1;

pub const WIDTH: u32 = constants::DEFAULT_WIDTH;
pub const HEIGHT: u32 = constants::DEFAULT_HEIGHT;

pub const RING_SIZE: usize = constants::DEFAULT_RING_SIZE;

pub const GARBAGE_LIMIT: usize = constants::DEFAULT_GARBAGE_LIMIT;

pub const FPS: u32 = constants::DEFAULT_FPS;

pub const BLEND: bool = false;

/// Use per-node shards when the host has more than one NUMA node
pub const NUMA: bool = true;

pub const STATS_INTERVAL_MS: u64 = 1000;

/// Pending tasks per locality in the work queue
pub const WORK_QUEUE_DEPTH: usize = 256;
