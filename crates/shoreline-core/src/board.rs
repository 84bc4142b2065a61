//! The canvas as seen by the rest of the server
//!
//! `Board` owns the canonical canvas and the shard registry. Connection
//! threads ask it for their locality's shard; the render thread drives
//! [`coalesce_tick`](Board::coalesce_tick) and reads
//! [`canonical`](Board::canonical); resize requests go through
//! [`resize`](Board::resize).

use std::sync::Arc;

use crate::canvas::{Canvas, Size};
use crate::dispatch::{Dispatcher, ErrorAction, Task};
use crate::error::Result;
use crate::protocol::PixelMode;
use crate::registry::{CoalesceStats, ShardRegistry};

#[derive(Debug)]
pub struct Board {
    canonical: Canvas,
    registry: ShardRegistry,
    mode: PixelMode,
}

impl Board {
    pub fn new(size: Size, mode: PixelMode) -> Result<Self> {
        Ok(Self {
            canonical: Canvas::new(size, 0)?,
            registry: ShardRegistry::new(),
            mode,
        })
    }

    /// The canvas output backends present. Only the coalescer writes it.
    #[inline]
    pub fn canonical(&self) -> &Canvas {
        &self.canonical
    }

    #[inline]
    pub fn mode(&self) -> PixelMode {
        self.mode
    }

    pub fn size(&self) -> Size {
        self.canonical.size()
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    /// Shard for the calling thread's locality, sized like the canonical canvas
    pub fn shard_for(&self, locality: usize) -> Result<Arc<Canvas>> {
        self.registry
            .get_or_create(locality, || self.canonical.size())
    }

    /// Merge all shards into the canonical canvas. Call once per frame.
    pub fn coalesce_tick(&self) -> CoalesceStats {
        self.registry
            .coalesce(&self.canonical, self.mode, &mut rand::thread_rng())
    }

    /// Resize the canonical canvas here and every shard on its own locality.
    ///
    /// Shard resizes are fire-and-forget; a failed one is logged and the
    /// shard keeps its old size (coalescing clips to the smaller canvas).
    /// Every shard is submitted even if an earlier submit fails; the first
    /// submit error is returned after the loop.
    pub fn resize(&self, size: Size, dispatcher: &dyn Dispatcher) -> Result<()> {
        self.canonical.resize(size)?;
        let mut first_err = None;
        let mut failed = 0usize;
        for shard in self.registry.shards() {
            let locality = shard.locality();
            let task = Task::new(move || shard.resize(size)).on_error(move |err| {
                tracing::error!(locality, %err, "shard resize failed");
                ErrorAction::Continue
            });
            if let Err(err) = dispatcher.submit(locality, task) {
                tracing::error!(locality, %err, "could not submit shard resize");
                failed += 1;
                first_err.get_or_insert(err);
            }
        }
        if let Some(err) = first_err {
            tracing::warn!(failed, "canvas resized, some shards kept their old size");
            return Err(err);
        }
        tracing::info!(width = size.width, height = size.height, "canvas resized");
        Ok(())
    }

    /// Read and reset the pixel counters of all shards
    pub fn take_pixels_written(&self) -> u64 {
        self.registry
            .shards()
            .iter()
            .map(|s| s.take_pixels_written())
            .sum()
    }
}
