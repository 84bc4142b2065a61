//! Render tick loop
//!
//! Each tick: coalesce shards into the canonical canvas, hand the canvas to
//! every frontend, apply a resize a frontend asked for, and sample
//! statistics when the interval has passed.

use std::time::{Duration, Instant};

use shoreline_core::registry::CoalesceStats;
use shoreline_core::{Board, CancellationToken, Dispatcher, Result};

use crate::frontend::Frontend;
use crate::stats::{Statistics, TrafficSource};

pub struct Renderer<'a> {
    board: &'a Board,
    dispatcher: &'a dyn Dispatcher,
    traffic: Option<&'a dyn TrafficSource>,
    frontends: Vec<Box<dyn Frontend>>,
    frame_interval: Duration,
    stats_interval: Duration,
    stats: Statistics,
    last_stats: Instant,
}

impl<'a> Renderer<'a> {
    pub fn new(
        board: &'a Board,
        dispatcher: &'a dyn Dispatcher,
        frame_interval: Duration,
        stats_interval: Duration,
    ) -> Self {
        Self {
            board,
            dispatcher,
            traffic: None,
            frontends: Vec::new(),
            frame_interval,
            stats_interval,
            stats: Statistics::new(),
            last_stats: Instant::now(),
        }
    }

    /// Where received byte counts are harvested from
    pub fn traffic(mut self, source: &'a dyn TrafficSource) -> Self {
        self.traffic = Some(source);
        self
    }

    pub fn add_frontend(&mut self, frontend: Box<dyn Frontend>) {
        tracing::info!(frontend = frontend.name(), "frontend added");
        self.frontends.push(frontend);
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// One frame
    pub fn tick(&mut self) -> Result<CoalesceStats> {
        let merged = self.board.coalesce_tick();

        {
            let canvas = self.board.canonical().read();
            for frontend in &mut self.frontends {
                frontend.update(&canvas, &self.stats)?;
            }
        }

        let requested = self.frontends.iter_mut().filter_map(|f| f.requested_size()).last();
        if let Some(size) = requested {
            if size != self.board.size() {
                if let Err(err) = self.board.resize(size, self.dispatcher) {
                    tracing::error!(%err, width = size.width, height = size.height, "resize failed");
                }
            }
        }

        if self.last_stats.elapsed() >= self.stats_interval {
            let bytes = self.traffic.map_or(0, |t| t.take_bytes_received());
            self.stats.update(bytes, Some(self.board.take_pixels_written()));
            self.last_stats = Instant::now();
        }
        Ok(merged)
    }

    /// Tick at the frame rate until `token` is cancelled or a frontend fails.
    pub fn run(&mut self, token: &CancellationToken) -> Result<()> {
        tracing::info!(interval = ?self.frame_interval, "render loop started");
        while !token.is_cancelled() {
            let start = Instant::now();
            self.tick()?;
            if token.sleep(self.frame_interval.saturating_sub(start.elapsed())) {
                break;
            }
        }
        tracing::info!("render loop stopped");
        Ok(())
    }
}
