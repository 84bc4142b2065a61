//! Output backends
//!
//! A frontend presents the canonical canvas once per render tick. Backends
//! that own a window may also ask for the canvas to be resized.

use std::time::{Duration, Instant};

use shoreline_core::{CanvasView, Result, Size};

use crate::stats::Statistics;

pub trait Frontend: Send {
    fn name(&self) -> &str;

    /// Present the current frame. An error stops the renderer.
    fn update(&mut self, canvas: &CanvasView<'_>, stats: &Statistics) -> Result<()>;

    /// New canvas size requested since the last call, if any
    fn requested_size(&mut self) -> Option<Size> {
        None
    }
}

/// No display; logs frame rate and statistics at a fixed interval
#[derive(Debug)]
pub struct Headless {
    interval: Duration,
    last_report: Instant,
    frames: u64,
}

impl Headless {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: Instant::now(),
            frames: 0,
        }
    }

    /// Frames counted since the last report
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Frontend for Headless {
    fn name(&self) -> &str {
        "headless"
    }

    fn update(&mut self, canvas: &CanvasView<'_>, stats: &Statistics) -> Result<()> {
        self.frames += 1;
        let elapsed = self.last_report.elapsed();
        if elapsed < self.interval {
            return Ok(());
        }
        let fps = (self.frames as f64 / elapsed.as_secs_f64() * 10.0).round() / 10.0;
        tracing::info!(
            fps,
            width = canvas.width(),
            height = canvas.height(),
            traffic_bytes = %stats.traffic(),
            throughput_bits = %stats.throughput(),
            pixels = %stats.pixels(),
            pixels_per_sec = %stats.pixel_rate(),
            "frame stats"
        );
        self.frames = 0;
        self.last_report = Instant::now();
        Ok(())
    }
}
