//! Throughput statistics
//!
//! Running totals plus a ring of the last [`NUM_AVERAGES`] per-second
//! rates. Counters are harvested (read and reset) from their sources on
//! every [`Statistics::update`].

use std::fmt;
use std::time::{Duration, Instant};

/// Number of samples the averages are taken over
pub const NUM_AVERAGES: usize = 20;

/// Approximate size of one set command on the wire (`PX XXX YYY rrggbb\n`)
const BYTES_PER_PIXEL_ESTIMATE: u64 = 18;

const UNITS: [&str; 6] = ["", "k", "M", "G", "T", "P"];

/// Source of received byte counts, reset on read
pub trait TrafficSource: Send + Sync {
    fn take_bytes_received(&self) -> u64;
}

/// A value scaled to a unit prefix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaled {
    pub value: f64,
    pub unit: &'static str,
}

impl Scaled {
    fn new(raw: u64, base: u64) -> Self {
        let mut value = raw as f64;
        let mut i = 0;
        while value > base as f64 && i < UNITS.len() - 1 {
            value /= base as f64;
            i += 1;
        }
        Self { value, unit: UNITS[i] }
    }
}

impl fmt::Display for Scaled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.unit)
    }
}

#[derive(Debug, Clone)]
pub struct Statistics {
    num_bytes: u64,
    num_pixels: u64,
    bytes_per_second: [u64; NUM_AVERAGES],
    pixels_per_second: [u64; NUM_AVERAGES],
    index: usize,
    last_update: Instant,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            num_bytes: 0,
            num_pixels: 0,
            bytes_per_second: [0; NUM_AVERAGES],
            pixels_per_second: [0; NUM_AVERAGES],
            index: 0,
            last_update: Instant::now(),
        }
    }

    /// Add one sample. Without a pixel count, pixels are estimated from
    /// the byte count.
    pub fn update(&mut self, bytes: u64, pixels: Option<u64>) {
        self.update_at(Instant::now(), bytes, pixels);
    }

    fn update_at(&mut self, now: Instant, bytes: u64, pixels: Option<u64>) {
        let elapsed = now.saturating_duration_since(self.last_update).max(Duration::from_nanos(1));
        let pixels = pixels.unwrap_or(bytes / BYTES_PER_PIXEL_ESTIMATE);

        self.num_bytes += bytes;
        self.num_pixels += pixels;
        self.bytes_per_second[self.index] = per_second(bytes, elapsed);
        self.pixels_per_second[self.index] = per_second(pixels, elapsed);

        self.index = (self.index + 1) % NUM_AVERAGES;
        self.last_update = now;
    }

    pub fn total_bytes(&self) -> u64 {
        self.num_bytes
    }

    pub fn total_pixels(&self) -> u64 {
        self.num_pixels
    }

    /// Total received, 1024-based
    pub fn traffic(&self) -> Scaled {
        Scaled::new(self.num_bytes, 1024)
    }

    /// Average receive rate in bits/s, 1000-based
    pub fn throughput(&self) -> Scaled {
        Scaled::new(average(&self.bytes_per_second) * 8, 1000)
    }

    pub fn pixels(&self) -> Scaled {
        Scaled::new(self.num_pixels, 1000)
    }

    /// Average pixels/s
    pub fn pixel_rate(&self) -> Scaled {
        Scaled::new(average(&self.pixels_per_second), 1000)
    }
}

fn per_second(count: u64, elapsed: Duration) -> u64 {
    (count as u128 * 1_000_000_000 / elapsed.as_nanos()) as u64
}

fn average(samples: &[u64; NUM_AVERAGES]) -> u64 {
    samples.iter().sum::<u64>() / NUM_AVERAGES as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling() {
        assert_eq!(Scaled::new(512, 1024), Scaled { value: 512.0, unit: "" });
        assert_eq!(Scaled::new(2048, 1024), Scaled { value: 2.0, unit: "k" });
        assert_eq!(Scaled::new(3_000_000, 1000), Scaled { value: 3.0, unit: "M" });
        // Exactly at the base stays unscaled
        assert_eq!(Scaled::new(1000, 1000).unit, "");
        // Caps at the largest unit
        assert_eq!(Scaled::new(u64::MAX, 1000).unit, "P");
        assert_eq!(Scaled::new(2048, 1024).to_string(), "2.00 k");
    }

    #[test]
    fn test_rates_average_over_window() {
        let mut stats = Statistics::new();
        let start = stats.last_update;
        stats.update_at(start + Duration::from_secs(1), 1000, Some(50));

        assert_eq!(stats.total_bytes(), 1000);
        assert_eq!(stats.total_pixels(), 50);
        // One sample of 1000 B/s over a window of NUM_AVERAGES
        assert_eq!(average(&stats.bytes_per_second), 1000 / NUM_AVERAGES as u64);

        for i in 2..=NUM_AVERAGES as u64 {
            stats.update_at(start + Duration::from_secs(i), 1000, Some(50));
        }
        assert_eq!(stats.throughput(), Scaled::new(8000, 1000));
        assert_eq!(stats.pixel_rate().value, 50.0);
    }

    #[test]
    fn test_pixel_estimate() {
        let mut stats = Statistics::new();
        let start = stats.last_update;
        stats.update_at(start + Duration::from_secs(1), 18 * 100, None);
        assert_eq!(stats.total_pixels(), 100);
    }
}
