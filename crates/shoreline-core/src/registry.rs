//! Shard registry and coalescer
//!
//! Connection threads never write the canonical canvas directly. Each one
//! writes into the shard of the locality it runs on; shards are created
//! lazily, on first use, by the first connection on that locality. Once per
//! render tick the coalescer drains every shard into the canonical canvas.
//!
//! # Locking
//!
//! The registry mutex guards only the *set* of shards. It is held while
//! looking up / inserting a shard and for the duration of a coalesce pass,
//! never by connection threads doing pixel I/O.
//!
//! Lock order is registry → canonical view → shard view.

use std::sync::{Arc, Mutex, PoisonError};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::canvas::{Canvas, Size};
use crate::error::Result;
use crate::protocol::PixelMode;

/// Summary of one coalesce pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalesceStats {
    /// Shards visited
    pub shards: usize,
    /// Pixels moved into the canonical canvas
    pub pixels: usize,
}

/// Insertion-ordered set of per-locality shards
#[derive(Debug, Default)]
pub struct ShardRegistry {
    shards: Mutex<Vec<Arc<Canvas>>>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shard for `locality`, allocating it if this is the first request.
    ///
    /// `size` is evaluated under the registry lock so that a concurrent
    /// resize either sees the new shard or the shard sees the new size.
    pub fn get_or_create(&self, locality: usize, size: impl FnOnce() -> Size) -> Result<Arc<Canvas>> {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(shard) = shards.iter().find(|s| s.locality() == locality) {
            return Ok(Arc::clone(shard));
        }
        let shard = Arc::new(Canvas::new(size(), locality)?);
        shards.push(Arc::clone(&shard));
        tracing::debug!(locality, total = shards.len(), "allocated shard");
        Ok(shard)
    }

    /// Snapshot of all shards in insertion order
    pub fn shards(&self) -> Vec<Arc<Canvas>> {
        self.shards.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.shards.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every shard into `canonical`.
    ///
    /// Shards are visited in a fresh random order each pass so no shard
    /// systematically wins when two of them set the same pixel within one
    /// tick. Every non-transparent shard pixel is moved (copied, or
    /// composited in [`PixelMode::Blend`] when not opaque) and reset to
    /// transparent; transparent shard pixels leave the canonical pixel alone.
    pub fn coalesce<R: Rng + ?Sized>(&self, canonical: &Canvas, mode: PixelMode, rng: &mut R) -> CoalesceStats {
        let shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        let target = canonical.read();

        let mut order: Vec<&Arc<Canvas>> = shards.iter().collect();
        order.shuffle(rng);

        let mut stats = CoalesceStats { shards: order.len(), pixels: 0 };
        for shard in order {
            let source = shard.read();
            let width = source.width().min(target.width());
            let height = source.height().min(target.height());
            for y in 0..height {
                for x in 0..width {
                    let Some(pixel) = source.take(x, y) else { continue };
                    match mode {
                        PixelMode::Blend if !pixel.is_opaque() => target.blend(x, y, pixel),
                        _ => target.set(x, y, pixel),
                    };
                    stats.pixels += 1;
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::Pixel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const SIZE: Size = Size::new(8, 8);

    #[test]
    fn test_lazy_creation() {
        let registry = ShardRegistry::new();
        assert!(registry.is_empty());

        let a = registry.get_or_create(0, || SIZE).unwrap();
        let b = registry.get_or_create(0, || panic!("must not allocate twice")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.get_or_create(3, || SIZE).unwrap();
        assert_eq!(c.locality(), 3);
        assert_eq!(registry.len(), 2);
        let order: Vec<usize> = registry.shards().iter().map(|s| s.locality()).collect();
        assert_eq!(order, vec![0, 3]);
    }

    #[test]
    fn test_concurrent_creation_single_shard() {
        let registry = Arc::new(ShardRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create(1, || SIZE).unwrap())
            })
            .collect();
        let shards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(shards.iter().all(|s| Arc::ptr_eq(s, &shards[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_coalesce_consumes() {
        let registry = ShardRegistry::new();
        let canonical = Canvas::new(SIZE, 0).unwrap();
        let red = Pixel::from_rgb(255, 0, 0);
        let keep = Pixel::from_rgb(1, 2, 3);
        canonical.read().set(7, 7, keep);

        let shard = registry.get_or_create(0, || SIZE).unwrap();
        shard.read().set(2, 3, red);

        let mut rng = StdRng::seed_from_u64(1);
        let stats = registry.coalesce(&canonical, PixelMode::Overwrite, &mut rng);
        assert_eq!(stats, CoalesceStats { shards: 1, pixels: 1 });

        assert_eq!(canonical.read().get(2, 3), Some(red));
        assert_eq!(canonical.read().get(7, 7), Some(keep));
        assert!(shard.read().snapshot().iter().all(|p| p.is_transparent()));

        // Nothing new: canonical unchanged
        let stats = registry.coalesce(&canonical, PixelMode::Overwrite, &mut rng);
        assert_eq!(stats.pixels, 0);
        assert_eq!(canonical.read().get(2, 3), Some(red));
    }

    #[test]
    fn test_coalesce_conflict_order_varies() {
        let registry = ShardRegistry::new();
        let canonical = Canvas::new(SIZE, 0).unwrap();
        let a = registry.get_or_create(0, || SIZE).unwrap();
        let b = registry.get_or_create(1, || SIZE).unwrap();
        let (pa, pb) = (Pixel::from_gray8(10), Pixel::from_gray8(20));

        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            a.read().set(0, 0, pa);
            b.read().set(0, 0, pb);
            registry.coalesce(&canonical, PixelMode::Overwrite, &mut rng);
            seen.insert(canonical.read().get(0, 0).unwrap());
        }
        assert_eq!(seen.len(), 2, "both shards must win some ticks");
    }

    #[test]
    fn test_coalesce_blend() {
        let registry = ShardRegistry::new();
        let canonical = Canvas::new(SIZE, 0).unwrap();
        canonical.read().set(0, 0, Pixel::from_rgb(0, 0, 0));
        let shard = registry.get_or_create(0, || SIZE).unwrap();
        shard.read().set(0, 0, Pixel::from_rgba(255, 255, 255, 128));

        registry.coalesce(&canonical, PixelMode::Blend, &mut rand::thread_rng());
        let p = canonical.read().get(0, 0).unwrap();
        assert!(p.is_opaque());
        assert!((127..=129).contains(&p.red()));
    }

    #[test]
    fn test_coalesce_size_mismatch() {
        let registry = ShardRegistry::new();
        let canonical = Canvas::new(Size::new(4, 4), 0).unwrap();
        let shard = registry.get_or_create(0, || Size::new(8, 2)).unwrap();
        shard.read().set(6, 1, Pixel::from_gray8(9));
        shard.read().set(1, 1, Pixel::from_gray8(9));

        let stats = registry.coalesce(&canonical, PixelMode::Overwrite, &mut rand::thread_rng());
        assert_eq!(stats.pixels, 1);
        // Pixel outside the canonical bounds waits for the resize
        assert_eq!(shard.read().get(6, 1), Some(Pixel::from_gray8(9)));
    }

    #[test]
    fn test_coalesce_with_concurrent_writers() {
        let registry = Arc::new(ShardRegistry::new());
        let canonical = Arc::new(Canvas::new(SIZE, 0).unwrap());
        let done = Arc::new(AtomicBool::new(false));
        let mut handles = vec![];

        for t in 0..4u32 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let shard = registry.get_or_create(t as usize % 2, || SIZE).unwrap();
                for i in 0..2000u32 {
                    shard.read().set(t, i % 8, Pixel::from_gray8(t as u8 + 1));
                }
            }));
        }

        let mut rng = StdRng::seed_from_u64(7);
        let coalescer = {
            let done = Arc::clone(&done);
            let registry = Arc::clone(&registry);
            let canonical = Arc::clone(&canonical);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(11);
                let mut pixels = 0;
                while !done.load(Ordering::Relaxed) {
                    pixels += registry.coalesce(&canonical, PixelMode::Overwrite, &mut rng).pixels;
                }
                pixels
            })
        };
        for h in handles {
            h.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);
        let drained_early = coalescer.join().unwrap();
        assert!(drained_early <= 8000);

        // Whatever the racing passes left behind lands in the final pass
        registry.coalesce(&canonical, PixelMode::Overwrite, &mut rng);
        let view = canonical.read();
        for t in 0..4u32 {
            for y in 0..8 {
                assert_eq!(view.get(t, y), Some(Pixel::from_gray8(t as u8 + 1)));
            }
        }
        for shard in registry.shards() {
            let shard = shard.read();
            assert!((0..8).all(|y| (0..8).all(|x| shard.get(x, y) == Some(Pixel::TRANSPARENT))));
        }
    }
}
