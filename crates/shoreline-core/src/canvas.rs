//! Canvas (framebuffer) storage
//!
//! A `Canvas` is a width × height grid of [`Pixel`]s owned by one locality.
//! Pixels are stored as relaxed atomics: many connection threads write into
//! the same shard and the coalescer drains it concurrently, with no
//! per-pixel locking. A torn or one-tick-late pixel is acceptable, an
//! out-of-bounds access is not, so every accessor bounds-checks.
//!
//! The backing storage sits behind a reader/writer lock. Pixel traffic
//! (writes, queries, coalescing) only ever takes the shared side through a
//! [`CanvasView`]; [`Canvas::resize`] takes the exclusive side and is
//! therefore serialized against every writer of that canvas.
//!
//! Lock order: when a thread needs both the canonical canvas and a shard,
//! it acquires the canonical view first.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use crate::error::{Result, ShorelineError};
use crate::pixel::Pixel;

/// Canvas dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels, `None` if it does not fit in memory addressing
    pub fn area(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }
}

struct Grid {
    size: Size,
    pixels: Box<[AtomicU32]>,
}

impl Grid {
    fn zeroed(size: Size) -> Result<Self> {
        let len = size
            .area()
            .ok_or(ShorelineError::ResourceExhaustion("canvas dimensions overflow"))?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| ShorelineError::ResourceExhaustion("canvas pixel storage"))?;
        pixels.resize_with(len, || AtomicU32::new(Pixel::TRANSPARENT.raw()));
        Ok(Self {
            size,
            pixels: pixels.into_boxed_slice(),
        })
    }
}

/// A pixel grid owned by one locality (NUMA node)
pub struct Canvas {
    locality: usize,
    grid: RwLock<Grid>,
    pixels_written: AtomicU64,
}

impl Canvas {
    /// Allocate a fully transparent canvas.
    ///
    /// Call this from a thread running on `locality` so the first touch of
    /// the storage lands in local memory.
    pub fn new(size: Size, locality: usize) -> Result<Self> {
        Ok(Self {
            locality,
            grid: RwLock::new(Grid::zeroed(size)?),
            pixels_written: AtomicU64::new(0),
        })
    }

    /// Locality that owns this canvas
    #[inline]
    pub fn locality(&self) -> usize {
        self.locality
    }

    /// Shared access for pixel I/O
    pub fn read(&self) -> CanvasView<'_> {
        CanvasView {
            canvas: self,
            grid: self.grid.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Current dimensions
    pub fn size(&self) -> Size {
        self.read().size()
    }

    /// Replace the backing storage with a `size` grid.
    ///
    /// The overlapping region is carried over, everything else starts
    /// transparent. Waits for all outstanding views to be dropped. On
    /// allocation failure the canvas is left untouched.
    pub fn resize(&self, size: Size) -> Result<()> {
        let fresh = Grid::zeroed(size)?;
        let mut grid = self.grid.write().unwrap_or_else(PoisonError::into_inner);
        let old = std::mem::replace(&mut *grid, fresh);
        let w = old.size.width.min(size.width) as usize;
        let h = old.size.height.min(size.height) as usize;
        for y in 0..h {
            let src = &old.pixels[y * old.size.width as usize..][..w];
            let dst = &grid.pixels[y * size.width as usize..][..w];
            for (d, s) in dst.iter().zip(src) {
                d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Read and reset the number of pixels written since the last call
    pub fn take_pixels_written(&self) -> u64 {
        self.pixels_written.swap(0, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("locality", &self.locality)
            .field("size", &self.size())
            .finish()
    }
}

/// Shared-access handle to a canvas' pixels
///
/// Holding a view blocks resizes of that canvas, so keep it for one
/// parse or coalesce pass, never across blocking I/O.
pub struct CanvasView<'a> {
    canvas: &'a Canvas,
    grid: RwLockReadGuard<'a, Grid>,
}

impl<'a> CanvasView<'a> {
    #[inline]
    pub fn size(&self) -> Size {
        self.grid.size
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.grid.size.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.grid.size.height
    }

    #[inline]
    pub fn locality(&self) -> usize {
        self.canvas.locality
    }

    #[inline]
    fn slot(&self, x: u32, y: u32) -> Option<&AtomicU32> {
        let size = self.grid.size;
        if x >= size.width || y >= size.height {
            return None;
        }
        self.grid
            .pixels
            .get(y as usize * size.width as usize + x as usize)
    }

    /// Pixel at (x, y), `None` when out of bounds
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<Pixel> {
        self.slot(x, y)
            .map(|p| Pixel::from_raw(p.load(Ordering::Relaxed)))
    }

    /// Overwrite the pixel at (x, y). Returns false when out of bounds.
    #[inline]
    pub fn set(&self, x: u32, y: u32, pixel: Pixel) -> bool {
        match self.slot(x, y) {
            Some(slot) => {
                slot.store(pixel.raw(), Ordering::Relaxed);
                self.canvas.pixels_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Composite `pixel` over the pixel at (x, y). Returns false when out of bounds.
    #[inline]
    pub fn blend(&self, x: u32, y: u32, pixel: Pixel) -> bool {
        match self.slot(x, y) {
            Some(slot) => {
                let under = Pixel::from_raw(slot.load(Ordering::Relaxed));
                slot.store(pixel.over(under).raw(), Ordering::Relaxed);
                self.canvas.pixels_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Drain the pixel at (x, y): if it is not transparent, reset it to
    /// transparent and return the value it held.
    #[inline]
    pub fn take(&self, x: u32, y: u32) -> Option<Pixel> {
        let slot = self.slot(x, y)?;
        let current = Pixel::from_raw(slot.load(Ordering::Relaxed));
        if current.is_transparent() {
            return None;
        }
        let taken = Pixel::from_raw(slot.swap(Pixel::TRANSPARENT.raw(), Ordering::Relaxed));
        (!taken.is_transparent()).then_some(taken)
    }

    /// Reset a rectangle to transparent, clipped to the canvas
    pub fn clear_rect(&self, x: u32, y: u32, width: u32, height: u32) {
        let size = self.grid.size;
        let x_end = x.saturating_add(width).min(size.width);
        let y_end = y.saturating_add(height).min(size.height);
        for row in y..y_end {
            for col in x..x_end {
                if let Some(slot) = self.slot(col, row) {
                    slot.store(Pixel::TRANSPARENT.raw(), Ordering::Relaxed);
                }
            }
        }
    }

    /// Copy the region both canvases share from `src`
    pub fn copy_from(&self, src: &CanvasView<'_>) {
        let w = self.width().min(src.width());
        let h = self.height().min(src.height());
        for y in 0..h {
            for x in 0..w {
                if let (Some(d), Some(s)) = (self.slot(x, y), src.slot(x, y)) {
                    d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
                }
            }
        }
    }

    /// Pixels of one line, left to right. Empty when `y` is out of bounds.
    pub fn row(&self, y: u32) -> impl Iterator<Item = Pixel> + '_ {
        let size = self.grid.size;
        let line: &[AtomicU32] = if y < size.height {
            &self.grid.pixels[y as usize * size.width as usize..][..size.width as usize]
        } else {
            &[]
        };
        line.iter().map(|p| Pixel::from_raw(p.load(Ordering::Relaxed)))
    }

    /// Copy of the whole grid in row-major order
    pub fn snapshot(&self) -> Vec<Pixel> {
        self.grid
            .pixels
            .iter()
            .map(|p| Pixel::from_raw(p.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_is_transparent() {
        let canvas = Canvas::new(Size::new(4, 3), 0).unwrap();
        let view = canvas.read();
        assert_eq!(view.size(), Size::new(4, 3));
        assert_eq!(view.snapshot().len(), 12);
        assert!(view.snapshot().iter().all(|p| p.is_transparent()));
    }

    #[test]
    fn test_set_get_bounds() {
        let canvas = Canvas::new(Size::new(4, 3), 0).unwrap();
        let view = canvas.read();
        let red = Pixel::from_rgb(255, 0, 0);

        assert!(view.set(3, 2, red));
        assert_eq!(view.get(3, 2), Some(red));

        // Exactly at the boundary
        assert!(!view.set(4, 2, red));
        assert!(!view.set(3, 3, red));
        assert_eq!(view.get(4, 0), None);
        assert_eq!(view.get(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_pixel_counter() {
        let canvas = Canvas::new(Size::new(2, 2), 0).unwrap();
        {
            let view = canvas.read();
            view.set(0, 0, Pixel::from_rgb(1, 1, 1));
            view.set(1, 1, Pixel::from_rgb(1, 1, 1));
            view.set(9, 9, Pixel::from_rgb(1, 1, 1));
        }
        assert_eq!(canvas.take_pixels_written(), 2);
        assert_eq!(canvas.take_pixels_written(), 0);
    }

    #[test]
    fn test_take_resets() {
        let canvas = Canvas::new(Size::new(2, 2), 0).unwrap();
        let view = canvas.read();
        let green = Pixel::from_rgb(0, 255, 0);
        view.set(1, 0, green);

        assert_eq!(view.take(1, 0), Some(green));
        assert_eq!(view.get(1, 0), Some(Pixel::TRANSPARENT));
        assert_eq!(view.take(1, 0), None);
        assert_eq!(view.take(0, 0), None);
    }

    #[test]
    fn test_blend() {
        let canvas = Canvas::new(Size::new(1, 1), 0).unwrap();
        let view = canvas.read();
        view.set(0, 0, Pixel::from_rgb(0, 0, 0));
        view.blend(0, 0, Pixel::from_rgba(255, 255, 255, 0));
        assert_eq!(view.get(0, 0), Some(Pixel::from_rgb(0, 0, 0)));
        view.blend(0, 0, Pixel::from_rgb(9, 8, 7));
        assert_eq!(view.get(0, 0), Some(Pixel::from_rgb(9, 8, 7)));
    }

    #[test]
    fn test_resize_keeps_overlap() {
        let canvas = Canvas::new(Size::new(3, 3), 0).unwrap();
        let blue = Pixel::from_rgb(0, 0, 255);
        {
            let view = canvas.read();
            view.set(1, 1, blue);
            view.set(2, 2, blue);
        }
        canvas.resize(Size::new(2, 4)).unwrap();

        let view = canvas.read();
        assert_eq!(view.size(), Size::new(2, 4));
        assert_eq!(view.get(1, 1), Some(blue));
        assert_eq!(view.get(2, 2), None);
        assert_eq!(view.get(1, 3), Some(Pixel::TRANSPARENT));
    }

    #[test]
    fn test_resize_overflow_is_error() {
        let canvas = Canvas::new(Size::new(1, 1), 0).unwrap();
        if usize::BITS == 32 {
            assert!(canvas.resize(Size::new(u32::MAX, u32::MAX)).is_err());
            assert_eq!(canvas.size(), Size::new(1, 1));
        }
    }

    #[test]
    fn test_clear_rect_clips() {
        let canvas = Canvas::new(Size::new(3, 3), 0).unwrap();
        let view = canvas.read();
        for y in 0..3 {
            for x in 0..3 {
                view.set(x, y, Pixel::from_gray8(1));
            }
        }
        view.clear_rect(1, 1, 100, 100);
        assert_eq!(view.get(0, 0), Some(Pixel::from_gray8(1)));
        assert_eq!(view.get(2, 0), Some(Pixel::from_gray8(1)));
        assert_eq!(view.get(1, 1), Some(Pixel::TRANSPARENT));
        assert_eq!(view.get(2, 2), Some(Pixel::TRANSPARENT));
    }

    #[test]
    fn test_copy_from_and_row() {
        let src = Canvas::new(Size::new(3, 2), 0).unwrap();
        let dst = Canvas::new(Size::new(2, 3), 1).unwrap();
        let s = src.read();
        s.set(1, 1, Pixel::from_gray8(5));
        s.set(2, 0, Pixel::from_gray8(6));
        let d = dst.read();
        d.copy_from(&s);

        assert_eq!(d.get(1, 1), Some(Pixel::from_gray8(5)));
        let row: Vec<Pixel> = d.row(1).collect();
        assert_eq!(row, vec![Pixel::TRANSPARENT, Pixel::from_gray8(5)]);
        assert_eq!(d.row(7).count(), 0);
    }

    #[test]
    fn test_resize_waits_for_writers() {
        let canvas = Arc::new(Canvas::new(Size::new(16, 16), 0).unwrap());
        let mut handles = vec![];

        for t in 0..4u8 {
            let canvas = Arc::clone(&canvas);
            handles.push(thread::spawn(move || {
                for i in 0..2000u32 {
                    let view = canvas.read();
                    view.set(i % 64, i % 48, Pixel::from_gray8(t));
                }
            }));
        }
        for i in 0..50u32 {
            canvas.resize(Size::new(16 + i, 48 - (i % 40))).unwrap();
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
