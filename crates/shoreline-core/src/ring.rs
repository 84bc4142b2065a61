//! `RingBuffer`: fixed-capacity circular byte buffer for one connection.
//!
//! Bytes arrive from the socket at the write cursor and are parsed from the
//! read cursor. A partially received command simply stays in the ring until
//! the rest arrives, so already-parsed data is never shifted.
//!
//! # Cursors
//!
//! ```text
//!   0         read              write          capacity
//!   |---------[#################]--------------|
//!              available()        free_space()
//! ```
//!
//! Both cursors are indices in `0..capacity`. One byte is always kept
//! free so that `read == write` unambiguously means "empty":
//! `available() + free_space() == capacity - 1`.
//!
//! Every multi-byte operation splits into at most two copies when the range
//! straddles the end of storage.
//!
//! # Thread safety
//!
//! None. A ring belongs to exactly one connection thread.

use crate::error::{Result, RingError, ShorelineError};

/// Position of the read cursor, used to rewind after an incomplete command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMark(usize);

pub struct RingBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl RingBuffer {
    /// Allocate a ring holding up to `capacity - 1` bytes.
    ///
    /// Fails with `ResourceExhaustion` if the storage cannot be allocated
    /// or `capacity < 2`.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(ShorelineError::ResourceExhaustion("ring capacity below 2 bytes"));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| ShorelineError::ResourceExhaustion("ring storage"))?;
        data.resize(capacity, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            read: 0,
            write: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn wrap(&self, pos: usize) -> usize {
        if pos >= self.data.len() {
            pos - self.data.len()
        } else {
            pos
        }
    }

    /// Bytes between read and write cursor
    #[inline]
    pub fn available(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.data.len() - self.read + self.write
        }
    }

    #[inline]
    pub fn any_available(&self) -> bool {
        self.read != self.write
    }

    /// Bytes readable without wrapping
    #[inline]
    pub fn available_contig(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.data.len() - self.read
        }
    }

    /// Bytes that can be written before the ring is full
    #[inline]
    pub fn free_space(&self) -> usize {
        self.data.len() - 1 - self.available()
    }

    /// Bytes writable without wrapping
    #[inline]
    pub fn free_space_contig(&self) -> usize {
        self.writable_end() - self.write
    }

    /// End of the free region that starts at the write cursor
    fn writable_end(&self) -> usize {
        if self.write >= self.read {
            if self.read == 0 {
                self.data.len() - 1
            } else {
                self.data.len()
            }
        } else {
            self.read - 1
        }
    }

    /// Contiguous free region at the write cursor.
    ///
    /// Lets the socket read straight into the ring; follow with
    /// [`advance_write`](Self::advance_write).
    pub fn writable(&mut self) -> &mut [u8] {
        let end = self.writable_end();
        &mut self.data[self.write..end]
    }

    /// Append `bytes`. Fails without writing anything if they do not fit.
    pub fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), RingError> {
        let free = self.free_space();
        if bytes.len() > free {
            return Err(RingError::InsufficientSpace { requested: bytes.len(), free });
        }
        let first = bytes.len().min(self.data.len() - self.write);
        self.data[self.write..self.write + first].copy_from_slice(&bytes[..first]);
        self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.write = self.wrap(self.write + bytes.len());
        Ok(())
    }

    /// Copy `out.len()` bytes from the read cursor without consuming them
    pub fn peek(&self, out: &mut [u8]) -> std::result::Result<(), RingError> {
        let available = self.available();
        if out.len() > available {
            return Err(RingError::InsufficientData { requested: out.len(), available });
        }
        let first = out.len().min(self.data.len() - self.read);
        let (head, tail) = out.split_at_mut(first);
        head.copy_from_slice(&self.data[self.read..self.read + first]);
        tail.copy_from_slice(&self.data[..tail.len()]);
        Ok(())
    }

    /// Copy and consume `out.len()` bytes
    pub fn read(&mut self, out: &mut [u8]) -> std::result::Result<(), RingError> {
        self.peek(out)?;
        self.read = self.wrap(self.read + out.len());
        Ok(())
    }

    #[inline]
    pub fn peek_byte(&self) -> Option<u8> {
        self.any_available().then(|| self.data[self.read])
    }

    #[inline]
    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = self.peek_byte()?;
        self.read = self.wrap(self.read + 1);
        Some(byte)
    }

    /// The byte just behind the read cursor (the last one consumed)
    #[inline]
    pub fn peek_previous_byte(&self) -> u8 {
        let pos = if self.read == 0 { self.data.len() - 1 } else { self.read - 1 };
        self.data[pos]
    }

    /// Consume `n` bytes. `n` must not exceed `available()`.
    #[inline]
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.available(), "advance_read past write cursor");
        self.read = self.wrap(self.read + n);
    }

    /// Publish `n` bytes written through [`writable`](Self::writable).
    /// `n` must not exceed `free_space()`.
    #[inline]
    pub fn advance_write(&mut self, n: usize) {
        assert!(n <= self.free_space(), "advance_write past read cursor");
        self.write = self.wrap(self.write + n);
    }

    /// Compare the next `reference.len()` bytes against `reference`
    /// without linearizing the ring. Returns false if fewer bytes are
    /// available. When `consume` is set a match also advances past it.
    pub fn prefix_equals(&mut self, reference: &[u8], consume: bool) -> bool {
        if reference.len() > self.available() {
            return false;
        }
        let first = reference.len().min(self.data.len() - self.read);
        let matched = self.data[self.read..self.read + first] == reference[..first]
            && self.data[..reference.len() - first] == reference[first..];
        if matched && consume {
            self.read = self.wrap(self.read + reference.len());
        }
        matched
    }

    /// Current read position
    #[inline]
    pub fn mark(&self) -> ReadMark {
        ReadMark(self.read)
    }

    /// Move the read cursor back to `mark`.
    ///
    /// Only valid for a mark taken since the last write that could have
    /// reused the bytes in between, i.e. within one parse pass.
    #[inline]
    pub fn rewind(&mut self, mark: ReadMark) {
        self.read = mark.0;
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}
