//! Pixelflut protocol engine
//!
//! One `ProtocolEngine` per connection. It parses whatever is currently
//! buffered in the connection's [`RingBuffer`] and applies the commands:
//!
//! | Command                   | Reply                     |
//! |---------------------------|---------------------------|
//! | `PX <x> <y>`              | `PX <x> <y> <rrggbb>`     |
//! | `PX <x> <y> <RRGGBB>`     | none                      |
//! | `PX <x> <y> <RRGGBBAA>`   | none                      |
//! | `SIZE`                    | `SIZE <w> <h>`            |
//! | `OFFSET <x> <y>`          | none                      |
//!
//! Any run of space, tab, CR or LF separates tokens.
//!
//! # Partial commands
//!
//! Every command is parsed from a saved read mark. If the buffer ends
//! before the command is complete the cursor is rewound to that mark and
//! the engine returns [`Outcome::NeedMoreData`]; the bytes are parsed
//! again once the socket delivers more. A command is never half-applied.
//!
//! # Garbage
//!
//! Unrecognized input is skipped one token at a time. A single token longer
//! than the garbage limit is treated as abuse and ends the connection.

use std::io::Write;

use crate::canvas::CanvasView;
use crate::error::ProtocolViolation;
use crate::pixel::Pixel;
use crate::ring::RingBuffer;

/// Longest garbage token tolerated before disconnecting
pub const DEFAULT_GARBAGE_LIMIT: usize = 32;

/// Pending reply bytes after which the engine yields so they get flushed
pub const REPLY_FLUSH_THRESHOLD: usize = 16 * 1024;

/// Longest well-formed command: `OFFSET <u32> <u32>\n`
pub const MAX_COMMAND_LEN: usize = "OFFSET 4294967295 4294967295\n".len();

/// How incoming pixels are combined with the shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelMode {
    /// New pixel replaces the old one
    #[default]
    Overwrite,
    /// Non-opaque pixels are composited over the old one
    Blend,
}

/// Why [`ProtocolEngine::process`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Buffer exhausted or holds only an incomplete command
    NeedMoreData,
    /// Reply buffer is large; flush it and call `process` again
    FlushReplies,
}

/// Why parsing of the current command stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Incomplete,
    Garbage,
}

type Parse<T> = Result<T, Stop>;

#[inline]
fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
}

/// Per-connection parser state
#[derive(Debug)]
pub struct ProtocolEngine {
    offset_x: u32,
    offset_y: u32,
    mode: PixelMode,
    garbage_limit: usize,
    /// Bytes of the current garbage token already discarded, if inside one
    garbage_run: Option<usize>,
}

impl ProtocolEngine {
    pub fn new(mode: PixelMode, garbage_limit: usize) -> Self {
        Self {
            offset_x: 0,
            offset_y: 0,
            mode,
            garbage_limit,
            garbage_run: None,
        }
    }

    /// Coordinate translation set by `OFFSET`
    pub fn offset(&self) -> (u32, u32) {
        (self.offset_x, self.offset_y)
    }

    /// Parse and apply every complete command in `ring`.
    ///
    /// Pixel writes go to `shard`, queries and `SIZE` read `canonical`.
    /// Replies are appended to `replies`; the caller must write them out
    /// before handing the engine more data.
    pub fn process(
        &mut self,
        ring: &mut RingBuffer,
        shard: &CanvasView<'_>,
        canonical: &CanvasView<'_>,
        replies: &mut Vec<u8>,
    ) -> Result<Outcome, ProtocolViolation> {
        loop {
            if self.garbage_run.is_some() && !self.skip_garbage(ring)? {
                return Ok(Outcome::NeedMoreData);
            }
            while ring.peek_byte().is_some_and(is_whitespace) {
                ring.advance_read(1);
            }
            if !ring.any_available() {
                return Ok(Outcome::NeedMoreData);
            }
            if replies.len() >= REPLY_FLUSH_THRESHOLD {
                return Ok(Outcome::FlushReplies);
            }

            let start = ring.mark();
            match self.command(ring, shard, canonical, replies) {
                Ok(()) => {}
                Err(Stop::Incomplete) => {
                    ring.rewind(start);
                    return Ok(Outcome::NeedMoreData);
                }
                Err(Stop::Garbage) => {
                    ring.rewind(start);
                    self.garbage_run = Some(0);
                }
            }
        }
    }

    /// Discard the current garbage token. Returns false if the buffer ran
    /// out before the token ended.
    fn skip_garbage(&mut self, ring: &mut RingBuffer) -> Result<bool, ProtocolViolation> {
        let mut run = self.garbage_run.unwrap_or(0);
        while let Some(byte) = ring.peek_byte() {
            if is_whitespace(byte) {
                self.garbage_run = None;
                return Ok(true);
            }
            ring.advance_read(1);
            run += 1;
            if run > self.garbage_limit {
                return Err(ProtocolViolation::GarbageTokenTooLong {
                    len: run,
                    limit: self.garbage_limit,
                });
            }
        }
        self.garbage_run = Some(run);
        Ok(false)
    }

    fn command(
        &mut self,
        ring: &mut RingBuffer,
        shard: &CanvasView<'_>,
        canonical: &CanvasView<'_>,
        replies: &mut Vec<u8>,
    ) -> Parse<()> {
        if keyword(ring, b"PX", b"px")? {
            separator(ring)?;
            let x = decimal(ring)?;
            separator(ring)?;
            let y = decimal(ring)?;

            // A newline right after the coordinates makes this a query
            while let Some(byte) = ring.peek_byte().filter(|b| is_whitespace(*b)) {
                ring.advance_read(1);
                if byte == b'\n' {
                    break;
                }
            }
            if ring.peek_previous_byte() == b'\n' {
                self.query(x, y, canonical, replies);
                return Ok(());
            }
            if !ring.any_available() {
                return Err(Stop::Incomplete);
            }

            let (value, digits) = hex(ring)?;
            let pixel = Pixel::from_hex(value, digits).ok_or(Stop::Garbage)?;
            self.apply(x, y, pixel, shard);
            Ok(())
        } else if keyword(ring, b"SIZE", b"size")? {
            terminator(ring)?;
            let size = canonical.size();
            let _ = writeln!(replies, "SIZE {} {}", size.width, size.height);
            Ok(())
        } else if keyword(ring, b"OFFSET", b"offset")? {
            separator(ring)?;
            let x = decimal(ring)?;
            separator(ring)?;
            let y = decimal(ring)?;
            self.offset_x = x;
            self.offset_y = y;
            Ok(())
        } else {
            Err(Stop::Garbage)
        }
    }

    fn query(&self, x: u32, y: u32, canonical: &CanvasView<'_>, replies: &mut Vec<u8>) {
        let pixel = canonical.get(x.saturating_add(self.offset_x), y.saturating_add(self.offset_y));
        if let Some(pixel) = pixel {
            let _ = writeln!(replies, "PX {} {} {:x}", x, y, pixel);
        }
    }

    fn apply(&self, x: u32, y: u32, pixel: Pixel, shard: &CanvasView<'_>) {
        let x = x.saturating_add(self.offset_x);
        let y = y.saturating_add(self.offset_y);
        // Out of bounds is silently ignored
        match self.mode {
            PixelMode::Blend if !pixel.is_opaque() => shard.blend(x, y, pixel),
            _ => shard.set(x, y, pixel),
        };
    }
}

/// Match and consume a command keyword in either case
fn keyword(ring: &mut RingBuffer, upper: &[u8], lower: &[u8]) -> Parse<bool> {
    let available = ring.available();
    if available < upper.len() {
        let partial = ring.prefix_equals(&upper[..available], false)
            || ring.prefix_equals(&lower[..available], false);
        return if partial { Err(Stop::Incomplete) } else { Ok(false) };
    }
    Ok(ring.prefix_equals(upper, true) || ring.prefix_equals(lower, true))
}

/// Consume a non-empty whitespace run that must be followed by a token
fn separator(ring: &mut RingBuffer) -> Parse<()> {
    match ring.peek_byte() {
        None => return Err(Stop::Incomplete),
        Some(byte) if !is_whitespace(byte) => return Err(Stop::Garbage),
        Some(_) => {}
    }
    while let Some(byte) = ring.peek_byte() {
        if !is_whitespace(byte) {
            return Ok(());
        }
        ring.advance_read(1);
    }
    Err(Stop::Incomplete)
}

/// Require (but do not consume) whitespace after a token
fn terminator(ring: &RingBuffer) -> Parse<()> {
    match ring.peek_byte() {
        None => Err(Stop::Incomplete),
        Some(byte) if is_whitespace(byte) => Ok(()),
        Some(_) => Err(Stop::Garbage),
    }
}

/// Unsigned decimal, saturating at `u32::MAX` (always out of bounds)
fn decimal(ring: &mut RingBuffer) -> Parse<u32> {
    let mut value: u32 = 0;
    let mut digits = 0usize;
    while let Some(byte) = ring.peek_byte() {
        if !byte.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add((byte - b'0') as u32);
        digits += 1;
        ring.advance_read(1);
    }
    if digits == 0 && ring.any_available() {
        return Err(Stop::Garbage);
    }
    terminator(ring)?;
    Ok(value)
}

/// Hex color, returns value and digit count
fn hex(ring: &mut RingBuffer) -> Parse<(u32, usize)> {
    let mut value: u32 = 0;
    let mut digits = 0usize;
    while let Some(byte) = ring.peek_byte() {
        let nibble = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => break,
        };
        if digits == 8 {
            return Err(Stop::Garbage);
        }
        value = value << 4 | nibble as u32;
        digits += 1;
        ring.advance_read(1);
    }
    terminator(ring)?;
    Ok((value, digits))
}
