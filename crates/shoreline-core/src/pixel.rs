//! Packed 32-bit pixel
//!
//! In memory a pixel is always `[alpha, blue, green, red]`, which is the
//! layout output backends expect. The shift for each channel inside the
//! `u32` therefore depends on host byte order and is picked at build time.

use core::fmt;

cfg_if::cfg_if! {
    if #[cfg(target_endian = "little")] {
        const ALPHA_SHIFT: u32 = 0;
        const BLUE_SHIFT: u32 = 8;
        const GREEN_SHIFT: u32 = 16;
        const RED_SHIFT: u32 = 24;
    } else {
        const ALPHA_SHIFT: u32 = 24;
        const BLUE_SHIFT: u32 = 16;
        const GREEN_SHIFT: u32 = 8;
        const RED_SHIFT: u32 = 0;
    }
}

/// One canvas pixel: 8 bits alpha + 24 bits color
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pixel(u32);

impl Pixel {
    /// Fully transparent black; the value of freshly allocated storage
    pub const TRANSPARENT: Pixel = Pixel(0);

    #[inline]
    pub const fn from_rgba(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Pixel(
            (alpha as u32) << ALPHA_SHIFT
                | (blue as u32) << BLUE_SHIFT
                | (green as u32) << GREEN_SHIFT
                | (red as u32) << RED_SHIFT,
        )
    }

    /// Opaque pixel
    #[inline]
    pub const fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
        Self::from_rgba(red, green, blue, 0xff)
    }

    /// Opaque gray pixel with all channels set to `level`
    #[inline]
    pub const fn from_gray8(level: u8) -> Self {
        Self::from_rgb(level, level, level)
    }

    /// Decode a parsed hex color.
    ///
    /// `digits` is the number of hex digits the value was parsed from:
    /// 6 means `RRGGBB` (opaque), 8 means `RRGGBBAA`.
    #[inline]
    pub fn from_hex(value: u32, digits: usize) -> Option<Self> {
        match digits {
            6 => Some(Self::from_rgb((value >> 16) as u8, (value >> 8) as u8, value as u8)),
            8 => Some(Self::from_rgba(
                (value >> 24) as u8,
                (value >> 16) as u8,
                (value >> 8) as u8,
                value as u8,
            )),
            _ => None,
        }
    }

    /// Wrap a raw value as stored in canvas memory
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Pixel(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn red(self) -> u8 {
        (self.0 >> RED_SHIFT) as u8
    }

    #[inline]
    pub const fn green(self) -> u8 {
        (self.0 >> GREEN_SHIFT) as u8
    }

    #[inline]
    pub const fn blue(self) -> u8 {
        (self.0 >> BLUE_SHIFT) as u8
    }

    #[inline]
    pub const fn alpha(self) -> u8 {
        (self.0 >> ALPHA_SHIFT) as u8
    }

    #[inline]
    pub const fn is_transparent(self) -> bool {
        self.alpha() == 0
    }

    #[inline]
    pub const fn is_opaque(self) -> bool {
        self.alpha() == 0xff
    }

    /// Composite `self` over `under` (straight alpha, "over" operator).
    ///
    /// `a = a_new + a_old * (1 - a_new)` and each channel is
    /// `(c_new * a_new + c_old * a_old * (1 - a_new)) / a`.
    pub fn over(self, under: Pixel) -> Pixel {
        let a_new = self.alpha() as u32;
        if a_new == 0xff {
            return self;
        }
        if a_new == 0 {
            return under;
        }
        // Everything scaled by 255 * 255 to stay in integers
        let a_old = under.alpha() as u32 * (255 - a_new);
        let a_new = a_new * 255;
        let a_out = a_new + a_old;
        let mix = |new: u8, old: u8| -> u8 {
            ((new as u32 * a_new + old as u32 * a_old + a_out / 2) / a_out) as u8
        };
        Pixel::from_rgba(
            mix(self.red(), under.red()),
            mix(self.green(), under.green()),
            mix(self.blue(), under.blue()),
            ((a_out + 127) / 255) as u8,
        )
    }
}

impl fmt::Debug for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pixel(#{:02x}{:02x}{:02x}{:02x})",
            self.red(),
            self.green(),
            self.blue(),
            self.alpha()
        )
    }
}

/// Formats as lowercase `rrggbb`, the color field of a query reply
impl fmt::LowerHex for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.red(), self.green(), self.blue())
    }
}
