//! Display modes and fixed point coordinates

use std::fmt;

bitflags::bitflags! {
    /// Timing flags of a mode, as passed to the kernel
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        /// Positive horizontal sync
        const PHSYNC    = 1 << 0;
        /// Negative horizontal sync
        const NHSYNC    = 1 << 1;
        /// Positive vertical sync
        const PVSYNC    = 1 << 2;
        /// Negative vertical sync
        const NVSYNC    = 1 << 3;
        /// Interlaced
        const INTERLACE = 1 << 4;
        /// Double scan
        const DBLSCAN   = 1 << 5;
        /// Composite sync
        const CSYNC     = 1 << 6;
        /// Positive composite sync
        const PCSYNC    = 1 << 7;
        /// Negative composite sync
        const NCSYNC    = 1 << 8;
        /// Horizontal skew
        const HSKEW     = 1 << 9;
        /// Double clock
        const DBLCLK    = 1 << 12;
        /// Clock divided by two
        const CLKDIV2   = 1 << 13;
    }
}

bitflags::bitflags! {
    /// Origin of a mode
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ModeTypeFlags: u32 {
        /// The sink prefers this mode
        const PREFERRED = 1 << 3;
        /// Created by userspace
        const USERDEF   = 1 << 5;
        /// Reported by the driver
        const DRIVER    = 1 << 6;
    }
}

/// A display mode
///
/// Mirrors the kernel `drm_mode_modeinfo` layout field by field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModeInfo {
    /// Pixel clock in kHz
    pub clock: u32,
    /// Horizontal active pixels
    pub hdisplay: u16,
    /// Horizontal sync start
    pub hsync_start: u16,
    /// Horizontal sync end
    pub hsync_end: u16,
    /// Horizontal total
    pub htotal: u16,
    /// Horizontal skew
    pub hskew: u16,
    /// Vertical active lines
    pub vdisplay: u16,
    /// Vertical sync start
    pub vsync_start: u16,
    /// Vertical sync end
    pub vsync_end: u16,
    /// Vertical total
    pub vtotal: u16,
    /// Vertical scan
    pub vscan: u16,
    /// Refresh rate in Hz
    pub vrefresh: u32,
    /// Timing flags
    pub flags: ModeFlags,
    /// Mode type
    pub mode_type: ModeTypeFlags,
    /// Mode name, at most 31 bytes are passed to the kernel
    pub name: String,
}

impl ModeInfo {
    /// The VESA 1024x768@60 mode, used when a connected sink reports no modes at all
    pub fn fallback() -> ModeInfo {
        ModeInfo {
            clock: 65000,
            hdisplay: 1024,
            hsync_start: 1048,
            hsync_end: 1184,
            htotal: 1344,
            hskew: 0,
            vdisplay: 768,
            vsync_start: 771,
            vsync_end: 777,
            vtotal: 806,
            vscan: 0,
            vrefresh: 60,
            flags: ModeFlags::NHSYNC | ModeFlags::NVSYNC,
            mode_type: ModeTypeFlags::DRIVER,
            name: String::from("1024x768"),
        }
    }

    /// Active size in pixels
    pub fn size(&self) -> (u16, u16) {
        (self.hdisplay, self.vdisplay)
    }

    /// Whether the sink flagged this mode as preferred
    pub fn is_preferred(&self) -> bool {
        self.mode_type.contains(ModeTypeFlags::PREFERRED)
    }
}

impl fmt::Display for ModeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.hdisplay, self.vdisplay, self.vrefresh)
    }
}

/// A 16.16 fixed point value, as used by plane source coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed(u32);

impl Fixed {
    /// Zero
    pub const ZERO: Fixed = Fixed(0);

    /// Fixed point value of an integer
    pub const fn from_int(value: u16) -> Fixed {
        Fixed((value as u32) << 16)
    }

    /// Fixed point value of a pixel size, saturating at the largest integer part
    pub fn saturating_from_u32(value: u32) -> Fixed {
        Fixed::from_int(u16::try_from(value).unwrap_or(u16::MAX))
    }

    /// Fixed point value from its raw 16.16 representation
    pub const fn from_bits(bits: u32) -> Fixed {
        Fixed(bits)
    }

    /// Closest fixed point value of a float
    #[inline]
    pub fn from_f64(value: f64) -> Fixed {
        Fixed(f64::round(value * (1 << 16) as f64) as u32)
    }

    /// Raw 16.16 representation
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Integer part
    pub const fn trunc(self) -> u32 {
        self.0 >> 16
    }

    /// Value as float
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / (1 << 16) as f64
    }
}

impl From<u16> for Fixed {
    fn from(value: u16) -> Self {
        Fixed::from_int(value)
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}
