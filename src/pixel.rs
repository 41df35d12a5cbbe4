//! Pixel formats and the fixed-point multiplier used by the vignetting stage.

/// Supported pixel sample formats. Integer formats get fixed-point vignetting
/// math; floating formats are clamped in plain `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl PixelFormat {
    /// Saturation ceiling for a clamped multiply. `0.0` means "no clamp"
    /// (used for the floating formats, which the caller is trusted to range
    /// themselves).
    fn type_max(self) -> f64 {
        match self {
            PixelFormat::U8 => 0.0,
            PixelFormat::U16 => 65535.0,
            PixelFormat::U32 => 4294967295.0,
            PixelFormat::F32 | PixelFormat::F64 => 0.0,
        }
    }
}

fn clampd(x: f64, min: f64, max: f64) -> f64 {
    if max == 0.0 {
        x.max(min)
    } else {
        x.clamp(min, max)
    }
}

fn clampbits(x: i64, bits: u32) -> i64 {
    let max = (1i64 << bits) - 1;
    x.clamp(0, max)
}

/// One raw pixel sample, widened to `f64` for the multiply and narrowed back
/// on write. Mirrors `apply_multiplier<T>` in the original: u8/u16 go through
/// a fixed-point path, everything else a clamped double multiply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    F64(f64),
}

impl Sample {
    pub fn format(self) -> PixelFormat {
        match self {
            Sample::U8(_) => PixelFormat::U8,
            Sample::U16(_) => PixelFormat::U16,
            Sample::U32(_) => PixelFormat::U32,
            Sample::F32(_) => PixelFormat::F32,
            Sample::F64(_) => PixelFormat::F64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Sample::U8(v) => v as f64,
            Sample::U16(v) => v as f64,
            Sample::U32(v) => v as f64,
            Sample::F32(v) => v as f64,
            Sample::F64(v) => v,
        }
    }

    /// Apply a multiplicative correction `c` (e.g. a vignetting factor).
    /// U8 uses 20.12 fixed point capped at `2047 << 12`; U16 uses 22.10
    /// fixed point capped at `31 << 10`; everything else is a plain clamped
    /// double multiply against `type_max`.
    pub fn apply_multiplier(self, c: f64) -> Sample {
        match self {
            Sample::U8(pixel) => {
                let mut c12 = (c * 4096.0) as i64;
                if c12 > (2047 << 12) {
                    c12 = 2047 << 12;
                }
                let r = (pixel as i64 * c12 + 2048) >> 12;
                Sample::U8(clampbits(r, 8) as u8)
            }
            Sample::U16(pixel) => {
                let mut c10 = (c * 1024.0) as i64;
                if c10 > (31 << 10) {
                    c10 = 31 << 10;
                }
                let r = (pixel as i64 * c10 + 512) >> 10;
                Sample::U16(clampbits(r, 16) as u16)
            }
            Sample::U32(pixel) => {
                let max = PixelFormat::U32.type_max();
                let r = clampd(pixel as f64 * c, 0.0, max);
                Sample::U32(r as u32)
            }
            Sample::F32(pixel) => {
                let max = PixelFormat::F32.type_max();
                let r = clampd(pixel as f64 * c, 0.0, max);
                Sample::F32(r as f32)
            }
            Sample::F64(pixel) => {
                let max = PixelFormat::F64.type_max();
                Sample::F64(clampd(pixel * c, 0.0, max))
            }
        }
    }
}
