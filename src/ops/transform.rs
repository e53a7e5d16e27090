// ============================================================================
// TRANSFORM OPERATIONS — nearest / bilinear resampling and layer resize
// ============================================================================
//
// The resamplers work on raw RGBA byte slices so they can be reused by the
// compositor (zoom) and by the resize operation. All arithmetic is f64 and
// rounding goes through `f64::round` on non-negative values, so output is
// identical on every platform.
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;

use crate::error::{EngineError, Result};

/// Interpolation method for resize operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

impl Interpolation {
    pub fn all() -> &'static [Interpolation] {
        &[Interpolation::Nearest, Interpolation::Bilinear]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Bilinear => "bilinear",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "nearest" | "nearest-neighbor" | "nn" => Some(Interpolation::Nearest),
            "bilinear" | "linear" => Some(Interpolation::Bilinear),
            _ => None,
        }
    }

    /// Resample a raw RGBA buffer with this strategy.
    pub fn resample(&self, src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
        match self {
            Interpolation::Nearest => nearest_neighbor(src, sw, sh, dw, dh),
            Interpolation::Bilinear => bilinear(src, sw, sh, dw, dh),
        }
    }
}

// ---------------------------------------------------------------------------
//  Resamplers
// ---------------------------------------------------------------------------

/// Nearest-neighbour: destination `(x, y)` reads source
/// `(floor(x * sw/dw), floor(y * sh/dh))`, all four channels verbatim.
pub fn nearest_neighbor(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    let dst_stride = dw as usize * 4;
    let mut dst = vec![0u8; dst_stride * dh as usize];
    if dst.is_empty() || sw == 0 || sh == 0 {
        return dst;
    }
    let x_ratio = sw as f64 / dw as f64;
    let y_ratio = sh as f64 / dh as f64;
    let sw_us = sw as usize;

    dst.par_chunks_mut(dst_stride).enumerate().for_each(|(y, row_out)| {
        let sy = ((y as f64 * y_ratio).floor() as usize).min(sh as usize - 1);
        for x in 0..dw as usize {
            let sx = ((x as f64 * x_ratio).floor() as usize).min(sw_us - 1);
            let si = (sy * sw_us + sx) * 4;
            let di = x * 4;
            row_out[di..di + 4].copy_from_slice(&src[si..si + 4]);
        }
    });

    dst
}

/// Bilinear with ratio `(s - 1) / d`; neighbours are clamped to the source
/// bounds. Alpha is interpolated exactly like color (no premultiplication),
/// which can fringe at hard transparency edges.
pub fn bilinear(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    let dst_stride = dw as usize * 4;
    let mut dst = vec![0u8; dst_stride * dh as usize];
    if dst.is_empty() || sw == 0 || sh == 0 {
        return dst;
    }
    let x_ratio = (sw as f64 - 1.0) / dw as f64;
    let y_ratio = (sh as f64 - 1.0) / dh as f64;
    let sw_us = sw as usize;
    let max_x = sw_us - 1;
    let max_y = sh as usize - 1;

    dst.par_chunks_mut(dst_stride).enumerate().for_each(|(y, row_out)| {
        let gy = y as f64 * y_ratio;
        let y1 = (gy.floor() as usize).min(max_y);
        let y2 = (y1 + 1).min(max_y);
        let fy = gy - y1 as f64;
        let fy_inv = 1.0 - fy;

        for x in 0..dw as usize {
            let gx = x as f64 * x_ratio;
            let x1 = (gx.floor() as usize).min(max_x);
            let x2 = (x1 + 1).min(max_x);
            let fx = gx - x1 as f64;
            let fx_inv = 1.0 - fx;

            let tl = (y1 * sw_us + x1) * 4;
            let tr = (y1 * sw_us + x2) * 4;
            let bl = (y2 * sw_us + x1) * 4;
            let br = (y2 * sw_us + x2) * 4;
            let di = x * 4;

            for c in 0..4 {
                let val = src[tl + c] as f64 * fx_inv * fy_inv
                    + src[tr + c] as f64 * fx * fy_inv
                    + src[bl + c] as f64 * fx_inv * fy
                    + src[br + c] as f64 * fx * fy;
                row_out[di + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    });

    dst
}

/// Resample an `RgbaImage` to `dw × dh`.
pub fn resize_rgba(src: &RgbaImage, dw: u32, dh: u32, interp: Interpolation) -> RgbaImage {
    let (sw, sh) = src.dimensions();
    if (sw, sh) == (dw, dh) {
        return src.clone();
    }
    let raw = interp.resample(src.as_raw(), sw, sh, dw, dh);
    RgbaImage::from_raw(dw, dh, raw).unwrap_or_else(|| RgbaImage::new(dw, dh))
}

// ---------------------------------------------------------------------------
//  Resize targets
// ---------------------------------------------------------------------------

/// Pixel count above which a resize is allowed but logged as heavy.
pub const LARGE_IMAGE_PIXELS: u64 = 4_000_000;

/// How the user expressed the new size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResizeTarget {
    /// Scale factors in percent. With the aspect lock only `x` is used.
    Percent { x: f64, y: f64 },
    /// Absolute size. With the aspect lock `height` is derived from `width`.
    Pixels { width: u32, height: u32 },
}

impl ResizeTarget {
    /// Resolve to concrete output dimensions for a `w × h` source and check
    /// them against `max_dimension`.
    pub fn resolve(
        &self,
        w: u32,
        h: u32,
        keep_aspect: bool,
        max_dimension: u32,
    ) -> Result<(u32, u32)> {
        let (nw, nh): (f64, f64) = match *self {
            ResizeTarget::Percent { x, y } => {
                let sx = x / 100.0;
                let sy = if keep_aspect { sx } else { y / 100.0 };
                ((w as f64 * sx).round(), (h as f64 * sy).round())
            }
            ResizeTarget::Pixels { width, height } => {
                let nh = if keep_aspect {
                    if w == 0 {
                        return Err(EngineError::Range(
                            "cannot keep the aspect of an empty layer".into(),
                        ));
                    }
                    (h as f64 * (width as f64 / w as f64)).round()
                } else {
                    height as f64
                };
                (width as f64, nh)
            }
        };

        if !(nw.is_finite() && nh.is_finite()) || nw <= 0.0 || nh <= 0.0 {
            return Err(EngineError::Range("Dimensions must be positive numbers".into()));
        }
        if nw > max_dimension as f64 || nh > max_dimension as f64 {
            return Err(EngineError::Size(format!(
                "Maximum allowed dimension is {}px (requested {}x{})",
                max_dimension, nw, nh
            )));
        }
        Ok((nw as u32, nh as u32))
    }
}

/// Parse `50%`, `50%x25%` or `640x480`.
pub fn parse_resize_target(s: &str) -> Option<ResizeTarget> {
    let s = s.trim();
    let (a, b) = match s.split_once(['x', 'X']) {
        Some((a, b)) => (a.trim(), Some(b.trim())),
        None => (s, None),
    };
    if let Some(px) = a.strip_suffix('%') {
        let x: f64 = px.trim().parse().ok()?;
        let y = match b {
            Some(b) => b.strip_suffix('%')?.trim().parse().ok()?,
            None => x,
        };
        return Some(ResizeTarget::Percent { x, y });
    }
    let width: u32 = a.parse().ok()?;
    let height: u32 = b?.parse().ok()?;
    Some(ResizeTarget::Pixels { width, height })
}
