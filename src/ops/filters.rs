// ============================================================================
// IMAGE FILTERS — convolution, 3×3 median, Laplacian
// ============================================================================
//
// Every filter reads the source buffer and writes a freshly allocated one,
// one output row per rayon task. Alpha is copied from the source pixel at the
// same position; only R, G and B are filtered.
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;

use crate::error::{EngineError, Result};

// ============================================================================
// KERNEL
// ============================================================================

/// Square convolution matrix with an odd side, stored row-major.
/// Weights are used as given; nothing is normalized.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    side: usize,
    weights: Vec<f64>,
}

impl Kernel {
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self> {
        let side = rows.len();
        if side == 0 || side % 2 == 0 {
            return Err(EngineError::Range(format!("kernel side must be odd, got {}", side)));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != side) {
            return Err(EngineError::Range(format!(
                "kernel must be square: row of {} in a {}x{} kernel",
                bad.len(),
                side,
                side
            )));
        }
        if rows.iter().flatten().any(|w| !w.is_finite()) {
            return Err(EngineError::Range("kernel weights must be finite".into()));
        }
        Ok(Self { side, weights: rows.into_iter().flatten().collect() })
    }

    /// Build from a flat row-major list whose length is an odd square (9, 25, ...).
    pub fn from_flat(values: &[f64]) -> Result<Self> {
        let side = (values.len() as f64).sqrt().round() as usize;
        if side * side != values.len() {
            return Err(EngineError::Range(format!(
                "{} kernel values do not form a square matrix",
                values.len()
            )));
        }
        Self::new(values.chunks(side.max(1)).map(|r| r.to_vec()).collect())
    }

    /// Scale every weight (used by the blur presets).
    fn scaled(rows: [[f64; 3]; 3], factor: f64) -> Self {
        Self {
            side: 3,
            weights: rows.iter().flatten().map(|w| w * factor).collect(),
        }
    }

    pub fn identity() -> Self {
        Self::scaled([[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]], 1.0)
    }

    pub fn laplacian() -> Self {
        Self::scaled([[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]], 1.0)
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn weight(&self, kx: usize, ky: usize) -> f64 {
        self.weights[ky * self.side + kx]
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.weights.chunks(self.side).map(|r| r.to_vec()).collect()
    }
}

/// Kernels offered by the custom-filter picker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelPreset {
    Identity,
    Sharpen,
    Gaussian,
    BoxBlur,
    PrewittX,
    PrewittY,
}

impl KernelPreset {
    pub fn all() -> &'static [KernelPreset] {
        &[
            KernelPreset::Identity,
            KernelPreset::Sharpen,
            KernelPreset::Gaussian,
            KernelPreset::BoxBlur,
            KernelPreset::PrewittX,
            KernelPreset::PrewittY,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            KernelPreset::Identity => "identity",
            KernelPreset::Sharpen => "sharpen",
            KernelPreset::Gaussian => "gaussian",
            KernelPreset::BoxBlur => "box-blur",
            KernelPreset::PrewittX => "prewitt-x",
            KernelPreset::PrewittY => "prewitt-y",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let key = name.to_lowercase().replace('_', "-");
        Self::all()
            .iter()
            .copied()
            .find(|p| p.name() == key || (key == "blur" && *p == KernelPreset::BoxBlur))
    }

    pub fn kernel(&self) -> Kernel {
        match self {
            KernelPreset::Identity => Kernel::identity(),
            KernelPreset::Sharpen => {
                Kernel::scaled([[0.0, -1.0, 0.0], [-1.0, 5.0, -1.0], [0.0, -1.0, 0.0]], 1.0)
            }
            KernelPreset::Gaussian => {
                Kernel::scaled([[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [1.0, 2.0, 1.0]], 1.0 / 16.0)
            }
            KernelPreset::BoxBlur => Kernel::scaled([[1.0; 3]; 3], 1.0 / 9.0),
            KernelPreset::PrewittX => {
                Kernel::scaled([[-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0]], 1.0)
            }
            KernelPreset::PrewittY => {
                Kernel::scaled([[-1.0, -1.0, -1.0], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]], 1.0)
            }
        }
    }
}

// ============================================================================
// FILTER SELECTION
// ============================================================================

/// How the 3×3 median treats the outermost row and column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MedianBorder {
    /// Border pixels are not computed and stay zero in all four channels.
    #[default]
    Unfiltered,
    /// Samples are clamped to the edge and every pixel is filtered.
    Clamp,
}

impl MedianBorder {
    pub fn name(&self) -> &'static str {
        match self {
            MedianBorder::Unfiltered => "unfiltered",
            MedianBorder::Clamp => "clamp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "unfiltered" | "zero" => Some(MedianBorder::Unfiltered),
            "clamp" | "edge" => Some(MedianBorder::Clamp),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterKind {
    Convolution(Kernel),
    Median(MedianBorder),
    Laplacian,
}

impl FilterKind {
    pub fn label(&self) -> String {
        match self {
            FilterKind::Convolution(k) => format!("convolution {}x{}", k.side(), k.side()),
            FilterKind::Median(border) => format!("median ({} border)", border.name()),
            FilterKind::Laplacian => "laplacian".to_string(),
        }
    }
}

pub fn apply_filter(src: &RgbaImage, kind: &FilterKind) -> RgbaImage {
    match kind {
        FilterKind::Convolution(kernel) => convolve(src, kernel),
        FilterKind::Median(border) => median(src, *border),
        FilterKind::Laplacian => laplacian(src),
    }
}

// ============================================================================
// CONVOLUTION
// ============================================================================

/// Clamp-to-edge convolution of R, G and B:
/// `out = round(clamp(Σ k[ky][kx] · src[y+ky-half][x+kx-half], 0, 255))`.
pub fn convolve(src: &RgbaImage, kernel: &Kernel) -> RgbaImage {
    let (w, h) = src.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    if wu == 0 || hu == 0 {
        return src.clone();
    }
    let src_raw = src.as_raw();
    let stride = wu * 4;
    let side = kernel.side();
    let half = (side / 2) as i64;
    let mut dst_raw = vec![0u8; wu * hu * 4];

    dst_raw.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..wu {
            let mut acc = [0.0f64; 3];
            for ky in 0..side {
                let py = (y as i64 + ky as i64 - half).clamp(0, hu as i64 - 1) as usize;
                let row = py * stride;
                for kx in 0..side {
                    let px = (x as i64 + kx as i64 - half).clamp(0, wu as i64 - 1) as usize;
                    let weight = kernel.weight(kx, ky);
                    let si = row + px * 4;
                    acc[0] += src_raw[si] as f64 * weight;
                    acc[1] += src_raw[si + 1] as f64 * weight;
                    acc[2] += src_raw[si + 2] as f64 * weight;
                }
            }
            let di = x * 4;
            for c in 0..3 {
                row_out[di + c] = acc[c].clamp(0.0, 255.0).round() as u8;
            }
            row_out[di + 3] = src_raw[y * stride + di + 3];
        }
    });

    RgbaImage::from_raw(w, h, dst_raw).unwrap_or_else(|| src.clone())
}

pub fn laplacian(src: &RgbaImage) -> RgbaImage {
    convolve(src, &Kernel::laplacian())
}

// ============================================================================
// MEDIAN
// ============================================================================

/// 3×3 per-channel median of R, G and B (sorted index 4); alpha is copied
/// from the centre pixel.
pub fn median(src: &RgbaImage, border: MedianBorder) -> RgbaImage {
    let (w, h) = src.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    if wu == 0 || hu == 0 {
        return src.clone();
    }
    let src_raw = src.as_raw();
    let stride = wu * 4;
    let mut dst_raw = vec![0u8; wu * hu * 4];

    dst_raw.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let interior_row = y >= 1 && y + 1 < hu;
        if border == MedianBorder::Unfiltered && !interior_row {
            return;
        }
        let mut window = [[0u8; 9]; 3];
        for x in 0..wu {
            if border == MedianBorder::Unfiltered && (x == 0 || x + 1 == wu) {
                continue;
            }
            let mut n = 0;
            for dy in -1i64..=1 {
                let py = (y as i64 + dy).clamp(0, hu as i64 - 1) as usize;
                for dx in -1i64..=1 {
                    let px = (x as i64 + dx).clamp(0, wu as i64 - 1) as usize;
                    let si = py * stride + px * 4;
                    window[0][n] = src_raw[si];
                    window[1][n] = src_raw[si + 1];
                    window[2][n] = src_raw[si + 2];
                    n += 1;
                }
            }
            let di = x * 4;
            for c in 0..3 {
                window[c].sort_unstable();
                row_out[di + c] = window[c][4];
            }
            row_out[di + 3] = src_raw[y * stride + di + 3];
        }
    });

    RgbaImage::from_raw(w, h, dst_raw).unwrap_or_else(|| src.clone())
}
