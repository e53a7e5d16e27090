// ============================================================================
// GRADATION OPERATIONS — two-point tone curves and histograms
// ============================================================================
//
// A gradation curve is a 256-entry lookup table built from two control
// points. Tables are applied per channel; rows are processed in parallel via
// rayon. Every operation reads the source buffer and returns a new one.
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;

use crate::error::{EngineError, Result};

// ============================================================================
// LOOKUP TABLE
// ============================================================================

/// 256-entry tone mapping: index = input sample, value = output sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lut([u8; 256]);

impl Lut {
    pub fn identity() -> Self {
        let mut table = [0u8; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = i as u8;
        }
        Lut(table)
    }

    /// Piecewise-linear table through `(input1, output1)` and `(input2, output2)`.
    /// Below `input1` the table is flat at `output1`, above `input2` it is flat
    /// at `output2`. `input1 > input2` is rejected rather than swapped.
    pub fn build(input1: u8, output1: u8, input2: u8, output2: u8) -> Result<Self> {
        if input1 > input2 {
            return Err(EngineError::Range(format!(
                "first control point input ({}) must not exceed the second ({})",
                input1, input2
            )));
        }
        let mut table = [0u8; 256];
        let (in1, in2) = (input1 as f64, input2 as f64);
        let (out1, out2) = (output1 as f64, output2 as f64);
        for (i, v) in table.iter_mut().enumerate() {
            let x = i as f64;
            *v = if i <= input1 as usize {
                output1
            } else if i >= input2 as usize {
                output2
            } else {
                // in1 < i < in2 here, so the span is never zero
                let t = (x - in1) / (in2 - in1);
                (out1 + t * (out2 - out1)).round().clamp(0.0, 255.0) as u8
            };
        }
        Ok(Lut(table))
    }

    #[inline]
    pub fn map(&self, value: u8) -> u8 {
        self.0[value as usize]
    }

    pub fn as_array(&self) -> &[u8; 256] {
        &self.0
    }
}

/// Which channel(s) a LUT is applied to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LutChannel {
    Red,
    Green,
    Blue,
    Alpha,
    /// R, G and B through the same table; alpha untouched.
    #[default]
    Rgb,
}

impl LutChannel {
    pub fn all() -> &'static [LutChannel] {
        &[LutChannel::Rgb, LutChannel::Red, LutChannel::Green, LutChannel::Blue, LutChannel::Alpha]
    }

    pub fn name(&self) -> &'static str {
        match self {
            LutChannel::Red => "red",
            LutChannel::Green => "green",
            LutChannel::Blue => "blue",
            LutChannel::Alpha => "alpha",
            LutChannel::Rgb => "rgb",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "red" | "r" => Some(LutChannel::Red),
            "green" | "g" => Some(LutChannel::Green),
            "blue" | "b" => Some(LutChannel::Blue),
            "alpha" | "a" => Some(LutChannel::Alpha),
            "rgb" => Some(LutChannel::Rgb),
            _ => None,
        }
    }

    /// Channel offsets (0..4) inside an RGBA pixel touched by this selector.
    fn offsets(&self) -> &'static [usize] {
        match self {
            LutChannel::Red => &[0],
            LutChannel::Green => &[1],
            LutChannel::Blue => &[2],
            LutChannel::Alpha => &[3],
            LutChannel::Rgb => &[0, 1, 2],
        }
    }
}

/// Map the selected channel(s) of every pixel through `lut`.
pub fn apply_lut(src: &RgbaImage, lut: &Lut, channel: LutChannel) -> RgbaImage {
    let (w, h) = src.dimensions();
    let stride = w as usize * 4;
    let mut dst_raw = src.as_raw().clone();
    if stride == 0 {
        return src.clone();
    }
    let offsets = channel.offsets();

    dst_raw.par_chunks_mut(stride).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            for &c in offsets {
                px[c] = lut.map(px[c]);
            }
        }
    });

    RgbaImage::from_raw(w, h, dst_raw).unwrap_or_else(|| src.clone())
}

// ============================================================================
// HISTOGRAM COMPUTATION (for the gradation curve display)
// ============================================================================

/// Per-channel value counts, 256 bins each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    pub red: [u32; 256],
    pub green: [u32; 256],
    pub blue: [u32; 256],
    pub alpha: [u32; 256],
}

impl Default for Histogram {
    fn default() -> Self {
        Self { red: [0; 256], green: [0; 256], blue: [0; 256], alpha: [0; 256] }
    }
}

impl Histogram {
    pub fn channel(&self, channel: LutChannel) -> &[u32; 256] {
        match channel {
            LutChannel::Red | LutChannel::Rgb => &self.red,
            LutChannel::Green => &self.green,
            LutChannel::Blue => &self.blue,
            LutChannel::Alpha => &self.alpha,
        }
    }

    fn merge(mut self, other: Histogram) -> Histogram {
        for i in 0..256 {
            self.red[i] += other.red[i];
            self.green[i] += other.green[i];
            self.blue[i] += other.blue[i];
            self.alpha[i] += other.alpha[i];
        }
        self
    }
}

/// Count per-value occurrences in each channel. Every pixel is counted,
/// including fully transparent ones.
pub fn compute_histogram(src: &RgbaImage) -> Histogram {
    let stride = src.width() as usize * 4;
    if stride == 0 {
        return Histogram::default();
    }
    src.as_raw()
        .par_chunks(stride)
        .fold(Histogram::default, |mut hist, row| {
            for px in row.chunks_exact(4) {
                hist.red[px[0] as usize] += 1;
                hist.green[px[1] as usize] += 1;
                hist.blue[px[2] as usize] += 1;
                hist.alpha[px[3] as usize] += 1;
            }
            hist
        })
        .reduce(Histogram::default, Histogram::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn identity_points_give_identity_table() {
        let lut = Lut::build(0, 0, 255, 255).unwrap();
        for i in 0..=255u8 {
            assert_eq!(lut.map(i), i, "entry {} should map to itself", i);
        }
        assert_eq!(lut, Lut::identity());
    }

    #[test]
    fn flat_regions_hold_control_outputs() {
        let lut = Lut::build(40, 10, 200, 220).unwrap();
        for i in 0..=40u8 {
            assert_eq!(lut.map(i), 10, "entry {} is below input1", i);
        }
        for i in 200..=255u8 {
            assert_eq!(lut.map(i), 220, "entry {} is above input2", i);
        }
        // midpoint of the ramp: 10 + 80/160 * 210 = 115
        assert_eq!(lut.map(120), 115);
    }

    #[test]
    fn endpoints_follow_outputs_on_full_range() {
        let lut = Lut::build(0, 30, 255, 180).unwrap();
        assert_eq!(lut.map(0), 30);
        assert_eq!(lut.map(255), 180);
    }

    #[test]
    fn equal_inputs_make_a_step() {
        let lut = Lut::build(128, 0, 128, 255).unwrap();
        assert_eq!(lut.map(127), 0);
        assert_eq!(lut.map(128), 0);
        assert_eq!(lut.map(129), 255);
    }

    #[test]
    fn reversed_inputs_are_rejected() {
        assert!(matches!(Lut::build(200, 0, 100, 255), Err(EngineError::Range(_))));
    }

    #[test]
    fn rgb_selector_leaves_alpha_alone() {
        let src = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 40]));
        let invert = Lut::build(0, 255, 255, 0).unwrap();
        let out = apply_lut(&src, &invert, LutChannel::Rgb);
        assert_eq!(out.get_pixel(1, 1).0, [245, 235, 225, 40]);
        // source untouched
        assert_eq!(src.get_pixel(1, 1).0, [10, 20, 30, 40]);
    }

    #[test]
    fn single_channel_selectors_touch_one_channel() {
        let src = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 40]));
        let invert = Lut::build(0, 255, 255, 0).unwrap();
        assert_eq!(apply_lut(&src, &invert, LutChannel::Red).get_pixel(0, 0).0, [245, 20, 30, 40]);
        let green = apply_lut(&src, &invert, LutChannel::Green);
        assert_eq!(green.get_pixel(0, 0).0, [10, 235, 30, 40]);
        assert_eq!(apply_lut(&src, &invert, LutChannel::Blue).get_pixel(0, 0).0, [10, 20, 225, 40]);
        let alpha = apply_lut(&src, &invert, LutChannel::Alpha);
        assert_eq!(alpha.get_pixel(0, 0).0, [10, 20, 30, 215]);
    }

    #[test]
    fn histogram_counts_every_pixel() {
        let mut src = RgbaImage::from_pixel(3, 2, Rgba([0, 128, 255, 0]));
        src.put_pixel(2, 1, Rgba([7, 7, 7, 255]));
        let hist = compute_histogram(&src);
        assert_eq!(hist.red[0], 5);
        assert_eq!(hist.red[7], 1);
        assert_eq!(hist.green[128], 5);
        assert_eq!(hist.blue[255], 5);
        assert_eq!(hist.alpha[0], 5);
        assert_eq!(hist.alpha[255], 1);
        assert_eq!(hist.red.iter().sum::<u32>(), 6);
    }
}
