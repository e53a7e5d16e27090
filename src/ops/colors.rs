// ============================================================================
// COLOR SCIENCE — RGB → XYZ → Lab → LCH, RGB → OKLCH, WCAG contrast
// ============================================================================
//
// Pure f64 conversions used by the eyedropper readout. XYZ is scaled to
// 0..100 with a D65 white point; OKLCH lightness is reported as 0..100.
// ============================================================================

use image::Rgba;

use crate::error::{EngineError, Result};

/// D65 reference white, XYZ scaled to 100.
const WHITE_X: f64 = 95.047;
const WHITE_Y: f64 = 100.0;
const WHITE_Z: f64 = 108.883;

const LAB_EPSILON: f64 = 0.008856;
const LAB_KAPPA: f64 = 7.787;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

/// Cylindrical form shared by LCH and OKLCH. Hue is in degrees, `[0, 360)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lch {
    pub l: f64,
    pub c: f64,
    pub h: f64,
}

/// A sampled pixel and where it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorSample {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
    pub x: u32,
    pub y: u32,
}

impl ColorSample {
    pub fn from_pixel(px: Rgba<u8>, x: u32, y: u32) -> Self {
        Self { r: px[0], g: px[1], b: px[2], a: px[3], x, y }
    }

    pub fn rgba(&self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }

    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[inline]
fn srgb_to_linear(c: f64) -> f64 {
    if c > 0.04045 { ((c + 0.055) / 1.055).powf(2.4) } else { c / 12.92 }
}

#[inline]
fn hue_degrees(b: f64, a: f64) -> f64 {
    let h = b.atan2(a).to_degrees();
    if h >= 0.0 { h } else { h + 360.0 }
}

pub fn rgb_to_xyz(px: Rgba<u8>) -> Xyz {
    let r = srgb_to_linear(px[0] as f64 / 255.0);
    let g = srgb_to_linear(px[1] as f64 / 255.0);
    let b = srgb_to_linear(px[2] as f64 / 255.0);

    Xyz {
        x: (r * 0.4124 + g * 0.3576 + b * 0.1805) * 100.0,
        y: (r * 0.2126 + g * 0.7152 + b * 0.0722) * 100.0,
        z: (r * 0.0193 + g * 0.1192 + b * 0.9505) * 100.0,
    }
}

pub fn xyz_to_lab(xyz: Xyz) -> Lab {
    let f = |t: f64| {
        if t > LAB_EPSILON { t.cbrt() } else { LAB_KAPPA * t + 16.0 / 116.0 }
    };
    let fx = f(xyz.x / WHITE_X);
    let fy = f(xyz.y / WHITE_Y);
    let fz = f(xyz.z / WHITE_Z);

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

pub fn rgb_to_lab(px: Rgba<u8>) -> Lab {
    xyz_to_lab(rgb_to_xyz(px))
}

pub fn lab_to_lch(lab: Lab) -> Lch {
    Lch {
        l: lab.l,
        c: (lab.a * lab.a + lab.b * lab.b).sqrt(),
        h: hue_degrees(lab.b, lab.a),
    }
}

/// OKLCH via OKLab. Linearization uses a plain 2.2 gamma.
pub fn rgb_to_oklch(px: Rgba<u8>) -> Lch {
    let r = (px[0] as f64 / 255.0).powf(2.2);
    let g = (px[1] as f64 / 255.0).powf(2.2);
    let b = (px[2] as f64 / 255.0).powf(2.2);

    let l = (0.4122214708 * r + 0.5363325363 * g + 0.0514459929 * b).cbrt();
    let m = (0.2119034982 * r + 0.6806995451 * g + 0.1073969566 * b).cbrt();
    let s = (0.0883024619 * r + 0.2817188376 * g + 0.6299787005 * b).cbrt();

    let ok_l = 0.2104542553 * l + 0.7936177850 * m - 0.0040720468 * s;
    let ok_a = 1.9779984951 * l - 2.4285922050 * m + 0.4505937099 * s;
    let ok_b = 0.0259040371 * l + 0.7827717662 * m - 0.8086757660 * s;

    Lch {
        l: ok_l * 100.0,
        c: (ok_a * ok_a + ok_b * ok_b).sqrt(),
        h: hue_degrees(ok_b, ok_a),
    }
}

/// WCAG 2.1 relative luminance.
pub fn relative_luminance(px: Rgba<u8>) -> f64 {
    let lin = |v: u8| {
        let c = v as f64 / 255.0;
        if c <= 0.03928 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
    };
    0.2126 * lin(px[0]) + 0.7152 * lin(px[1]) + 0.0722 * lin(px[2])
}

/// WCAG contrast ratio, always ≥ 1 (order of arguments does not matter).
pub fn contrast_ratio(a: Rgba<u8>, b: Rgba<u8>) -> f64 {
    let la = relative_luminance(a);
    let lb = relative_luminance(b);
    let (hi, lo) = if la >= lb { (la, lb) } else { (lb, la) };
    (hi + 0.05) / (lo + 0.05)
}

/// Parse `#rrggbb` / `rrggbb` (or the 3-digit short form) into an opaque pixel.
pub fn parse_hex_color(s: &str) -> Result<Rgba<u8>> {
    let hex = s.trim().trim_start_matches('#');
    if !hex.is_ascii() {
        return Err(EngineError::Range(format!("'{}' is not a #rrggbb color", s)));
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return Err(EngineError::Range(format!("'{}' is not a #rrggbb color", s))),
    };
    let channel = |i: usize| {
        u8::from_str_radix(&expanded[i..i + 2], 16)
            .map_err(|_| EngineError::Range(format!("'{}' is not a #rrggbb color", s)))
    };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, 255]))
}

// ============================================================================
// READOUT — everything the eyedropper panel shows for one sample
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorReadout {
    pub sample: ColorSample,
    pub xyz: Xyz,
    pub lab: Lab,
    pub lch: Lch,
    pub oklch: Lch,
    pub contrast_white: f64,
    pub contrast_black: f64,
}

impl ColorReadout {
    pub fn from_sample(sample: ColorSample) -> Self {
        let px = sample.rgba();
        let xyz = rgb_to_xyz(px);
        let lab = xyz_to_lab(xyz);
        Self {
            sample,
            xyz,
            lab,
            lch: lab_to_lch(lab),
            oklch: rgb_to_oklch(px),
            contrast_white: contrast_ratio(px, Rgba([255, 255, 255, 255])),
            contrast_black: contrast_ratio(px, Rgba([0, 0, 0, 255])),
        }
    }
}

impl std::fmt::Display for ColorReadout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = &self.sample;
        writeln!(
            f,
            "pixel ({}, {})  rgba({}, {}, {}, {})  {}",
            s.x,
            s.y,
            s.r,
            s.g,
            s.b,
            s.a,
            s.hex()
        )?;
        writeln!(f, "XYZ    {:.2} {:.2} {:.2}", self.xyz.x, self.xyz.y, self.xyz.z)?;
        writeln!(f, "Lab    {:.2} {:.2} {:.2}", self.lab.l, self.lab.a, self.lab.b)?;
        writeln!(f, "LCH    {:.2} {:.2} {:.1}°", self.lch.l, self.lch.c, self.lch.h)?;
        writeln!(f, "OKLCH  {:.2}% {:.4} {:.1}°", self.oklch.l, self.oklch.c, self.oklch.h)?;
        write!(
            f,
            "contrast vs white {:.2}:1, vs black {:.2}:1",
            self.contrast_white, self.contrast_black
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn white_maps_to_d65_white_point() {
        let xyz = rgb_to_xyz(WHITE);
        assert!(close(xyz.x, 95.047, 0.05), "x = {}", xyz.x);
        assert!(close(xyz.y, 100.0, 0.05), "y = {}", xyz.y);
        assert!(close(xyz.z, 108.883, 0.05), "z = {}", xyz.z);
    }

    #[test]
    fn white_and_black_lab() {
        let white = rgb_to_lab(WHITE);
        assert!(close(white.l, 100.0, 0.05), "L = {}", white.l);
        assert!(close(white.a, 0.0, 0.1) && close(white.b, 0.0, 0.1));
        let black = rgb_to_lab(BLACK);
        assert!(close(black.l, 0.0, 1e-9), "L = {}", black.l);
    }

    #[test]
    fn lch_hue_is_never_negative() {
        let lch = lab_to_lch(Lab { l: 50.0, a: 10.0, b: -10.0 });
        assert!(close(lch.h, 315.0, 1e-9), "h = {}", lch.h);
        assert!(close(lch.c, 200f64.sqrt(), 1e-9));
    }

    #[test]
    fn oklch_extremes() {
        let white = rgb_to_oklch(WHITE);
        assert!(close(white.l, 100.0, 0.1), "L = {}", white.l);
        assert!(white.c < 1e-3, "white should be achromatic, c = {}", white.c);
        let black = rgb_to_oklch(BLACK);
        assert!(close(black.l, 0.0, 1e-9));
        let red = rgb_to_oklch(Rgba([255, 0, 0, 255]));
        assert!(red.h > 20.0 && red.h < 40.0, "red hue = {}", red.h);
    }

    #[test]
    fn contrast_ratio_bounds() {
        assert!(close(contrast_ratio(WHITE, BLACK), 21.0, 0.01));
        assert!(close(contrast_ratio(BLACK, WHITE), 21.0, 0.01));
        for c in [Rgba([12, 200, 99, 255]), WHITE, BLACK, Rgba([128, 128, 128, 0])] {
            assert!(close(contrast_ratio(c, c), 1.0, 1e-12), "{:?}", c);
        }
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#ff8000").unwrap(), Rgba([255, 128, 0, 255]));
        assert_eq!(parse_hex_color("0a0B0c").unwrap(), Rgba([10, 11, 12, 255]));
        assert_eq!(parse_hex_color("#fff").unwrap(), WHITE);
        assert!(matches!(parse_hex_color("#12345"), Err(EngineError::Range(_))));
        assert!(matches!(parse_hex_color("#gg0000"), Err(EngineError::Range(_))));
    }

    #[test]
    fn readout_bundles_contrast() {
        let readout = ColorReadout::from_sample(ColorSample::from_pixel(WHITE, 3, 4));
        assert!(close(readout.contrast_black, 21.0, 0.01));
        assert!(close(readout.contrast_white, 1.0, 1e-12));
        assert_eq!(readout.sample.hex(), "#ffffff");
        assert!(readout.to_string().contains("pixel (3, 4)"));
    }
}
