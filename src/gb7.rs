// ============================================================================
// GB7 FORMAT — 7-bit grayscale + 1-bit mask, 12-byte big-endian header
// ============================================================================
//
// Layout:
//   0..4   magic  47 42 37 1D  ("GB7" + 0x1D)
//   4      version (writer emits 1)
//   5      flags   (bit 0 = has mask)
//   6..8   width   u16 BE
//   8..10  height  u16 BE
//   10..12 reserved
//   12..   width * height packed bytes: bit 7 = mask, bits 0-6 = gray
// ============================================================================

use image::{Rgba, RgbaImage};

use crate::error::{EngineError, Result};
use crate::ops::adjustments::{Histogram, Lut};

pub const GB7_MAGIC: [u8; 4] = [0x47, 0x42, 0x37, 0x1D];
pub const GB7_HEADER_LEN: usize = 12;
pub const GB7_VERSION: u8 = 1;
/// Largest pixel count a GB7 file may declare (4096 × 4096).
pub const GB7_MAX_PIXELS: usize = 4096 * 4096;

const FLAG_HAS_MASK: u8 = 0x01;
const MASK_BIT: u8 = 0x80;
const GRAY_BITS: u8 = 0x7F;

/// A decoded GB7 file. `pixel_data` holds one packed byte per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gb7Image {
    pub width: u16,
    pub height: u16,
    pub version: u8,
    pub has_mask: bool,
    pub pixel_data: Vec<u8>,
}

/// Which RGBA expansion to produce from a GB7 image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gb7Variant {
    /// Alpha follows the mask bit; transparent pixels get RGB = 0.
    WithMask,
    /// Alpha is always 255.
    WithoutMask,
}

impl Gb7Image {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// The variant an import should display: masked only when the file says so.
    pub fn import_variant(&self) -> Gb7Variant {
        if self.has_mask { Gb7Variant::WithMask } else { Gb7Variant::WithoutMask }
    }

    /// Gradation correction on the packed data: the 7-bit gray is expanded,
    /// mapped and re-packed; the mask bit is kept.
    pub fn apply_lut(&self, lut: &Lut) -> Gb7Image {
        let pixel_data = self
            .pixel_data
            .iter()
            .map(|&byte| {
                let gray = (byte & GRAY_BITS) << 1;
                let corrected = lut.map(gray) >> 1;
                (byte & MASK_BIT) | (corrected & GRAY_BITS)
            })
            .collect();
        Gb7Image { pixel_data, ..self.clone() }
    }

    /// Histogram of the packed data: every pixel counts its expanded gray,
    /// masked ones included. Alpha follows the mask bit.
    pub fn histogram(&self) -> Histogram {
        let mut hist = Histogram::default();
        for &byte in &self.pixel_data {
            let gray = ((byte & GRAY_BITS) << 1) as usize;
            hist.red[gray] += 1;
            hist.green[gray] += 1;
            hist.blue[gray] += 1;
            let opaque = !self.has_mask || byte & MASK_BIT != 0;
            hist.alpha[if opaque { 255 } else { 0 }] += 1;
        }
        hist
    }
}

fn check_pixel_count(width: usize, height: usize) -> Result<usize> {
    let count = width * height;
    if count > GB7_MAX_PIXELS {
        return Err(EngineError::Size(format!(
            "Image too large ({}x{}). Max supported: 4096x4096",
            width, height
        )));
    }
    Ok(count)
}

/// Parse a GB7 byte buffer.
pub fn decode(bytes: &[u8]) -> Result<Gb7Image> {
    if bytes.len() < GB7_HEADER_LEN {
        return Err(EngineError::Format(format!(
            "GB7 header needs {} bytes, got {}",
            GB7_HEADER_LEN,
            bytes.len()
        )));
    }
    if bytes[0..4] != GB7_MAGIC {
        return Err(EngineError::Format("Invalid GB7 file signature".to_string()));
    }

    let version = bytes[4];
    let flags = bytes[5];
    let width = u16::from_be_bytes([bytes[6], bytes[7]]);
    let height = u16::from_be_bytes([bytes[8], bytes[9]]);
    let has_mask = flags & FLAG_HAS_MASK == FLAG_HAS_MASK;

    let count = check_pixel_count(width as usize, height as usize)?;
    let payload = &bytes[GB7_HEADER_LEN..];
    if payload.len() < count {
        return Err(EngineError::Format(format!(
            "GB7 pixel data truncated: expected {} bytes, got {}",
            count,
            payload.len()
        )));
    }

    Ok(Gb7Image {
        width,
        height,
        version,
        has_mask,
        pixel_data: payload[..count].to_vec(),
    })
}

/// Serialize packed pixel data into a GB7 file (version 1, reserved = 0).
pub fn encode(pixel_data: &[u8], width: u16, height: u16, has_mask: bool) -> Result<Vec<u8>> {
    let count = check_pixel_count(width as usize, height as usize)?;
    if pixel_data.len() != count {
        return Err(EngineError::Range(format!(
            "GB7 pixel data must be {} bytes for {}x{}, got {}",
            count,
            width,
            height,
            pixel_data.len()
        )));
    }

    let mut out = Vec::with_capacity(GB7_HEADER_LEN + count);
    out.extend_from_slice(&GB7_MAGIC);
    out.push(GB7_VERSION);
    out.push(if has_mask { FLAG_HAS_MASK } else { 0 });
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(pixel_data);
    Ok(out)
}

/// Expand packed bytes into RGBA. Gray is `(byte & 0x7F) << 1`, so the
/// brightest representable value is 254.
pub fn to_rgba(gb7: &Gb7Image, variant: Gb7Variant) -> RgbaImage {
    let w = gb7.width as u32;
    let h = gb7.height as u32;
    let mut raw = Vec::with_capacity(gb7.pixel_count() * 4);
    for &byte in &gb7.pixel_data {
        let gray = (byte & GRAY_BITS) << 1;
        match variant {
            Gb7Variant::WithoutMask => raw.extend_from_slice(&[gray, gray, gray, 255]),
            Gb7Variant::WithMask => {
                if byte & MASK_BIT != 0 {
                    raw.extend_from_slice(&[gray, gray, gray, 255]);
                } else {
                    raw.extend_from_slice(&[0, 0, 0, 0]);
                }
            }
        }
    }
    RgbaImage::from_raw(w, h, raw)
        .unwrap_or_else(|| RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0])))
}

/// Quantize an RGBA buffer to packed GB7 bytes (export path, lossy and not
/// the inverse of [`to_rgba`]): gray is the rounded channel mean, the mask
/// bit is set when alpha ≥ 128.
pub fn from_rgba(img: &RgbaImage) -> Vec<u8> {
    img.pixels()
        .map(|p| {
            let sum = p[0] as u32 + p[1] as u32 + p[2] as u32;
            let gray = (sum as f64 / 3.0).round() as u8;
            let mask = if p[3] < 128 { 0 } else { MASK_BIT };
            mask | (gray >> 1)
        })
        .collect()
}

/// Encode an RGBA raster straight to a masked GB7 file.
pub fn encode_rgba(img: &RgbaImage) -> Result<Vec<u8>> {
    let (w, h) = img.dimensions();
    if w > u16::MAX as u32 || h > u16::MAX as u32 {
        return Err(EngineError::Size(format!("{}x{} does not fit a GB7 header", w, h)));
    }
    encode(&from_rgba(img), w as u16, h as u16, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_masked_pixels_by_gray() {
        let img = decode(&sample_file()).unwrap();
        let hist = img.histogram();
        // 0xFF and 0x7F both expand to 254, 0x00 and 0x80 to 0
        assert_eq!(hist.red[254], 2);
        assert_eq!(hist.red[0], 2);
        assert_eq!(hist.blue[254], 2);
        assert_eq!(hist.alpha[255], 2);
        assert_eq!(hist.alpha[0], 2);
    }

    fn sample_file() -> Vec<u8> {
        vec![
            0x47, 0x42, 0x37, 0x1D, 0x01, 0x01, 0x00, 0x02, 0x00, 0x02, 0x00, 0x00, //
            0xFF, 0x00, 0x80, 0x7F,
        ]
    }

    #[test]
    fn decodes_two_by_two_masked_file() {
        let img = decode(&sample_file()).unwrap();
        assert_eq!((img.width, img.height), (2, 2));
        assert!(img.has_mask);
        assert_eq!(img.version, 1);
        assert_eq!(img.pixel_data, vec![0xFF, 0x00, 0x80, 0x7F]);

        let rgba = to_rgba(&img, Gb7Variant::WithMask);
        assert_eq!(rgba.get_pixel(0, 0).0, [254, 254, 254, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [0, 0, 0, 0]);
        // 0x80: mask set, gray 0
        assert_eq!(rgba.get_pixel(0, 1).0, [0, 0, 0, 255]);
        // 0x7F: full gray but masked out, so color is zeroed too
        assert_eq!(rgba.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn without_mask_variant_is_opaque() {
        let img = decode(&sample_file()).unwrap();
        let rgba = to_rgba(&img, Gb7Variant::WithoutMask);
        assert_eq!(rgba.get_pixel(1, 1).0, [254, 254, 254, 255]);
        assert!(rgba.pixels().all(|p| p[3] == 255), "every pixel must be opaque");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_file();
        bytes[3] = 0x00;
        assert!(matches!(decode(&bytes), Err(EngineError::Format(_))));
    }

    #[test]
    fn rejects_truncated_payload_and_header() {
        let bytes = sample_file();
        assert!(matches!(decode(&bytes[..14]), Err(EngineError::Format(_))));
        assert!(matches!(decode(&bytes[..8]), Err(EngineError::Format(_))));
    }

    #[test]
    fn rejects_oversized_dimensions() {
        let mut bytes = sample_file();
        // 4097 x 4096
        bytes[6..8].copy_from_slice(&4097u16.to_be_bytes());
        bytes[8..10].copy_from_slice(&4096u16.to_be_bytes());
        assert!(matches!(decode(&bytes), Err(EngineError::Size(_))));
    }

    #[test]
    fn round_trips_through_encode() {
        let data: Vec<u8> = (0..12u8).map(|v| v.wrapping_mul(37)).collect();
        for has_mask in [false, true] {
            let bytes = encode(&data, 4, 3, has_mask).unwrap();
            assert_eq!(bytes.len(), GB7_HEADER_LEN + 12);
            let img = decode(&bytes).unwrap();
            assert_eq!((img.width, img.height, img.has_mask), (4, 3, has_mask));
            assert_eq!(img.pixel_data, data);
        }
    }

    #[test]
    fn encode_header_is_big_endian() {
        let bytes = encode(&vec![0u8; 258], 258, 1, false).unwrap();
        assert_eq!(&bytes[..12], &[0x47, 0x42, 0x37, 0x1D, 1, 0, 0x01, 0x02, 0x00, 0x01, 0, 0]);
    }

    #[test]
    fn encode_rejects_length_mismatch() {
        assert!(matches!(encode(&[0, 1, 2], 2, 2, true), Err(EngineError::Range(_))));
    }

    #[test]
    fn export_quantization_averages_and_thresholds_alpha() {
        let img = RgbaImage::from_raw(3, 1, vec![
            255, 255, 255, 255, //
            10, 20, 31, 127, //
            0, 0, 0, 128,
        ])
        .unwrap();
        let packed = from_rgba(&img);
        assert_eq!(packed[0], 0x80 | 127);
        // mean 20.33 -> 20 -> 10, alpha below threshold
        assert_eq!(packed[1], 10);
        assert_eq!(packed[2], 0x80);
    }

    #[test]
    fn lut_on_packed_data_keeps_mask() {
        let img = decode(&sample_file()).unwrap();
        let inverted = Lut::build(0, 255, 255, 0).unwrap();
        let out = img.apply_lut(&inverted);
        // 0xFF: gray 254 -> 1 -> 0, mask kept
        assert_eq!(out.pixel_data[0], 0x80);
        // 0x00: gray 0 -> 255 -> 127, no mask
        assert_eq!(out.pixel_data[1], 0x7F);
    }
}
