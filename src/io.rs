use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canvas::{AlphaState, BlendMode, CanvasState, Layer, LayerId};
use crate::error::{EngineError, Result};
use crate::gb7::{self, Gb7Image};

// ============================================================================
// GBP PROJECT FILE FORMAT
// ============================================================================

const GBP_MAGIC: &str = "GBP1";

/// Maximum layer dimension accepted from a project file (per axis).
/// Prevents memory exhaustion from crafted project files.
const MAX_LAYER_DIM: u32 = 32_768;
/// Maximum number of layers in a project file.
const MAX_PROJECT_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
struct ProjectFileV1 {
    magic: String,
    max_layers: usize,
    zoom_percent: u32,
    active_layer: Option<u128>,
    layers: Vec<LayerDataV1>,
}

#[derive(Serialize, Deserialize)]
struct LayerDataV1 {
    id: u128,
    name: String,
    x: i32,
    y: i32,
    opacity: f32,
    blend_mode: u8,
    visible: bool,
    alpha: u8,
    show_alpha_channel: bool,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    /// Buffer retained while alpha is hidden.
    original: Option<Vec<u8>>,
    gb7_source: Option<Gb7Data>,
}

#[derive(Serialize, Deserialize)]
struct Gb7Data {
    width: u16,
    height: u16,
    has_mask: bool,
    pixel_data: Vec<u8>,
}

fn build_project_v1(state: &CanvasState) -> ProjectFileV1 {
    let layers = state
        .layers
        .iter()
        .map(|layer| LayerDataV1 {
            id: layer.id.as_u128(),
            name: layer.name.clone(),
            x: layer.x,
            y: layer.y,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode.to_u8(),
            visible: layer.visible,
            alpha: layer.alpha.to_u8(),
            show_alpha_channel: layer.show_alpha_channel,
            width: layer.width(),
            height: layer.height(),
            pixels: layer.pixels.as_raw().clone(),
            original: layer.original.as_ref().map(|o| o.as_raw().clone()),
            gb7_source: layer.gb7_source.as_ref().map(|g| Gb7Data {
                width: g.width,
                height: g.height,
                has_mask: g.has_mask,
                pixel_data: g.pixel_data.clone(),
            }),
        })
        .collect();

    ProjectFileV1 {
        magic: GBP_MAGIC.to_string(),
        max_layers: state.max_layers,
        zoom_percent: state.zoom_percent,
        active_layer: state.active_layer.map(|id| id.as_u128()),
        layers,
    }
}

/// Save the layer stack as a `.gbp` project file.
pub fn save_project(state: &CanvasState, path: &Path) -> Result<()> {
    let project = build_project_v1(state);
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &project)?;
    writer.flush()?;
    Ok(())
}

/// Load a `.gbp` project file.
pub fn load_project(path: &Path) -> Result<CanvasState> {
    let raw = std::fs::read(path)?;
    project_from_bytes(&raw)
}

pub fn project_from_bytes(raw: &[u8]) -> Result<CanvasState> {
    if raw.len() < 12 {
        return Err(EngineError::Format("File too small".into()));
    }
    // bincode writes a String as an 8-byte length prefix followed by the
    // UTF-8 bytes, so the 4-char magic sits at 8..12.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != GBP_MAGIC {
        return Err(EngineError::Format(format!("Unknown magic '{}'", magic)));
    }

    let project: ProjectFileV1 = bincode::deserialize(raw)?;
    if project.layers.len() > MAX_PROJECT_LAYERS {
        return Err(EngineError::Format(format!("Too many layers ({})", project.layers.len())));
    }

    let mut state = CanvasState::new(project.max_layers.max(project.layers.len()));
    state.set_zoom_percent(project.zoom_percent);
    for data in project.layers {
        state.layers.push(layer_from_data(data)?);
    }
    state.active_layer = project
        .active_layer
        .map(LayerId::from_u128)
        .filter(|id| state.index_of(*id).is_some())
        .or_else(|| state.layers.first().map(|l| l.id));
    Ok(state)
}

fn raw_to_image(width: u32, height: u32, raw: Vec<u8>, what: &str) -> Result<RgbaImage> {
    RgbaImage::from_raw(width, height, raw)
        .ok_or_else(|| EngineError::Format(format!("{} does not match {}x{}", what, width, height)))
}

fn layer_from_data(data: LayerDataV1) -> Result<Layer> {
    if data.width > MAX_LAYER_DIM || data.height > MAX_LAYER_DIM {
        return Err(EngineError::Format(format!(
            "Layer '{}' is too large ({}x{})",
            data.name, data.width, data.height
        )));
    }
    let alpha = AlphaState::from_u8(data.alpha)
        .ok_or_else(|| EngineError::Format(format!("Unknown alpha state {}", data.alpha)))?;
    let pixels = raw_to_image(data.width, data.height, data.pixels, "layer pixels")?;
    let original = match data.original {
        Some(raw) => Some(raw_to_image(data.width, data.height, raw, "retained layer buffer")?),
        None => None,
    };
    let gb7_source = data.gb7_source.map(|g| Gb7Image {
        width: g.width,
        height: g.height,
        version: gb7::GB7_VERSION,
        has_mask: g.has_mask,
        pixel_data: g.pixel_data,
    });
    if let Some(g) = &gb7_source
        && (g.pixel_count() != g.pixel_data.len()
            || (g.width as u32, g.height as u32) != (data.width, data.height))
    {
        return Err(EngineError::Format(format!(
            "GB7 source of layer '{}' is inconsistent",
            data.name
        )));
    }

    let mut layer = Layer::new(data.name, pixels);
    layer.id = LayerId::from_u128(data.id);
    layer.x = data.x;
    layer.y = data.y;
    layer.opacity = data.opacity.clamp(0.0, 1.0);
    layer.blend_mode = BlendMode::from_u8(data.blend_mode);
    layer.visible = data.visible;
    layer.alpha = alpha;
    layer.show_alpha_channel = data.show_alpha_channel;
    layer.original = if alpha == AlphaState::AlphaHidden { original } else { None };
    layer.gb7_source = gb7_source;
    Ok(layer)
}

// ============================================================================
// SYNCHRONOUS LOADER
// ============================================================================

/// What a file on disk turned out to be.
pub enum LoadedFile {
    Image(RgbaImage),
    Gb7(Gb7Image),
    Project(CanvasState),
}

fn extension_of(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase()
}

/// Layer name for an imported file.
pub fn layer_name_for(path: &Path) -> String {
    path.file_name().and_then(|s| s.to_str()).unwrap_or("Layer").to_string()
}

/// Synchronously load a supported file.
///
/// - `.gb7` — GB7 grayscale + mask image
/// - `.gbp` — layered project
/// - `.png`, `.jpg`, `.jpeg` — decoded to RGBA through the `image` crate
pub fn load_image_sync(path: &Path) -> Result<LoadedFile> {
    match extension_of(path).as_str() {
        "gb7" => {
            let bytes = std::fs::read(path)?;
            Ok(LoadedFile::Gb7(gb7::decode(&bytes)?))
        }
        "gbp" => Ok(LoadedFile::Project(load_project(path)?)),
        "png" | "jpg" | "jpeg" => Ok(LoadedFile::Image(image::open(path)?.to_rgba8())),
        other => Err(EngineError::UnsupportedFormat(if other.is_empty() {
            path.display().to_string()
        } else {
            format!(".{}", other)
        })),
    }
}

// ============================================================================
// EXPORT
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg,
    Gb7,
    Project,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim_start_matches('.').to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            "gb7" => Some(ExportFormat::Gb7),
            "gbp" | "project" => Some(ExportFormat::Project),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_name(&extension_of(path))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Gb7 => "gb7",
            ExportFormat::Project => "gbp",
        }
    }
}

/// Encode a flattened image to bytes. Project files are written with
/// [`save_project`] instead.
pub fn encode_image(image: &RgbaImage, format: ExportFormat, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        ExportFormat::Png => {
            PngEncoder::new(&mut out).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        ExportFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
        ExportFormat::Gb7 => out = gb7::encode_rgba(image)?,
        ExportFormat::Project => {
            return Err(EngineError::UnsupportedFormat(
                "project files hold layers, not a flattened image".into(),
            ));
        }
    }
    Ok(out)
}

/// Encode and write an image to a file.
pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: ExportFormat,
    quality: u8,
) -> Result<()> {
    let bytes = encode_image(image, format, quality)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("gb7edit-io-{}-{}", std::process::id(), name))
    }

    #[test]
    fn project_round_trip_keeps_layer_state() {
        let mut state = CanvasState::new(3);
        let mut top = Layer::filled("top", 3, 2, Rgba([10, 20, 30, 128]));
        top.x = -4;
        top.y = 7;
        top.opacity = 0.5;
        top.blend_mode = BlendMode::Screen;
        top.alpha = AlphaState::AlphaHidden;
        top.original = Some(top.pixels.clone());
        top.pixels = crate::canvas::force_opaque(&top.pixels);
        let gb7_layer = Layer::from_gb7(
            "g",
            gb7::decode(&gb7::encode(&[0x80, 0x01], 2, 1, true).unwrap()).unwrap(),
        );
        let top_id = state.push_layer(top).unwrap();
        state.push_layer(gb7_layer).unwrap();
        state.active_layer = Some(top_id);
        state.set_zoom_percent(150);

        let path = temp_path("round.gbp");
        save_project(&state, &path).unwrap();
        let loaded = load_project(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.layers.len(), 2);
        assert_eq!(loaded.max_layers, 3);
        assert_eq!(loaded.zoom_percent, 150);
        assert_eq!(loaded.active_layer, Some(top_id));
        let t = &loaded.layers[0];
        assert_eq!(
            (t.x, t.y, t.blend_mode, t.alpha),
            (-4, 7, BlendMode::Screen, AlphaState::AlphaHidden)
        );
        assert_eq!(t.pixels.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(t.original.as_ref().unwrap().get_pixel(2, 1).0, [10, 20, 30, 128]);
        let g = &loaded.layers[1];
        assert_eq!(g.gb7_source.as_ref().unwrap().pixel_data, vec![0x80, 0x01]);
        assert_eq!(g.pixels.get_pixel(1, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn bad_magic_is_a_format_error() {
        let mut raw = vec![4, 0, 0, 0, 0, 0, 0, 0];
        raw.extend_from_slice(b"PFE1");
        raw.extend_from_slice(&[0; 16]);
        assert!(matches!(project_from_bytes(&raw), Err(EngineError::Format(_))));
        assert!(matches!(project_from_bytes(&[1, 2, 3]), Err(EngineError::Format(_))));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_image_sync(Path::new("picture.bmp")).err().unwrap();
        assert!(matches!(err, EngineError::UnsupportedFormat(ref e) if e == ".bmp"), "{}", err);
    }

    #[test]
    fn png_and_gb7_files_load() {
        let img = RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8 * 60, y as u8 * 80, 0, 255]));
        let png = temp_path("load.png");
        encode_and_write(&img, &png, ExportFormat::Png, 90).unwrap();
        match load_image_sync(&png).unwrap() {
            LoadedFile::Image(back) => assert_eq!(back, img),
            _ => panic!("png should load as an image"),
        }
        let _ = std::fs::remove_file(&png);

        let g = temp_path("load.gb7");
        encode_and_write(&img, &g, ExportFormat::Gb7, 90).unwrap();
        match load_image_sync(&g).unwrap() {
            LoadedFile::Gb7(decoded) => {
                assert_eq!((decoded.width, decoded.height), (4, 3));
                assert!(decoded.has_mask);
            }
            _ => panic!("gb7 should load as GB7"),
        }
        let _ = std::fs::remove_file(&g);
    }

    #[test]
    fn jpeg_export_drops_alpha() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([200, 0, 0, 10]));
        let bytes = encode_image(&img, ExportFormat::Jpeg, 95).unwrap();
        let back = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (8, 8));
        assert_eq!(back.get_pixel(4, 4).0[3], 255);
        assert!(back.get_pixel(4, 4).0[0] > 180);
    }

    #[test]
    fn export_format_names() {
        assert_eq!(ExportFormat::from_path(Path::new("a/b.JPEG")), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::from_name(".gbp"), Some(ExportFormat::Project));
        assert_eq!(ExportFormat::from_name("tiff"), None);
        assert!(encode_image(&RgbaImage::new(1, 1), ExportFormat::Project, 90).is_err());
    }
}
