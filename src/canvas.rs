// ============================================================================
// CANVAS — layer model, blend math and the compositor
// ============================================================================
//
// Layers live in an ordered Vec where index 0 is the TOP of the stack. The
// compositor walks the Vec in reverse so the bottom layer is painted first.
// Layers are addressed by a stable `LayerId`; every pixel swap bumps the
// layer's `generation` so late async results can be recognised as stale.
// ============================================================================

use std::borrow::Cow;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::gb7::{self, Gb7Image, Gb7Variant};
use crate::ops::transform::{Interpolation, resize_rgba};

/// Default layer cap.
pub const DEFAULT_MAX_LAYERS: usize = 2;
/// Size of a color layer created on an empty stack.
pub const DEFAULT_LAYER_SIZE: (u32, u32) = (800, 600);
/// Zoom limits in percent.
pub const MIN_ZOOM_PERCENT: u32 = 12;
pub const MAX_ZOOM_PERCENT: u32 = 300;
/// Largest export frame `flatten` will allocate (pixels).
pub const MAX_FLATTEN_PIXELS: u64 = 16384 * 16384;

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[BlendMode::Normal, BlendMode::Multiply, BlendMode::Screen, BlendMode::Overlay]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let key = name.to_lowercase();
        Self::all().iter().copied().find(|m| m.name() == key)
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            _ => BlendMode::Normal,
        }
    }

    /// Per-channel blend on normalized values.
    #[inline]
    fn channel(&self, b: f64, t: f64) -> f64 {
        match self {
            BlendMode::Normal => t,
            BlendMode::Multiply => b * t,
            BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - t),
            BlendMode::Overlay => {
                if b < 0.5 {
                    2.0 * b * t
                } else {
                    1.0 - 2.0 * (1.0 - b) * (1.0 - t)
                }
            }
        }
    }
}

/// Blend `top` over `base`.
///
/// Alpha follows `out_a = ta + ba·(1 − ta)` with `ta = top.a/255 · opacity`,
/// but the color is the blend result itself rather than a source-over mix
/// weighted by alpha. A half-transparent Normal top therefore replaces the
/// base color while only the alpha accumulates.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 {
        return base;
    }
    let top_a = top[3] as f64 / 255.0 * (opacity as f64).clamp(0.0, 1.0);
    if top_a <= 0.0 {
        return base;
    }
    let base_a = base[3] as f64 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = mode.channel(base[c] as f64 / 255.0, top[c] as f64 / 255.0);
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

// ============================================================================
// LAYER
// ============================================================================

/// Stable layer identifier (uuid v4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        LayerId(Uuid::new_v4())
    }

    pub fn from_u128(v: u128) -> Self {
        LayerId(Uuid::from_u128(v))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // short form is enough to tell two layers apart in status lines
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Alpha-channel state of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AlphaState {
    #[default]
    HasAlpha,
    /// Opaque buffer shown; the original is retained for restoration.
    AlphaHidden,
    /// Alpha permanently discarded.
    AlphaStripped,
}

impl AlphaState {
    pub fn name(&self) -> &'static str {
        match self {
            AlphaState::HasAlpha => "has-alpha",
            AlphaState::AlphaHidden => "alpha-hidden",
            AlphaState::AlphaStripped => "alpha-stripped",
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            AlphaState::HasAlpha => 0,
            AlphaState::AlphaHidden => 1,
            AlphaState::AlphaStripped => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(AlphaState::HasAlpha),
            1 => Some(AlphaState::AlphaHidden),
            2 => Some(AlphaState::AlphaStripped),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub pixels: RgbaImage,
    pub x: i32,
    pub y: i32,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub alpha: AlphaState,
    /// Buffer with alpha, kept while `alpha == AlphaHidden`.
    pub original: Option<RgbaImage>,
    /// Packed source of a GB7 import; dropped on the first pixel edit.
    pub gb7_source: Option<Gb7Image>,
    /// Render the alpha channel as opaque grayscale instead of the color.
    pub show_alpha_channel: bool,
    /// Bumped on every pixel swap.
    pub generation: u64,
}

impl Layer {
    pub fn new(name: impl Into<String>, pixels: RgbaImage) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            pixels,
            x: 0,
            y: 0,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            alpha: AlphaState::HasAlpha,
            original: None,
            gb7_source: None,
            show_alpha_channel: false,
            generation: 0,
        }
    }

    pub fn filled(name: impl Into<String>, width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self::new(name, RgbaImage::from_pixel(width, height, color))
    }

    /// A layer showing a GB7 image in the variant its header asks for.
    pub fn from_gb7(name: impl Into<String>, image: Gb7Image) -> Self {
        let pixels = gb7::to_rgba(&image, image.import_variant());
        let mut layer = Self::new(name, pixels);
        layer.gb7_source = Some(image);
        layer
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.width() == 0 || self.pixels.height() == 0
    }

    /// Replace the pixel buffer after an edit. The packed GB7 source no
    /// longer describes the pixels, so it is dropped.
    pub fn set_pixels(&mut self, pixels: RgbaImage) {
        self.pixels = pixels;
        self.gb7_source = None;
        self.generation += 1;
    }

    /// The opaque view used while alpha is hidden: the unmasked GB7 variant
    /// for untouched GB7 imports, otherwise the buffer with alpha forced to 255.
    pub fn opaque_view(&self) -> RgbaImage {
        if let Some(src) = &self.gb7_source {
            return gb7::to_rgba(src, Gb7Variant::WithoutMask);
        }
        force_opaque(&self.pixels)
    }

    /// Pixels as the compositor should see them.
    pub fn display_pixels(&self) -> Cow<'_, RgbaImage> {
        if self.show_alpha_channel {
            Cow::Owned(alpha_as_gray(&self.pixels))
        } else {
            Cow::Borrowed(&self.pixels)
        }
    }

    /// Offset rectangle `(x, y, w, h)` in composite space.
    pub fn rect(&self) -> (i64, i64, i64, i64) {
        (self.x as i64, self.y as i64, self.width() as i64, self.height() as i64)
    }
}

/// Copy of `src` with every alpha set to 255.
pub fn force_opaque(src: &RgbaImage) -> RgbaImage {
    let mut out = src.clone();
    out.pixels_mut().for_each(|p| p[3] = 255);
    out
}

/// Alpha rendered as opaque grayscale.
pub fn alpha_as_gray(src: &RgbaImage) -> RgbaImage {
    let mut out = src.clone();
    out.pixels_mut().for_each(|p| {
        let a = p[3];
        *p = Rgba([a, a, a, 255]);
    });
    out
}

// ============================================================================
// COMPOSITOR
// ============================================================================

/// Blend one (already scaled) layer image onto `dst` at `(ox, oy)`, clipped.
#[allow(clippy::too_many_arguments)]
fn blend_onto(
    dst: &mut [u8],
    dst_w: u32,
    dst_h: u32,
    src: &RgbaImage,
    ox: i64,
    oy: i64,
    mode: BlendMode,
    opacity: f32,
) {
    let (sw, sh) = (src.width() as i64, src.height() as i64);
    let x0 = ox.max(0);
    let x1 = (ox + sw).min(dst_w as i64);
    let y0 = oy.max(0);
    let y1 = (oy + sh).min(dst_h as i64);
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let stride = dst_w as usize * 4;
    let src_raw = src.as_raw();
    let src_stride = sw as usize * 4;

    dst.par_chunks_mut(stride)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let sy = (y as i64 - oy) as usize;
            for x in x0..x1 {
                let sx = (x - ox) as usize;
                let si = sy * src_stride + sx * 4;
                let di = x as usize * 4;
                let top = Rgba([src_raw[si], src_raw[si + 1], src_raw[si + 2], src_raw[si + 3]]);
                let base = Rgba([row[di], row[di + 1], row[di + 2], row[di + 3]]);
                let out = blend_pixel(base, top, mode, opacity);
                row[di..di + 4].copy_from_slice(&out.0);
            }
        });
}

/// Composite `layers` (index 0 = top) onto a transparent `canvas_w × canvas_h`
/// frame. Each visible, non-empty layer is scaled by `zoom` and placed at
/// `(round(x·zoom), round(y·zoom))`.
pub fn composite_layers(
    layers: &[Layer],
    canvas_w: u32,
    canvas_h: u32,
    zoom: f64,
    interpolation: Interpolation,
) -> RgbaImage {
    let mut raw = vec![0u8; canvas_w as usize * canvas_h as usize * 4];
    if raw.is_empty() {
        return RgbaImage::new(canvas_w, canvas_h);
    }

    for layer in layers.iter().rev() {
        if !layer.visible || layer.is_empty() {
            continue;
        }
        let shown = layer.display_pixels();
        let scaled: Cow<'_, RgbaImage> = if (zoom - 1.0).abs() < f64::EPSILON {
            shown
        } else {
            let sw = (layer.width() as f64 * zoom).round();
            let sh = (layer.height() as f64 * zoom).round();
            if sw < 1.0 || sh < 1.0 {
                continue;
            }
            Cow::Owned(resize_rgba(&shown, sw as u32, sh as u32, interpolation))
        };
        let ox = (layer.x as f64 * zoom).round() as i64;
        let oy = (layer.y as f64 * zoom).round() as i64;
        blend_onto(&mut raw, canvas_w, canvas_h, &scaled, ox, oy, layer.blend_mode, layer.opacity);
    }

    RgbaImage::from_raw(canvas_w, canvas_h, raw)
        .unwrap_or_else(|| RgbaImage::new(canvas_w, canvas_h))
}

/// Bounding box `(min_x, min_y, max_x, max_y)` of the visible layers,
/// always including the origin.
pub fn visible_bounds(layers: &[Layer]) -> (i64, i64, i64, i64) {
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0i64, 0i64, 0i64, 0i64);
    for layer in layers.iter().filter(|l| l.visible && !l.is_empty()) {
        let (x, y, w, h) = layer.rect();
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x + w);
        max_y = max_y.max(y + h);
    }
    (min_x, min_y, max_x, max_y)
}

/// Export composite at zoom 1 over the visible bounding box.
///
/// `Range` when nothing visible has area, `Size` when the box (offsets
/// included) exceeds [`MAX_FLATTEN_PIXELS`].
pub fn flatten(layers: &[Layer]) -> Result<RgbaImage> {
    let (min_x, min_y, max_x, max_y) = visible_bounds(layers);
    let (w, h) = (max_x - min_x, max_y - min_y);
    if w <= 0 || h <= 0 {
        return Err(EngineError::Range("nothing visible to export".into()));
    }
    let too_large = || {
        EngineError::Size(format!("export frame {}x{} exceeds {} pixels", w, h, MAX_FLATTEN_PIXELS))
    };
    let pixels = (w as u64).checked_mul(h as u64).ok_or_else(too_large)?;
    if pixels > MAX_FLATTEN_PIXELS {
        return Err(too_large());
    }
    let mut raw = vec![0u8; pixels as usize * 4];
    for layer in layers.iter().rev() {
        if !layer.visible || layer.is_empty() {
            continue;
        }
        let shown = layer.display_pixels();
        blend_onto(
            &mut raw,
            w as u32,
            h as u32,
            &shown,
            layer.x as i64 - min_x,
            layer.y as i64 - min_y,
            layer.blend_mode,
            layer.opacity,
        );
    }
    RgbaImage::from_raw(w as u32, h as u32, raw)
        .ok_or_else(|| EngineError::Size(format!("export frame {}x{} does not fit a buffer", w, h)))
}

// ============================================================================
// CANVAS STATE
// ============================================================================

pub struct CanvasState {
    /// Index 0 is the top of the stack.
    pub layers: Vec<Layer>,
    pub active_layer: Option<LayerId>,
    pub max_layers: usize,
    /// View zoom in percent, kept within `MIN_ZOOM_PERCENT..=MAX_ZOOM_PERCENT`.
    pub zoom_percent: u32,
    pub interpolation: Interpolation,
}

impl Default for CanvasState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LAYERS)
    }
}

impl CanvasState {
    pub fn new(max_layers: usize) -> Self {
        Self {
            layers: Vec::new(),
            active_layer: None,
            max_layers: max_layers.max(1),
            zoom_percent: 100,
            interpolation: Interpolation::default(),
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom_percent as f64 / 100.0
    }

    pub fn set_zoom_percent(&mut self, percent: u32) {
        self.zoom_percent = percent.clamp(MIN_ZOOM_PERCENT, MAX_ZOOM_PERCENT);
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer> {
        self.layers.iter().find(|l| l.id == id).ok_or(EngineError::LayerNotFound(id))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id).ok_or(EngineError::LayerNotFound(id))
    }

    pub fn active_id(&self) -> Result<LayerId> {
        self.active_layer
            .ok_or_else(|| EngineError::Range("no active layer".into()))
    }

    pub fn active(&self) -> Result<&Layer> {
        self.layer(self.active_id()?)
    }

    pub fn is_full(&self) -> bool {
        self.layers.len() >= self.max_layers
    }

    /// Append at the bottom of the stack and make it active.
    pub fn push_layer(&mut self, layer: Layer) -> Result<LayerId> {
        if self.is_full() {
            return Err(EngineError::LayerLimit { max: self.max_layers });
        }
        let id = layer.id;
        self.layers.push(layer);
        self.active_layer = Some(id);
        Ok(id)
    }

    /// Size of the view frame: the largest layer scaled by the zoom.
    pub fn view_size(&self) -> (u32, u32) {
        let max_w = self.layers.iter().map(|l| l.width()).max().unwrap_or(0);
        let max_h = self.layers.iter().map(|l| l.height()).max().unwrap_or(0);
        let zoom = self.zoom();
        ((max_w as f64 * zoom).round() as u32, (max_h as f64 * zoom).round() as u32)
    }

    /// The zoomed view composite.
    pub fn composite(&self) -> RgbaImage {
        let (w, h) = self.view_size();
        composite_layers(&self.layers, w, h, self.zoom(), self.interpolation)
    }

    pub fn flatten(&self) -> Result<RgbaImage> {
        flatten(&self.layers)
    }
}
