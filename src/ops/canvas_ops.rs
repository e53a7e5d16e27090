// ============================================================================
// CANVAS-LEVEL OPERATIONS — add / delete / reorder layers, layer properties,
// alpha-channel transitions and resize
// ============================================================================
//
// Every function validates first and mutates last, so an `Err` leaves the
// canvas exactly as it was.
// ============================================================================

use image::{Rgba, RgbaImage};

use crate::canvas::{AlphaState, BlendMode, CanvasState, DEFAULT_LAYER_SIZE, Layer, LayerId};
use crate::error::{EngineError, Result};
use crate::gb7::{self, Gb7Image, Gb7Variant};
use crate::ops::transform::{self, Interpolation, ResizeTarget};

// ---------------------------------------------------------------------------
//  Creating and removing layers
// ---------------------------------------------------------------------------

pub fn add_image_layer(
    state: &mut CanvasState,
    name: impl Into<String>,
    pixels: RgbaImage,
) -> Result<LayerId> {
    state.push_layer(Layer::new(name, pixels))
}

pub fn add_gb7_layer(
    state: &mut CanvasState,
    name: impl Into<String>,
    image: Gb7Image,
) -> Result<LayerId> {
    state.push_layer(Layer::from_gb7(name, image))
}

/// Solid color layer sized like the first layer, or 800×600 on an empty stack.
pub fn add_color_layer(state: &mut CanvasState, color: Rgba<u8>) -> Result<LayerId> {
    let (w, h) = state
        .layers
        .first()
        .filter(|l| !l.is_empty())
        .map(|l| (l.width(), l.height()))
        .unwrap_or(DEFAULT_LAYER_SIZE);
    let name = format!("Color Layer (#{:02x}{:02x}{:02x})", color[0], color[1], color[2]);
    state.push_layer(Layer::filled(name, w, h, color))
}

/// Remove a layer. If it was active, the new top layer becomes active.
pub fn delete_layer(state: &mut CanvasState, id: LayerId) -> Result<Layer> {
    let idx = state.index_of(id).ok_or(EngineError::LayerNotFound(id))?;
    let removed = state.layers.remove(idx);
    if state.active_layer == Some(id) {
        state.active_layer = state.layers.first().map(|l| l.id);
    }
    Ok(removed)
}

pub fn set_active_layer(state: &mut CanvasState, id: LayerId) -> Result<()> {
    state.layer(id)?;
    state.active_layer = Some(id);
    Ok(())
}

/// Move a layer one step toward the top. Returns `false` when it already is the top.
pub fn raise_layer(state: &mut CanvasState, id: LayerId) -> Result<bool> {
    let idx = state.index_of(id).ok_or(EngineError::LayerNotFound(id))?;
    if idx == 0 {
        return Ok(false);
    }
    state.layers.swap(idx, idx - 1);
    Ok(true)
}

/// Move a layer one step toward the bottom. Returns `false` when it already is the bottom.
pub fn lower_layer(state: &mut CanvasState, id: LayerId) -> Result<bool> {
    let idx = state.index_of(id).ok_or(EngineError::LayerNotFound(id))?;
    if idx + 1 >= state.layers.len() {
        return Ok(false);
    }
    state.layers.swap(idx, idx + 1);
    Ok(true)
}

// ---------------------------------------------------------------------------
//  Layer properties
// ---------------------------------------------------------------------------

pub fn move_layer(state: &mut CanvasState, id: LayerId, x: i32, y: i32) -> Result<()> {
    let layer = state.layer_mut(id)?;
    layer.x = x;
    layer.y = y;
    Ok(())
}

/// Opacity is clamped to `[0, 1]`; NaN is rejected.
pub fn set_opacity(state: &mut CanvasState, id: LayerId, opacity: f32) -> Result<f32> {
    if opacity.is_nan() {
        return Err(EngineError::Range("opacity must be a number".into()));
    }
    let layer = state.layer_mut(id)?;
    layer.opacity = opacity.clamp(0.0, 1.0);
    Ok(layer.opacity)
}

pub fn set_blend_mode(state: &mut CanvasState, id: LayerId, mode: BlendMode) -> Result<()> {
    state.layer_mut(id)?.blend_mode = mode;
    Ok(())
}

/// Flip visibility; returns the new value.
pub fn toggle_visibility(state: &mut CanvasState, id: LayerId) -> Result<bool> {
    let layer = state.layer_mut(id)?;
    layer.visible = !layer.visible;
    Ok(layer.visible)
}

pub fn rename_layer(state: &mut CanvasState, id: LayerId, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Range("layer name must not be empty".into()));
    }
    state.layer_mut(id)?.name = name.to_string();
    Ok(())
}

pub fn set_show_alpha_channel(state: &mut CanvasState, id: LayerId, show: bool) -> Result<()> {
    state.layer_mut(id)?.show_alpha_channel = show;
    Ok(())
}

/// Swap in an edited buffer (filter, gradation, resize result).
pub fn replace_pixels(state: &mut CanvasState, id: LayerId, pixels: RgbaImage) -> Result<u64> {
    let layer = state.layer_mut(id)?;
    layer.set_pixels(pixels);
    Ok(layer.generation)
}

/// Swap the packed source of an unedited GB7 layer (gradation applied to the
/// packed bytes) and re-expand the visible buffers for the current alpha state.
pub fn replace_gb7_source(state: &mut CanvasState, id: LayerId, image: Gb7Image) -> Result<u64> {
    let layer = state.layer_mut(id)?;
    if layer.gb7_source.is_none() {
        return Err(EngineError::Range(format!("layer '{}' has no GB7 source", layer.name)));
    }
    if (image.width as u32, image.height as u32) != layer.pixels.dimensions() {
        return Err(EngineError::Range(format!(
            "GB7 source is {}x{} but layer '{}' is {}x{}",
            image.width,
            image.height,
            layer.name,
            layer.width(),
            layer.height()
        )));
    }
    let with_mask = gb7::to_rgba(&image, image.import_variant());
    match layer.alpha {
        AlphaState::AlphaHidden => {
            layer.pixels = gb7::to_rgba(&image, Gb7Variant::WithoutMask);
            layer.original = Some(with_mask);
        }
        _ => layer.pixels = with_mask,
    }
    layer.gb7_source = Some(image);
    layer.generation += 1;
    Ok(layer.generation)
}

// ---------------------------------------------------------------------------
//  Alpha-channel state machine
// ---------------------------------------------------------------------------

fn illegal_transition(layer: &Layer, action: &str) -> EngineError {
    EngineError::Range(format!("cannot {} a layer in state {}", action, layer.alpha.name()))
}

/// HasAlpha → AlphaHidden: show an opaque view, keep the original.
pub fn hide_alpha(state: &mut CanvasState, id: LayerId) -> Result<()> {
    let layer = state.layer_mut(id)?;
    if layer.alpha != AlphaState::HasAlpha {
        return Err(illegal_transition(layer, "hide alpha of"));
    }
    let opaque = layer.opaque_view();
    layer.original = Some(std::mem::replace(&mut layer.pixels, opaque));
    layer.alpha = AlphaState::AlphaHidden;
    layer.generation += 1;
    Ok(())
}

/// AlphaHidden → HasAlpha: bring back the retained original.
pub fn restore_alpha(state: &mut CanvasState, id: LayerId) -> Result<()> {
    let layer = state.layer_mut(id)?;
    if layer.alpha != AlphaState::AlphaHidden {
        return Err(illegal_transition(layer, "restore alpha of"));
    }
    let Some(original) = layer.original.take() else {
        return Err(illegal_transition(layer, "restore alpha of"));
    };
    layer.pixels = original;
    layer.alpha = AlphaState::HasAlpha;
    layer.generation += 1;
    Ok(())
}

/// HasAlpha | AlphaHidden → AlphaStripped. Irreversible.
pub fn strip_alpha(state: &mut CanvasState, id: LayerId) -> Result<()> {
    let layer = state.layer_mut(id)?;
    match layer.alpha {
        AlphaState::HasAlpha => {
            layer.pixels = layer.opaque_view();
        }
        AlphaState::AlphaHidden => {}
        AlphaState::AlphaStripped => return Err(illegal_transition(layer, "strip alpha of")),
    }
    layer.original = None;
    layer.gb7_source = None;
    layer.alpha = AlphaState::AlphaStripped;
    layer.generation += 1;
    Ok(())
}

// ---------------------------------------------------------------------------
//  Resize
// ---------------------------------------------------------------------------

/// Resample a layer to the resolved target. Returns the new size.
pub fn resize_layer(
    state: &mut CanvasState,
    id: LayerId,
    target: ResizeTarget,
    keep_aspect: bool,
    interpolation: Interpolation,
    max_dimension: u32,
) -> Result<(u32, u32)> {
    let layer = state.layer(id)?;
    let (nw, nh) = target.resolve(layer.width(), layer.height(), keep_aspect, max_dimension)?;
    if nw as u64 * nh as u64 > transform::LARGE_IMAGE_PIXELS {
        log_warn!("Resize to {}x{} is large and may be slow", nw, nh);
    }
    let resized = transform::resize_rgba(&layer.pixels, nw, nh, interpolation);
    state.layer_mut(id)?.set_pixels(resized);
    Ok((nw, nh))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(colors: &[Rgba<u8>]) -> (CanvasState, Vec<LayerId>) {
        let mut state = CanvasState::new(colors.len().max(2));
        let ids = colors
            .iter()
            .enumerate()
            .map(|(i, c)| {
                add_image_layer(&mut state, format!("L{}", i), RgbaImage::from_pixel(4, 2, *c))
                    .unwrap()
            })
            .collect();
        (state, ids)
    }

    fn gb7_layer_state() -> (CanvasState, LayerId) {
        let bytes = gb7::encode(&[0xFF, 0x00, 0x80, 0x7F], 2, 2, true).unwrap();
        let mut state = CanvasState::default();
        let id = add_gb7_layer(&mut state, "g.gb7", gb7::decode(&bytes).unwrap()).unwrap();
        (state, id)
    }

    #[test]
    fn color_layer_takes_first_layer_size_or_default() {
        let mut state = CanvasState::default();
        let id = add_color_layer(&mut state, Rgba([255, 0, 16, 255])).unwrap();
        let layer = state.layer(id).unwrap();
        assert_eq!(layer.pixels.dimensions(), (800, 600));
        assert_eq!(layer.name, "Color Layer (#ff0010)");

        let (mut state, _) = state_with(&[Rgba([0, 0, 0, 255])]);
        let id = add_color_layer(&mut state, Rgba([1, 1, 1, 255])).unwrap();
        assert_eq!(state.layer(id).unwrap().pixels.dimensions(), (4, 2));
    }

    #[test]
    fn color_layer_beyond_cap_is_rejected() {
        let (mut state, ids) = state_with(&[Rgba([0, 0, 0, 255]), Rgba([9, 9, 9, 255])]);
        assert!(matches!(
            add_color_layer(&mut state, Rgba([1, 1, 1, 255])),
            Err(EngineError::LayerLimit { max: 2 })
        ));
        assert_eq!(state.layers.iter().map(|l| l.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn delete_moves_active_to_top() {
        let (mut state, ids) = state_with(&[Rgba([0, 0, 0, 255]), Rgba([9, 9, 9, 255])]);
        assert_eq!(state.active_layer, Some(ids[1]));
        let removed = delete_layer(&mut state, ids[1]).unwrap();
        assert_eq!(removed.id, ids[1]);
        assert_eq!(state.active_layer, Some(ids[0]));
        assert!(matches!(delete_layer(&mut state, ids[1]), Err(EngineError::LayerNotFound(_))));
        delete_layer(&mut state, ids[0]).unwrap();
        assert_eq!(state.active_layer, None);
    }

    #[test]
    fn reorder_swaps_neighbours() {
        let (mut state, ids) = state_with(&[Rgba([0, 0, 0, 255]), Rgba([9, 9, 9, 255])]);
        assert!(!raise_layer(&mut state, ids[0]).unwrap());
        assert!(raise_layer(&mut state, ids[1]).unwrap());
        assert_eq!(state.layers[0].id, ids[1]);
        assert!(!lower_layer(&mut state, ids[0]).unwrap());
        assert!(lower_layer(&mut state, ids[1]).unwrap());
        assert_eq!(state.layers[0].id, ids[0]);
    }

    #[test]
    fn property_setters() {
        let (mut state, ids) = state_with(&[Rgba([0, 0, 0, 255])]);
        let id = ids[0];
        assert_eq!(set_opacity(&mut state, id, 1.7).unwrap(), 1.0);
        assert_eq!(set_opacity(&mut state, id, -0.2).unwrap(), 0.0);
        assert!(set_opacity(&mut state, id, f32::NAN).is_err());
        set_blend_mode(&mut state, id, BlendMode::Screen).unwrap();
        move_layer(&mut state, id, -5, 7).unwrap();
        assert!(!toggle_visibility(&mut state, id).unwrap());
        rename_layer(&mut state, id, "  base  ").unwrap();
        assert!(rename_layer(&mut state, id, "   ").is_err());

        let layer = state.layer(id).unwrap();
        assert_eq!(
            (layer.x, layer.y, layer.blend_mode, layer.visible),
            (-5, 7, BlendMode::Screen, false)
        );
        assert_eq!(layer.name, "base");
        let ghost = LayerId::new();
        assert!(matches!(
            move_layer(&mut state, ghost, 0, 0),
            Err(EngineError::LayerNotFound(g)) if g == ghost
        ));
    }

    #[test]
    fn hide_and_restore_alpha() {
        let (mut state, ids) = state_with(&[Rgba([10, 20, 30, 40])]);
        let id = ids[0];
        hide_alpha(&mut state, id).unwrap();
        let layer = state.layer(id).unwrap();
        assert_eq!(layer.alpha, AlphaState::AlphaHidden);
        assert!(layer.pixels.pixels().all(|p| p.0 == [10, 20, 30, 255]));
        assert!(matches!(hide_alpha(&mut state, id), Err(EngineError::Range(_))));

        restore_alpha(&mut state, id).unwrap();
        let layer = state.layer(id).unwrap();
        assert_eq!(layer.alpha, AlphaState::HasAlpha);
        assert!(layer.pixels.pixels().all(|p| p.0 == [10, 20, 30, 40]));
        assert!(layer.original.is_none());
        assert!(matches!(restore_alpha(&mut state, id), Err(EngineError::Range(_))));
    }

    #[test]
    fn strip_alpha_is_permanent() {
        let (mut state, ids) = state_with(&[Rgba([10, 20, 30, 40])]);
        let id = ids[0];
        hide_alpha(&mut state, id).unwrap();
        strip_alpha(&mut state, id).unwrap();
        let layer = state.layer(id).unwrap();
        assert_eq!(layer.alpha, AlphaState::AlphaStripped);
        assert!(layer.original.is_none());
        assert!(layer.pixels.pixels().all(|p| p[3] == 255));
        let results = [
            hide_alpha(&mut state, id),
            restore_alpha(&mut state, id),
            strip_alpha(&mut state, id),
        ];
        for result in results {
            assert!(matches!(result, Err(EngineError::Range(_))));
        }
    }

    #[test]
    fn gb7_layer_hides_alpha_with_unmasked_variant() {
        let (mut state, id) = gb7_layer_state();
        assert_eq!(state.layer(id).unwrap().pixels.get_pixel(1, 1).0, [0, 0, 0, 0]);
        hide_alpha(&mut state, id).unwrap();
        // 0x7F shows its gray once the mask is ignored
        assert_eq!(state.layer(id).unwrap().pixels.get_pixel(1, 1).0, [254, 254, 254, 255]);
        restore_alpha(&mut state, id).unwrap();
        assert_eq!(state.layer(id).unwrap().pixels.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn edited_gb7_layer_forces_alpha_instead() {
        let (mut state, id) = gb7_layer_state();
        let edited = state.layer(id).unwrap().pixels.clone();
        replace_pixels(&mut state, id, edited).unwrap();
        hide_alpha(&mut state, id).unwrap();
        assert_eq!(state.layer(id).unwrap().pixels.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn gb7_source_swap_follows_alpha_state() {
        let (mut state, id) = gb7_layer_state();
        hide_alpha(&mut state, id).unwrap();
        let invert = crate::ops::adjustments::Lut::build(0, 255, 255, 0).unwrap();
        let source = state.layer(id).unwrap().gb7_source.as_ref().unwrap();
        let inverted = source.apply_lut(&invert);
        replace_gb7_source(&mut state, id, inverted).unwrap();
        let layer = state.layer(id).unwrap();
        // 0x00 -> 0x7F: opaque view shows 254, the retained masked view hides it
        assert_eq!(layer.pixels.get_pixel(1, 0).0, [254, 254, 254, 255]);
        assert_eq!(layer.original.as_ref().unwrap().get_pixel(1, 0).0, [0, 0, 0, 0]);

        let other =
            Gb7Image { width: 1, height: 1, version: 1, has_mask: true, pixel_data: vec![0x80] };
        assert!(matches!(replace_gb7_source(&mut state, id, other), Err(EngineError::Range(_))));
    }

    #[test]
    fn resize_replaces_buffer_and_bumps_generation() {
        let (mut state, ids) = state_with(&[Rgba([5, 6, 7, 8])]);
        let id = ids[0];
        let before = state.layer(id).unwrap().generation;
        let half = ResizeTarget::Percent { x: 50.0, y: 50.0 };
        let size = resize_layer(&mut state, id, half, true, Interpolation::Nearest, 2000).unwrap();
        assert_eq!(size, (2, 1));
        let layer = state.layer(id).unwrap();
        assert_eq!(layer.pixels.dimensions(), (2, 1));
        assert_eq!(layer.generation, before + 1);
    }

    #[test]
    fn failed_resize_leaves_layer_untouched() {
        let (mut state, ids) = state_with(&[Rgba([5, 6, 7, 8])]);
        let id = ids[0];
        let target = ResizeTarget::Pixels { width: 3000, height: 10 };
        assert!(matches!(
            resize_layer(&mut state, id, target, false, Interpolation::Bilinear, 2000),
            Err(EngineError::Size(_))
        ));
        let layer = state.layer(id).unwrap();
        assert_eq!((layer.pixels.dimensions(), layer.generation), ((4, 2), 0));
    }
}
