// ============================================================================
// PROJECT — one open document: layer stack, filter worker, status line
// ============================================================================
//
// All user-facing operations go through `Project`. Each one validates, then
// swaps a layer buffer by single assignment, then records a short status
// message. A failure never leaves a partial edit behind and never ends the
// session.
//
// Filters run on the background worker. At most one filter may be in flight
// per layer; its result is committed only if the layer still exists and no
// other edit landed in the meantime (checked through the layer generation).
// ============================================================================

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use uuid::Uuid;

use crate::canvas::{CanvasState, LayerId, composite_layers};
use crate::error::{EngineError, Result};
use crate::gb7::{self, Gb7Image};
use crate::io::{self, ExportFormat, LoadedFile};
use crate::ops::adjustments::{self, Histogram, Lut, LutChannel};
use crate::ops::canvas_ops;
use crate::ops::colors::{ColorReadout, ColorSample, parse_hex_color};
use crate::ops::filters::FilterKind;
use crate::ops::transform::ResizeTarget;
use crate::settings::EditorSettings;
use crate::worker::{FilterHandle, FilterWorker};

struct PendingEdit {
    layer: LayerId,
    generation: u64,
    label: String,
    handle: FilterHandle,
}

/// What happened to a finished filter job.
#[derive(Debug)]
pub enum EditOutcome {
    /// The result replaced the layer buffer.
    Applied { layer: LayerId, label: String },
    /// The layer was deleted or edited while the job ran; result dropped.
    Discarded { layer: LayerId, label: String },
    /// The job failed; the layer is unchanged.
    Failed { layer: LayerId, error: EngineError },
}

impl EditOutcome {
    pub fn layer(&self) -> LayerId {
        match self {
            EditOutcome::Applied { layer, .. }
            | EditOutcome::Discarded { layer, .. }
            | EditOutcome::Failed { layer, .. } => *layer,
        }
    }
}

/// Single open document.
pub struct Project {
    pub id: Uuid,
    pub canvas: CanvasState,
    pub settings: EditorSettings,
    /// `None` for unsaved documents.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    worker: FilterWorker,
    pending: Vec<PendingEdit>,
    status: String,
}

impl Project {
    pub fn new(settings: EditorSettings) -> Result<Self> {
        let mut canvas = CanvasState::new(settings.max_layers);
        canvas.set_zoom_percent(settings.zoom_percent);
        canvas.interpolation = settings.interpolation;
        Ok(Self {
            id: Uuid::new_v4(),
            canvas,
            settings,
            path: None,
            is_dirty: false,
            worker: FilterWorker::new()?,
            pending: Vec::new(),
            status: String::new(),
        })
    }

    /// Wrap an already populated canvas (e.g. a loaded project file).
    pub fn from_canvas(canvas: CanvasState, settings: EditorSettings) -> Result<Self> {
        let mut project = Self::new(settings)?;
        project.adopt_canvas(canvas);
        Ok(project)
    }

    /// Last user-visible message.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn display_title(&self) -> String {
        let name = self
            .path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".to_string());
        if self.is_dirty { format!("{}*", name) } else { name }
    }

    fn layer_name(&self, id: LayerId) -> String {
        self.canvas.layer(id).map(|l| l.name.clone()).unwrap_or_else(|_| id.to_string())
    }

    /// Log and publish the outcome of an operation.
    fn record<T>(&mut self, result: Result<T>, describe: impl FnOnce(&T) -> String) -> Result<T> {
        match result {
            Ok(value) => {
                let msg = describe(&value);
                log_info!("{}", msg);
                self.status = msg;
                Ok(value)
            }
            Err(e) => {
                log_warn!("{}", e);
                self.status = format!("Error: {}", e);
                Err(e)
            }
        }
    }

    /// Like [`record`](Self::record) for edits that change the document.
    fn record_edit<T>(
        &mut self,
        result: Result<T>,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        let result = self.record(result, describe);
        if result.is_ok() {
            self.is_dirty = true;
        }
        result
    }

    // ------------------------------------------------------------------
    //  Adding layers
    // ------------------------------------------------------------------

    pub fn import_image(&mut self, name: &str, pixels: RgbaImage) -> Result<LayerId> {
        let (w, h) = pixels.dimensions();
        let r = canvas_ops::add_image_layer(&mut self.canvas, name, pixels);
        self.record_edit(r, |_| format!("Loaded {} ({}x{})", name, w, h))
    }

    pub fn import_gb7(&mut self, name: &str, bytes: &[u8]) -> Result<LayerId> {
        match gb7::decode(bytes) {
            Ok(img) => self.import_gb7_image(name, img),
            Err(e) => self.record(Err(e), |_: &LayerId| String::new()),
        }
    }

    pub fn import_gb7_image(&mut self, name: &str, img: Gb7Image) -> Result<LayerId> {
        let (w, h, mask) = (img.width, img.height, img.has_mask);
        let r = canvas_ops::add_gb7_layer(&mut self.canvas, name, img).map(|id| (id, w, h, mask));
        self.record_edit(r, |(_, w, h, mask)| {
            let mask = if *mask { "masked" } else { "no mask" };
            format!("Loaded {} ({}x{} GB7, {})", name, w, h, mask)
        })
        .map(|(id, ..)| id)
    }

    /// Load a file from disk as a new layer. A `.gbp` project replaces the
    /// layer stack and is only accepted into an empty document.
    pub fn import_file(&mut self, path: &Path) -> Result<Option<LayerId>> {
        let name = io::layer_name_for(path);
        let loaded = match io::load_image_sync(path) {
            Ok(loaded) => loaded,
            Err(e) => return self.record(Err(e), |_| String::new()),
        };
        match loaded {
            LoadedFile::Image(pixels) => self.import_image(&name, pixels).map(Some),
            LoadedFile::Gb7(img) => self.import_gb7_image(&name, img).map(Some),
            LoadedFile::Project(canvas) => {
                let r = if self.canvas.layers.is_empty() {
                    let count = canvas.layers.len();
                    self.adopt_canvas(canvas);
                    self.path = Some(path.to_path_buf());
                    Ok(count)
                } else {
                    Err(EngineError::Range(
                        "a project can only be opened into an empty document".into(),
                    ))
                };
                self.record(r, |count| format!("Opened project {} ({} layers)", name, count))?;
                self.is_dirty = false;
                Ok(self.canvas.active_layer)
            }
        }
    }

    fn adopt_canvas(&mut self, mut canvas: CanvasState) {
        canvas.max_layers = canvas.max_layers.max(self.settings.max_layers);
        canvas.interpolation = self.canvas.interpolation;
        self.canvas = canvas;
    }

    pub fn add_color_layer(&mut self, color: Rgba<u8>) -> Result<LayerId> {
        let r = canvas_ops::add_color_layer(&mut self.canvas, color);
        let r = r.map(|id| (id, self.layer_name(id)));
        self.record_edit(r, |(_, name)| format!("Added {}", name)).map(|(id, _)| id)
    }

    /// Add a color layer from `#rgb` / `#rrggbb` text.
    pub fn add_color_layer_hex(&mut self, hex: &str) -> Result<LayerId> {
        match parse_hex_color(hex) {
            Ok(color) => self.add_color_layer(color),
            Err(e) => self.record(Err(e), |_: &LayerId| String::new()),
        }
    }

    // ------------------------------------------------------------------
    //  Layer management
    // ------------------------------------------------------------------

    pub fn delete_layer(&mut self, id: LayerId) -> Result<()> {
        let r = canvas_ops::delete_layer(&mut self.canvas, id).map(|layer| layer.name);
        self.record_edit(r, |name| format!("Deleted layer '{}'", name)).map(|_| ())
    }

    pub fn set_active_layer(&mut self, id: LayerId) -> Result<()> {
        let name = self.layer_name(id);
        let r = canvas_ops::set_active_layer(&mut self.canvas, id);
        self.record(r, |_| format!("Active layer: '{}'", name))
    }

    pub fn move_layer(&mut self, id: LayerId, x: i32, y: i32) -> Result<()> {
        let name = self.layer_name(id);
        let r = canvas_ops::move_layer(&mut self.canvas, id, x, y);
        self.record_edit(r, |_| format!("Moved '{}' to ({}, {})", name, x, y))
    }

    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> Result<f32> {
        let name = self.layer_name(id);
        let r = canvas_ops::set_opacity(&mut self.canvas, id, opacity);
        self.record_edit(r, |o| format!("Opacity of '{}' set to {:.0}%", name, o * 100.0))
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: crate::canvas::BlendMode) -> Result<()> {
        let name = self.layer_name(id);
        let r = canvas_ops::set_blend_mode(&mut self.canvas, id, mode);
        self.record_edit(r, |_| format!("Blend mode of '{}' set to {}", name, mode.name()))
    }

    pub fn toggle_visibility(&mut self, id: LayerId) -> Result<bool> {
        let name = self.layer_name(id);
        let r = canvas_ops::toggle_visibility(&mut self.canvas, id);
        self.record_edit(r, |v| {
            format!("'{}' is now {}", name, if *v { "visible" } else { "hidden" })
        })
    }

    pub fn rename_layer(&mut self, id: LayerId, new_name: &str) -> Result<()> {
        let r = canvas_ops::rename_layer(&mut self.canvas, id, new_name);
        self.record_edit(r, |_| format!("Renamed layer to '{}'", new_name.trim()))
    }

    pub fn raise_layer(&mut self, id: LayerId) -> Result<bool> {
        let name = self.layer_name(id);
        let r = canvas_ops::raise_layer(&mut self.canvas, id);
        self.record_edit(r, |moved| {
            if *moved {
                format!("Raised '{}'", name)
            } else {
                format!("'{}' is already on top", name)
            }
        })
    }

    pub fn lower_layer(&mut self, id: LayerId) -> Result<bool> {
        let name = self.layer_name(id);
        let r = canvas_ops::lower_layer(&mut self.canvas, id);
        self.record_edit(r, |moved| {
            if *moved {
                format!("Lowered '{}'", name)
            } else {
                format!("'{}' is already at the bottom", name)
            }
        })
    }

    pub fn set_show_alpha_channel(&mut self, id: LayerId, show: bool) -> Result<()> {
        let name = self.layer_name(id);
        let r = canvas_ops::set_show_alpha_channel(&mut self.canvas, id, show);
        let verb = if show { "Showing" } else { "Hiding" };
        self.record(r, |_| format!("{} alpha channel of '{}'", verb, name))
    }

    pub fn hide_alpha(&mut self, id: LayerId) -> Result<()> {
        let name = self.layer_name(id);
        let r = canvas_ops::hide_alpha(&mut self.canvas, id);
        self.record_edit(r, |_| format!("Alpha hidden on '{}'", name))
    }

    pub fn restore_alpha(&mut self, id: LayerId) -> Result<()> {
        let name = self.layer_name(id);
        let r = canvas_ops::restore_alpha(&mut self.canvas, id);
        self.record_edit(r, |_| format!("Alpha restored on '{}'", name))
    }

    pub fn strip_alpha(&mut self, id: LayerId) -> Result<()> {
        let name = self.layer_name(id);
        let r = canvas_ops::strip_alpha(&mut self.canvas, id);
        self.record_edit(r, |_| format!("Alpha removed from '{}'", name))
    }

    pub fn set_zoom_percent(&mut self, percent: u32) -> u32 {
        self.canvas.set_zoom_percent(percent);
        let zoom = self.canvas.zoom_percent;
        self.status = format!("Zoom {}%", zoom);
        zoom
    }

    // ------------------------------------------------------------------
    //  Pixel edits
    // ------------------------------------------------------------------

    /// Queue a filter for a layer. Rejected with `Busy` while another filter
    /// for the same layer is in flight. Returns the job id.
    pub fn submit_filter(&mut self, id: LayerId, kind: FilterKind) -> Result<u64> {
        let r = self.queue_filter(id, &kind);
        let name = self.layer_name(id);
        self.record(r, |job| format!("Applying {} to '{}' (job #{})", kind.label(), name, job))
    }

    fn queue_filter(&mut self, id: LayerId, kind: &FilterKind) -> Result<u64> {
        if self.pending.iter().any(|p| p.layer == id) {
            return Err(EngineError::Busy(id));
        }
        let layer = self.canvas.layer(id)?;
        let generation = layer.generation;
        let handle = self.worker.submit(layer.pixels.clone(), kind.clone());
        let job = handle.id();
        self.pending.push(PendingEdit { layer: id, generation, label: kind.label(), handle });
        Ok(job)
    }

    /// Submit and wait for the result in one call.
    pub fn apply_filter(&mut self, id: LayerId, kind: FilterKind) -> Result<()> {
        self.submit_filter(id, kind)?;
        let outcome = self.wait_jobs().into_iter().rfind(|o| o.layer() == id);
        match outcome {
            Some(EditOutcome::Failed { error, .. }) => Err(error),
            Some(EditOutcome::Discarded { label, .. }) => {
                Err(EngineError::JobFailed(format!("{} was superseded by another edit", label)))
            }
            _ => Ok(()),
        }
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    /// Commit every finished job without blocking.
    pub fn poll_jobs(&mut self) -> Vec<EditOutcome> {
        let mut outcomes = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            match self.pending[i].handle.try_take() {
                Some(result) => {
                    let edit = self.pending.remove(i);
                    outcomes.push(self.finish_job(edit, result));
                }
                None => i += 1,
            }
        }
        outcomes
    }

    /// Block until every queued job has finished, committing in FIFO order.
    pub fn wait_jobs(&mut self) -> Vec<EditOutcome> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|mut edit| {
                let result = match edit.handle.try_take() {
                    Some(r) => r,
                    None => pollster::block_on(&mut edit.handle),
                };
                self.finish_job(edit, result)
            })
            .collect()
    }

    fn finish_job(&mut self, edit: PendingEdit, result: Result<RgbaImage>) -> EditOutcome {
        let PendingEdit { layer: id, generation, label, .. } = edit;
        let pixels = match result {
            Ok(p) => p,
            Err(error) => {
                log_err!("{} on layer {} failed: {}", label, id, error);
                self.status = format!("Error: {}", error);
                return EditOutcome::Failed { layer: id, error };
            }
        };
        let current = self.canvas.layer(id).map(|l| l.generation).ok();
        if current != Some(generation) {
            let why = if current.is_none() {
                "layer was deleted"
            } else {
                "layer changed meanwhile"
            };
            log_warn!("Discarding stale {} result for layer {} ({})", label, id, why);
            self.status = format!("Discarded {} result: {}", label, why);
            return EditOutcome::Discarded { layer: id, label };
        }
        let name = self.layer_name(id);
        let r = canvas_ops::replace_pixels(&mut self.canvas, id, pixels);
        match self.record_edit(r, |_| format!("Applied {} to '{}'", label, name)) {
            Ok(_) => EditOutcome::Applied { layer: id, label },
            Err(error) => EditOutcome::Failed { layer: id, error },
        }
    }

    /// Gradation correction. Unedited GB7 layers are corrected on their packed
    /// data when all three color channels are selected.
    pub fn apply_gradation(&mut self, id: LayerId, lut: &Lut, channel: LutChannel) -> Result<()> {
        let name = self.layer_name(id);
        let r = self.gradation_inner(id, lut, channel);
        self.record_edit(r, |_| format!("Applied {} gradation to '{}'", channel.name(), name))
    }

    fn gradation_inner(&mut self, id: LayerId, lut: &Lut, channel: LutChannel) -> Result<()> {
        if self.pending.iter().any(|p| p.layer == id) {
            return Err(EngineError::Busy(id));
        }
        let layer = self.canvas.layer(id)?;
        match (&layer.gb7_source, channel) {
            (Some(src), LutChannel::Rgb) => {
                let corrected = src.apply_lut(lut);
                canvas_ops::replace_gb7_source(&mut self.canvas, id, corrected)?;
            }
            _ => {
                let corrected = adjustments::apply_lut(&layer.pixels, lut, channel);
                canvas_ops::replace_pixels(&mut self.canvas, id, corrected)?;
            }
        }
        Ok(())
    }

    /// Histogram for the gradation display. Unedited GB7 layers are counted
    /// from their packed data, the same values `apply_gradation` corrects.
    pub fn histogram(&self, id: LayerId) -> Result<Histogram> {
        let layer = self.canvas.layer(id)?;
        Ok(match &layer.gb7_source {
            Some(src) => src.histogram(),
            None => adjustments::compute_histogram(&layer.pixels),
        })
    }

    pub fn resize_layer(
        &mut self,
        id: LayerId,
        target: ResizeTarget,
        keep_aspect: bool,
    ) -> Result<(u32, u32)> {
        let name = self.layer_name(id);
        let interpolation = self.settings.interpolation;
        let max = self.settings.max_resize_dimension;
        let r =
            canvas_ops::resize_layer(&mut self.canvas, id, target, keep_aspect, interpolation, max);
        self.record_edit(r, |(w, h)| {
            format!("Resized '{}' to {}x{} ({})", name, w, h, interpolation.name())
        })
    }

    // ------------------------------------------------------------------
    //  Output and inspection
    // ------------------------------------------------------------------

    /// The zoomed view frame.
    pub fn composite(&self) -> RgbaImage {
        self.canvas.composite()
    }

    /// Export frame over the visible bounding box.
    pub fn flatten(&mut self) -> Result<RgbaImage> {
        let r = self.canvas.flatten();
        self.record(r, |img| format!("Flattened to {}x{}", img.width(), img.height()))
    }

    /// Write the document: a project file keeps the layers, every other
    /// format gets the flattened image.
    pub fn export(&mut self, path: &Path, format: ExportFormat) -> Result<()> {
        let r = self.export_inner(path, format);
        self.record(r, |_| format!("Saved {} ({})", path.display(), format.extension()))?;
        if format == ExportFormat::Project {
            self.path = Some(path.to_path_buf());
            self.is_dirty = false;
        }
        Ok(())
    }

    fn export_inner(&self, path: &Path, format: ExportFormat) -> Result<()> {
        if format == ExportFormat::Project {
            return io::save_project(&self.canvas, path);
        }
        let flat = self.canvas.flatten()?;
        io::encode_and_write(&flat, path, format, self.settings.jpeg_quality)
    }

    /// Eyedropper: view coordinates are mapped back through the zoom with
    /// `floor(x / zoom)` and read from the unzoomed composite.
    pub fn sample(&mut self, view_x: u32, view_y: u32) -> Result<ColorSample> {
        let r = self.sample_inner(view_x, view_y);
        self.record(r, |s| format!("Picked {} at ({}, {})", s.hex(), s.x, s.y))
    }

    fn sample_inner(&self, view_x: u32, view_y: u32) -> Result<ColorSample> {
        let zoom = self.canvas.zoom();
        let x = (view_x as f64 / zoom).floor() as u32;
        let y = (view_y as f64 / zoom).floor() as u32;
        let w = self.canvas.layers.iter().map(|l| l.width()).max().unwrap_or(0);
        let h = self.canvas.layers.iter().map(|l| l.height()).max().unwrap_or(0);
        if x >= w || y >= h {
            return Err(EngineError::Range(format!(
                "({}, {}) is outside the {}x{} canvas",
                x, y, w, h
            )));
        }
        let frame = composite_layers(&self.canvas.layers, w, h, 1.0, self.canvas.interpolation);
        Ok(ColorSample::from_pixel(*frame.get_pixel(x, y), x, y))
    }

    pub fn readout(&mut self, view_x: u32, view_y: u32) -> Result<ColorReadout> {
        self.sample(view_x, view_y).map(ColorReadout::from_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::BlendMode;
    use crate::ops::filters::{Kernel, MedianBorder};

    fn project() -> Project {
        Project::new(EditorSettings::default()).unwrap()
    }

    fn gray(w: u32, h: u32, v: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255]))
    }

    #[test]
    fn status_reports_success_and_failure() {
        let mut p = project();
        p.import_image("a.png", gray(4, 4, 10)).unwrap();
        assert_eq!(p.status(), "Loaded a.png (4x4)");
        p.import_image("b.png", gray(4, 4, 20)).unwrap();
        assert!(p.import_image("c.png", gray(4, 4, 30)).is_err());
        assert_eq!(p.status(), "Error: Maximum 2 layers allowed");
        assert_eq!(p.canvas.layers.len(), 2);
        assert!(p.is_dirty);
    }

    #[test]
    fn filter_result_lands_on_layer() {
        let mut p = project();
        let id = p.import_image("a.png", gray(5, 5, 100)).unwrap();
        p.apply_filter(id, FilterKind::Laplacian).unwrap();
        assert!(p.canvas.layer(id).unwrap().pixels.pixels().all(|px| px.0 == [0, 0, 0, 255]));
        assert_eq!(p.canvas.layer(id).unwrap().generation, 1);
        assert!(!p.has_pending_jobs());
    }

    #[test]
    fn second_filter_on_busy_layer_is_rejected() {
        let mut p = project();
        let id = p.import_image("a.png", gray(64, 64, 100)).unwrap();
        p.submit_filter(id, FilterKind::Median(MedianBorder::Clamp)).unwrap();
        let err = p.submit_filter(id, FilterKind::Laplacian).unwrap_err();
        assert!(matches!(err, EngineError::Busy(b) if b == id));
        assert!(p.status().starts_with("Error: "));
        let outcomes = p.wait_jobs();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], EditOutcome::Applied { .. }));
    }

    #[test]
    fn stale_result_is_discarded() {
        let mut p = project();
        let id = p.import_image("a.png", gray(8, 8, 100)).unwrap();
        p.submit_filter(id, FilterKind::Laplacian).unwrap();
        // a synchronous edit lands before the filter result is committed
        p.resize_layer(id, ResizeTarget::Pixels { width: 4, height: 4 }, false).unwrap();
        let outcomes = p.wait_jobs();
        assert!(matches!(outcomes[0], EditOutcome::Discarded { .. }));
        let layer = p.canvas.layer(id).unwrap();
        assert_eq!(layer.pixels.dimensions(), (4, 4));
        assert_eq!(layer.pixels.get_pixel(0, 0).0, [100, 100, 100, 255]);
    }

    #[test]
    fn result_for_deleted_layer_is_discarded() {
        let mut p = project();
        let id = p.import_image("a.png", gray(8, 8, 100)).unwrap();
        p.submit_filter(id, FilterKind::Convolution(Kernel::identity())).unwrap();
        p.delete_layer(id).unwrap();
        let outcomes = p.wait_jobs();
        assert!(matches!(outcomes[0], EditOutcome::Discarded { layer, .. } if layer == id));
        assert!(p.status().contains("layer was deleted"));
    }

    #[test]
    fn gradation_on_gb7_layer_uses_packed_data() {
        let mut p = project();
        let bytes = gb7::encode(&[0xFF, 0x00, 0x80, 0x7F], 2, 2, true).unwrap();
        let id = p.import_gb7("g.gb7", &bytes).unwrap();
        assert_eq!(p.status(), "Loaded g.gb7 (2x2 GB7, masked)");
        let invert = Lut::build(0, 255, 255, 0).unwrap();
        p.apply_gradation(id, &invert, LutChannel::Rgb).unwrap();
        let layer = p.canvas.layer(id).unwrap();
        // 0xFF -> 0x80: visible black
        assert_eq!(layer.pixels.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert!(layer.gb7_source.is_some());
    }

    #[test]
    fn gradation_on_single_channel() {
        let mut p = project();
        let id = p.import_image("a.png", gray(2, 2, 10)).unwrap();
        let invert = Lut::build(0, 255, 255, 0).unwrap();
        p.apply_gradation(id, &invert, LutChannel::Blue).unwrap();
        assert_eq!(p.canvas.layer(id).unwrap().pixels.get_pixel(1, 1).0, [10, 10, 245, 255]);
        let hist = p.histogram(id).unwrap();
        assert_eq!(hist.blue[245], 4);
    }

    #[test]
    fn eyedropper_divides_by_zoom() {
        let mut p = project();
        let mut img = gray(4, 4, 0);
        img.put_pixel(1, 1, Rgba([200, 100, 50, 255]));
        p.import_image("a.png", img).unwrap();
        p.set_zoom_percent(200);
        let sample = p.sample(3, 2).unwrap();
        assert_eq!((sample.x, sample.y), (1, 1));
        assert_eq!(sample.rgba(), Rgba([200, 100, 50, 255]));
        assert!(p.sample(8, 0).is_err());
        let readout = p.readout(0, 0).unwrap();
        assert!((readout.contrast_white - 21.0).abs() < 0.01);
    }

    #[test]
    fn layer_property_ops_report_status() {
        let mut p = project();
        let id = p.import_image("base.png", gray(2, 2, 0)).unwrap();
        p.set_blend_mode(id, BlendMode::Overlay).unwrap();
        assert_eq!(p.status(), "Blend mode of 'base.png' set to overlay");
        p.set_opacity(id, 0.25).unwrap();
        assert_eq!(p.status(), "Opacity of 'base.png' set to 25%");
        assert!(!p.toggle_visibility(id).unwrap());
        assert!(p.flatten().is_err());
        assert_eq!(p.status(), "Error: Out of range: nothing visible to export");
    }

    #[test]
    fn far_offset_export_is_a_size_error() {
        let mut p = project();
        let id = p.import_image("a.png", gray(1, 1, 10)).unwrap();
        p.move_layer(id, i32::MAX, i32::MAX).unwrap();
        assert!(matches!(p.flatten(), Err(EngineError::Size(_))));
        assert!(p.status().starts_with("Error: Size limit exceeded"), "{}", p.status());
        let out = std::env::temp_dir().join(format!("gb7edit-far-{}.png", std::process::id()));
        assert!(matches!(p.export(&out, ExportFormat::Png), Err(EngineError::Size(_))));
        assert!(!out.exists());
        // moving back makes the document exportable again
        p.move_layer(id, 0, 0).unwrap();
        assert_eq!(p.flatten().unwrap().dimensions(), (1, 1));
    }

    #[test]
    fn failed_job_leaves_layer_untouched() {
        let mut p = project();
        let id = p.import_image("a.png", gray(3, 3, 42)).unwrap();
        let before = p.canvas.layer(id).unwrap().clone();
        let handle = p.worker.submit(before.pixels.clone(), FilterKind::Laplacian);
        let edit = PendingEdit {
            layer: id,
            generation: before.generation,
            label: "laplacian".into(),
            handle,
        };
        let outcome = p.finish_job(edit, Err(EngineError::JobFailed("laplacian: boom".into())));
        assert!(matches!(outcome, EditOutcome::Failed { error: EngineError::JobFailed(_), .. }));
        let after = p.canvas.layer(id).unwrap();
        assert_eq!(after.generation, before.generation);
        assert_eq!(after.pixels, before.pixels);
        assert_eq!(p.status(), "Error: Filter job failed: laplacian: boom");
        // the worker keeps serving after the failure
        p.apply_filter(id, FilterKind::Laplacian).unwrap();
        assert_eq!(p.canvas.layer(id).unwrap().generation, before.generation + 1);
    }

    #[test]
    fn gb7_histogram_counts_packed_gray() {
        let mut p = project();
        let bytes = gb7::encode(&[0xFF, 0x00, 0x80, 0x7F], 2, 2, true).unwrap();
        let id = p.import_gb7("g.gb7", &bytes).unwrap();
        let hist = p.histogram(id).unwrap();
        // 0x7F is masked out in the pixels but still counts as gray 254
        assert_eq!(hist.red[254], 2);
        assert_eq!(hist.red[0], 2);

        p.apply_filter(id, FilterKind::Median(MedianBorder::Unfiltered)).unwrap();
        let hist = p.histogram(id).unwrap();
        assert_eq!(hist.alpha[0], 4, "edited layers count their RGBA buffer");
    }

    #[test]
    fn color_layer_from_hex() {
        let mut p = project();
        let id = p.add_color_layer_hex("#ff8000").unwrap();
        let layer = p.canvas.layer(id).unwrap();
        assert_eq!(layer.name, "Color Layer (#ff8000)");
        assert_eq!(layer.pixels.dimensions(), (800, 600));
        assert_eq!(layer.pixels.get_pixel(0, 0).0, [255, 128, 0, 255]);
        assert!(matches!(p.add_color_layer_hex("#12"), Err(EngineError::Range(_))));
        assert!(p.status().starts_with("Error: "));
        assert_eq!(p.canvas.layers.len(), 1);
    }
}
