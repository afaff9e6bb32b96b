// ============================================================================
// EDITOR SESSION: all mutable editor state in one value
// ============================================================================

use chrono::Utc;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::canvas::{CanvasDocument, Point, RegionRect};
use crate::components::history::{Annotation, FilterOp, ImageResource, PastedImageOp};
use crate::components::selection::SelectionPurpose;
use crate::components::tools::{PointerOutcome, Tool, ToolProperties, ToolState};
use crate::error::{EditorError, Result};
use crate::io::{self, ExportFormat, ExportSink, ImageSource};
use crate::ops::clipboard::{DecodeQueue, DecodeResult, PastePayload, fit_placement};
use crate::preferences::{EditorSettings, KEY_DEFAULT_FOLDER, PreferenceStore};

pub const CONFIRM_CLEAR: &str = "Clear all annotations?";
pub const CONFIRM_DISCARD: &str = "Discard annotations?";

/// Asks the user to confirm a destructive action.
pub trait Confirmer {
    fn confirm(&mut self, message: &str) -> bool;
}

impl<F> Confirmer for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, message: &str) -> bool {
        self(message)
    }
}

pub struct EditorSession {
    id: Uuid,
    document: Option<CanvasDocument>,
    pub tools: ToolState,
    settings: EditorSettings,
    file_name: String,
    decoder: DecodeQueue,
    /// Highest document epoch handed out so far.
    last_epoch: u64,
    pending_text: Option<(Point, Tool)>,
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::new(EditorSettings::default())
    }
}

impl EditorSession {
    pub fn new(settings: EditorSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            document: None,
            tools: ToolState::new(ToolProperties::from_settings(&settings)),
            settings,
            file_name: String::new(),
            decoder: DecodeQueue::new(),
            last_epoch: 0,
            pending_text: None,
        }
    }

    /// Session configured from stored preferences.
    pub fn with_preferences(store: &dyn PreferenceStore) -> Result<Self> {
        Ok(Self::new(EditorSettings::load(store)?))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn document(&self) -> Option<&CanvasDocument> {
        self.document.as_ref()
    }

    pub fn document_mut(&mut self) -> Option<&mut CanvasDocument> {
        self.document.as_mut()
    }

    pub fn is_editing(&self) -> bool {
        self.document.is_some()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = name.into();
    }

    /// Committed operations, oldest first.
    pub fn operations(&self) -> &[Annotation] {
        self.document.as_ref().map_or(&[], |d| d.history.list())
    }

    /// Working composite (no selection guides).
    pub fn composite(&self) -> Option<&RgbaImage> {
        self.document.as_ref().map(|d| d.surface.pixels())
    }

    /// What the user sees: composite plus the active selection guide.
    pub fn display_image(&self) -> Option<RgbaImage> {
        let doc = self.document.as_ref()?;
        let guide = match self.tools.active {
            Tool::Crop => doc.crop.rect(),
            Tool::Filter => doc.filter.rect(),
            _ => None,
        };
        Some(doc.display_image(guide))
    }

    fn next_epoch(&mut self) -> u64 {
        let current = self.document.as_ref().map_or(0, |d| d.epoch());
        self.last_epoch = self.last_epoch.max(current) + 1;
        self.last_epoch
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Take a screenshot from `source` and start editing it. Any failure
    /// leaves the previous state untouched.
    pub fn capture(&mut self, source: &mut dyn ImageSource) -> Result<()> {
        let bytes = source.capture().map_err(|e| {
            tracing::error!("Capture failed: {}", e);
            match e {
                EditorError::Capture(_) => e,
                other => EditorError::Capture(other.to_string()),
            }
        })?;
        let image = io::decode_image(&bytes).map_err(|e| {
            tracing::error!("Captured image could not be decoded: {}", e);
            EditorError::Capture(e.to_string())
        })?;
        self.start_document(image);
        self.file_name = io::default_file_name(Utc::now());
        tracing::info!(
            "Captured {}x{} screenshot as '{}'",
            self.document.as_ref().map_or(0, |d| d.width()),
            self.document.as_ref().map_or(0, |d| d.height()),
            self.file_name
        );
        Ok(())
    }

    /// Start editing an already-decoded image.
    pub fn load_image(&mut self, image: RgbaImage) {
        self.start_document(image);
        if self.file_name.is_empty() {
            self.file_name = io::default_file_name(Utc::now());
        }
    }

    fn start_document(&mut self, image: RgbaImage) {
        let epoch = self.next_epoch();
        self.document = Some(CanvasDocument::new(image, self.settings.max_history, epoch));
        self.tools.reset_gesture();
        self.pending_text = None;
    }

    /// Drop the document. Late decodes for it are discarded by epoch.
    pub fn reset(&mut self) {
        if let Some(doc) = self.document.take() {
            self.last_epoch = self.last_epoch.max(doc.epoch());
        }
        self.tools.reset_gesture();
        self.pending_text = None;
        self.file_name.clear();
    }

    /// Leave the editor. A non-empty session needs confirmation.
    pub fn cancel(&mut self, confirm: &mut dyn Confirmer) -> Result<()> {
        if !self.operations().is_empty() && !confirm.confirm(CONFIRM_DISCARD) {
            return Err(EditorError::Cancelled);
        }
        self.reset();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pointer routing
    // ------------------------------------------------------------------

    pub fn set_tool(&mut self, tool: Tool) {
        self.tools.set_tool(self.document.as_mut(), tool);
        self.pending_text = None;
    }

    pub fn pointer_down(&mut self, p: Point) -> PointerOutcome {
        let Some(doc) = self.document.as_mut() else {
            return PointerOutcome::None;
        };
        let out = self.tools.pointer_down(doc, p);
        if let PointerOutcome::TextEntryRequested { anchor, tool } = out {
            self.pending_text = Some((anchor, tool));
        }
        out
    }

    pub fn pointer_move(&mut self, p: Point) -> PointerOutcome {
        let Some(doc) = self.document.as_mut() else {
            return PointerOutcome::None;
        };
        self.tools.pointer_move(doc, p)
    }

    pub fn pointer_up(&mut self, p: Point) -> PointerOutcome {
        let Some(doc) = self.document.as_mut() else {
            return PointerOutcome::None;
        };
        let out = self.tools.pointer_up(doc, p);
        self.after_pointer_finish(&out);
        out
    }

    pub fn pointer_leave(&mut self, p: Point) -> PointerOutcome {
        let Some(doc) = self.document.as_mut() else {
            return PointerOutcome::None;
        };
        let out = self.tools.pointer_leave(doc, p);
        self.after_pointer_finish(&out);
        out
    }

    fn after_pointer_finish(&mut self, out: &PointerOutcome) {
        match out {
            PointerOutcome::Committed(_) => self.enforce_history_limit(),
            PointerOutcome::Warning(msg) => tracing::warn!("{}", msg),
            _ => {}
        }
    }

    /// Text for the entry opened by the last text/heading click.
    pub fn submit_text(&mut self, content: &str) -> Result<()> {
        let (anchor, tool) = self.pending_text.take().ok_or(EditorError::NoSelection)?;
        let op = self.tools.text_op(tool, anchor, content)?;
        let doc = self.document.as_mut().ok_or(EditorError::NoDocument)?;
        doc.history.append(op);
        doc.recomposite();
        self.enforce_history_limit();
        Ok(())
    }

    pub fn cancel_text(&mut self) {
        self.pending_text = None;
    }

    pub fn pending_text(&self) -> Option<(Point, Tool)> {
        self.pending_text
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Commit the crop or filter selection.
    pub fn apply_selection(&mut self, purpose: SelectionPurpose) -> Result<()> {
        let mode = self.tools.props.filter_mode;
        let doc = self.document.as_mut().ok_or(EditorError::NoDocument)?;
        match purpose {
            SelectionPurpose::Crop => {
                let rect = doc.crop.commit()?;
                doc.commit_crop(rect)?;
                self.last_epoch = self.last_epoch.max(doc.epoch());
                self.tools.reset_gesture();
            }
            SelectionPurpose::Filter => {
                let rect = doc.filter.commit()?;
                doc.history.append(Annotation::ColorFilter(FilterOp { rect, mode }));
                doc.recomposite();
                tracing::info!("Applied {} filter to {:?}", mode, rect);
                self.enforce_history_limit();
            }
        }
        Ok(())
    }

    /// Select `rect` and commit it in one step (scripts, batch mode).
    pub fn select_and_apply(&mut self, purpose: SelectionPurpose, rect: RegionRect) -> Result<()> {
        let doc = self.document.as_mut().ok_or(EditorError::NoDocument)?;
        match purpose {
            SelectionPurpose::Crop => doc.crop.set_rect(rect),
            SelectionPurpose::Filter => doc.filter.set_rect(rect),
        }
        self.apply_selection(purpose)
    }

    /// Append an operation built outside the pointer flow.
    pub fn push_operation(&mut self, op: Annotation) -> Result<()> {
        let doc = self.document.as_mut().ok_or(EditorError::NoDocument)?;
        doc.history.append(op);
        doc.recomposite();
        self.enforce_history_limit();
        Ok(())
    }

    /// Remove the most recent operation. Returns whether anything changed.
    pub fn undo(&mut self) -> bool {
        let Some(doc) = self.document.as_mut() else {
            return false;
        };
        let removed = doc.history.remove_last();
        if let Some(op) = &removed {
            tracing::debug!("Undo {}", op.kind().name());
            doc.recomposite();
        }
        removed.is_some()
    }

    pub fn clear_all(&mut self, confirm: &mut dyn Confirmer) -> Result<()> {
        let doc = self.document.as_mut().ok_or(EditorError::NoDocument)?;
        if !confirm.confirm(CONFIRM_CLEAR) {
            return Err(EditorError::Cancelled);
        }
        doc.history.clear();
        doc.recomposite();
        Ok(())
    }

    /// Bake the composite into a new base. Refused while pasted images are
    /// still decoding, since they would be lost.
    pub fn flatten(&mut self) -> bool {
        let Some(doc) = self.document.as_mut() else {
            return false;
        };
        let decoding = doc
            .history
            .list()
            .iter()
            .any(|op| matches!(op, Annotation::PastedImage(p) if matches!(p.resource, ImageResource::Pending)));
        if decoding {
            tracing::debug!("Flatten deferred: pasted images still decoding");
            return false;
        }
        let n = doc.history.len();
        let bytes = doc.history.memory_usage();
        doc.flatten();
        self.last_epoch = self.last_epoch.max(doc.epoch());
        tracing::info!("Flattened {} operations (~{} KB) into the base image", n, bytes / 1024);
        true
    }

    fn enforce_history_limit(&mut self) {
        if self.document.as_ref().is_some_and(|d| d.history.over_limit()) {
            self.flatten();
        }
    }

    // ------------------------------------------------------------------
    // Paste
    // ------------------------------------------------------------------

    /// Add the first image of `payload` as a pasted-image op, centered and
    /// fit to the canvas. Decoding finishes asynchronously; see
    /// [`EditorSession::poll_decodes`]. Returns `None` if the payload has no image.
    pub fn paste(&mut self, payload: &PastePayload) -> Result<Option<Uuid>> {
        let doc = self.document.as_mut().ok_or(EditorError::NoDocument)?;
        let Some(item) = payload.first_image() else {
            return Ok(None);
        };
        let (iw, ih) = io::read_dimensions(&item.bytes).inspect_err(|e| {
            tracing::warn!("Pasted {} could not be decoded: {}", item.mime, e);
        })?;
        let placement = fit_placement(iw, ih, doc.width(), doc.height());
        let op = PastedImageOp::new(placement, item.bytes.clone());
        let id = op.id;
        doc.history.append(Annotation::PastedImage(op));
        self.decoder.submit(id, doc.epoch(), item.bytes.clone());
        Ok(Some(id))
    }

    /// Place encoded image bytes at `(x, y)` at natural size, decoding now.
    pub fn paste_bytes_at(&mut self, bytes: Vec<u8>, x: f32, y: f32) -> Result<Uuid> {
        let image = io::decode_image(&bytes)?;
        let placement = RegionRect::new(x, y, image.width() as f32, image.height() as f32);
        let mut op = PastedImageOp::new(placement, bytes);
        op.resource = ImageResource::Ready(Arc::new(image));
        let id = op.id;
        self.push_operation(Annotation::PastedImage(op))?;
        Ok(id)
    }

    /// Apply finished decodes. Each live completion triggers one recomposite.
    pub fn poll_decodes(&mut self) -> usize {
        let done = self.decoder.drain();
        done.into_iter().filter(|r| self.apply_decode(r)).count()
    }

    /// Block until all outstanding decodes land or `timeout` passes.
    pub fn wait_for_decodes(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut applied = 0;
        while self.decoder.in_flight() > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match self.decoder.wait_one(left) {
                Some(r) => applied += self.apply_decode(&r) as usize,
                None => break,
            }
        }
        applied
    }

    fn apply_decode(&mut self, r: &DecodeResult) -> bool {
        let Some(doc) = self.document.as_mut().filter(|d| d.epoch() == r.epoch) else {
            tracing::debug!("Dropping decode {} for a replaced image", r.id);
            return false;
        };
        match &r.image {
            Ok(img) => {
                let Some(op) = doc.history.pasted_mut(r.id) else {
                    tracing::debug!("Pasted image {} was removed before decoding finished", r.id);
                    return false;
                };
                op.resource = ImageResource::Ready(Arc::new(img.clone()));
            }
            Err(e) => {
                tracing::warn!("Pasted image decode failed: {}", e);
                doc.history.remove_pasted(r.id);
            }
        }
        doc.recomposite();
        true
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Encode the composite as PNG and hand it to `sink` at
    /// `{folder}/{file_name}.png`. Success resets the session; failure keeps it.
    pub fn export(&mut self, sink: &mut dyn ExportSink, prompt_user: bool) -> Result<String> {
        let doc = self.document.as_mut().ok_or(EditorError::NoDocument)?;
        doc.recomposite();
        let bytes = doc.surface.export_bytes(ExportFormat::Png)?;
        let path = io::export_path(&self.settings.default_folder, &self.file_name);
        match sink.save(&bytes, &path, prompt_user) {
            Ok(id) => {
                tracing::info!("Screenshot saved as {} ({} bytes)", id, bytes.len());
                self.reset();
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Export to {} failed: {}", path, e);
                Err(match e {
                    EditorError::Export(_) => e,
                    other => EditorError::Export(other.to_string()),
                })
            }
        }
    }

    /// Change and persist the export folder.
    pub fn set_default_folder(&mut self, folder: &str, store: &mut dyn PreferenceStore) -> Result<()> {
        self.settings.default_folder = folder.trim().to_string();
        let mut values = HashMap::new();
        values.insert(KEY_DEFAULT_FOLDER.to_string(), self.settings.default_folder.clone());
        store.set(&values)
    }

    pub fn save_project(&self, path: &Path) -> Result<()> {
        let doc = self.document.as_ref().ok_or(EditorError::NoDocument)?;
        io::save_project(doc.surface.base(), doc.history.list(), path)
    }

    /// Replace the session with a saved one. Pasted images are decoded
    /// up front; any that fail are dropped.
    pub fn load_project(&mut self, path: &Path) -> Result<()> {
        let (base, ops) = io::load_project(path)?;
        let mut restored = Vec::with_capacity(ops.len());
        for mut op in ops {
            if let Annotation::PastedImage(p) = &mut op {
                match io::decode_image(&p.bytes) {
                    Ok(img) => p.resource = ImageResource::Ready(Arc::new(img)),
                    Err(e) => {
                        tracing::warn!("Dropping pasted image {} from session file: {}", p.id, e);
                        continue;
                    }
                }
            }
            restored.push(op);
        }
        self.start_document(base);
        if let Some(doc) = self.document.as_mut() {
            for op in restored {
                doc.history.append(op);
            }
            doc.recomposite();
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            self.file_name = stem.to_string();
        }
        self.enforce_history_limit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::history::ShapeOp;
    use image::Rgba;

    fn png(w: u32, h: u32, px: [u8; 4]) -> Vec<u8> {
        io::encode_png(&RgbaImage::from_pixel(w, h, Rgba(px))).unwrap()
    }

    fn session_with(w: u32, h: u32) -> EditorSession {
        let mut s = EditorSession::default();
        let bytes = png(w, h, [255, 255, 255, 255]);
        s.capture(&mut move || -> Result<Vec<u8>> { Ok(bytes.clone()) })
            .unwrap();
        s
    }

    fn line_op() -> Annotation {
        Annotation::Line(ShapeOp {
            start: Point::new(0.0, 5.0),
            end: Point::new(20.0, 5.0),
            color: [0, 0, 0, 255],
            stroke_width: 2.0,
        })
    }

    #[test]
    fn failed_capture_keeps_previous_document() {
        let mut s = session_with(10, 10);
        s.push_operation(line_op()).unwrap();
        let err = s
            .capture(&mut || -> Result<Vec<u8>> { Err(EditorError::Capture("tab not capturable".into())) })
            .unwrap_err();
        assert!(matches!(err, EditorError::Capture(_)));
        assert_eq!(s.operations().len(), 1);
        let err = s
            .capture(&mut || -> Result<Vec<u8>> { Ok(b"garbage".to_vec()) })
            .unwrap_err();
        assert!(matches!(err, EditorError::Capture(_)));
        assert_eq!(s.document().unwrap().width(), 10);
    }

    #[test]
    fn capture_names_file_with_timestamp() {
        let s = session_with(4, 4);
        assert!(s.file_name().starts_with("screenshot-"));
        assert!(!s.file_name().contains(':'));
    }

    #[test]
    fn declined_confirmations_change_nothing() {
        let mut s = session_with(30, 30);
        s.push_operation(line_op()).unwrap();
        assert!(matches!(s.clear_all(&mut |_: &str| false), Err(EditorError::Cancelled)));
        assert!(matches!(s.cancel(&mut |_: &str| false), Err(EditorError::Cancelled)));
        assert_eq!(s.operations().len(), 1);
        s.clear_all(&mut |m: &str| m == CONFIRM_CLEAR).unwrap();
        assert!(s.operations().is_empty());
    }

    #[test]
    fn cancel_of_empty_session_needs_no_confirmation() {
        let mut s = session_with(30, 30);
        s.cancel(&mut |_: &str| -> bool { panic!("should not ask") })
            .unwrap();
        assert!(!s.is_editing());
    }

    #[test]
    fn failed_export_keeps_state_successful_export_resets() {
        let mut s = session_with(30, 30);
        s.push_operation(line_op()).unwrap();
        let mut failing = |_: &[u8], _: &str, _: bool| -> Result<String> {
            Err(EditorError::Export("disk full".into()))
        };
        assert!(s.export(&mut failing, true).is_err());
        assert_eq!(s.operations().len(), 1);

        let mut seen = String::new();
        let mut ok = |bytes: &[u8], path: &str, _: bool| -> Result<String> {
            assert!(io::decode_image(bytes).is_ok());
            seen = path.to_string();
            Ok("42".to_string())
        };
        assert_eq!(s.export(&mut ok, true).unwrap(), "42");
        assert!(seen.starts_with("screenshots/screenshot-"));
        assert!(seen.ends_with(".png"));
        assert!(!s.is_editing());
    }

    #[test]
    fn stale_decodes_are_dropped_after_crop() {
        let mut s = session_with(100, 100);
        let id = s.paste(&PastePayload::image("image/png", png(20, 20, [0, 0, 255, 255]))).unwrap();
        assert!(id.is_some());
        s.select_and_apply(SelectionPurpose::Crop, RegionRect::new(0.0, 0.0, 50.0, 50.0))
            .unwrap();
        assert_eq!(s.wait_for_decodes(Duration::from_secs(10)), 0);
        assert!(s.operations().is_empty());
        assert_eq!(s.document().unwrap().width(), 50);
    }

    #[test]
    fn failed_paste_decode_adds_nothing() {
        let mut s = session_with(50, 50);
        assert!(s.paste(&PastePayload::image("image/png", b"nope".to_vec())).is_err());
        assert!(s.operations().is_empty());
        assert_eq!(s.paste(&PastePayload::image("text/plain", b"x".to_vec())).unwrap(), None);
    }

    #[test]
    fn history_limit_flattens() {
        let mut settings = EditorSettings::default();
        settings.max_history = 2;
        let mut s = EditorSession::new(settings);
        s.load_image(RgbaImage::from_pixel(30, 30, Rgba([255, 255, 255, 255])));
        for _ in 0..3 {
            s.push_operation(line_op()).unwrap();
        }
        assert!(s.operations().is_empty());
        let doc = s.document().unwrap();
        assert_eq!(doc.surface.base(), doc.surface.pixels());
        assert_eq!(doc.surface.base().get_pixel(10, 5).0, [0, 0, 0, 255]);
    }

    #[test]
    fn default_folder_is_persisted() {
        let mut store = crate::preferences::MemoryPreferences::new();
        let mut s = EditorSession::default();
        s.set_default_folder("work", &mut store).unwrap();
        assert_eq!(EditorSettings::load(&store).unwrap().default_folder, "work");
    }
}
