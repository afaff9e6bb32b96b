use image::RgbaImage;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;
use uuid::Uuid;

use crate::canvas::RegionRect;
use crate::error::Result;

/// A pasted image is scaled to fit within this fraction of the canvas.
pub const PASTE_MAX_FRACTION: f32 = 0.6;

// ---------------------------------------------------------------------------
//  Paste payloads
// ---------------------------------------------------------------------------

/// One clipboard item as offered by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct PasteItem {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl PasteItem {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime.trim().to_ascii_lowercase().starts_with("image/")
    }
}

/// Everything a single paste event carried.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PastePayload {
    pub items: Vec<PasteItem>,
}

impl PastePayload {
    pub fn new(items: Vec<PasteItem>) -> Self {
        Self { items }
    }

    pub fn image(mime: &str, bytes: Vec<u8>) -> Self {
        Self::new(vec![PasteItem::new(mime, bytes)])
    }

    /// Only the first image item counts; everything else is ignored.
    pub fn first_image(&self) -> Option<&PasteItem> {
        self.items.iter().find(|item| item.is_image())
    }
}

// ---------------------------------------------------------------------------
//  System clipboard (arboard)
// ---------------------------------------------------------------------------

/// Read an image from the OS clipboard as a paste payload.
/// Raw bitmap data is re-encoded as PNG; a text item naming an image file
/// is read from disk. Returns `None` when no image is available.
pub fn read_system_clipboard() -> Option<PastePayload> {
    let mut clip = match arboard::Clipboard::new() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Clipboard unavailable: {}", e);
            return None;
        }
    };

    if let Ok(img_data) = clip.get_image()
        && let Some(img) = RgbaImage::from_raw(
            img_data.width as u32,
            img_data.height as u32,
            img_data.bytes.into_owned(),
        )
    {
        match crate::io::encode_png(&img) {
            Ok(bytes) => return Some(PastePayload::image("image/png", bytes)),
            Err(e) => tracing::warn!("Failed to re-encode clipboard image: {}", e),
        }
    }

    if let Ok(text) = clip.get_text() {
        let path = std::path::Path::new(text.trim());
        if path.is_file()
            && let Some(mime) = mime_for_path(path)
            && let Ok(bytes) = std::fs::read(path)
        {
            return Some(PastePayload::image(mime, bytes));
        }
    }

    None
}

/// Image MIME type by file extension.
pub fn mime_for_path(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
//  Placement
// ---------------------------------------------------------------------------

/// Fit an `iw × ih` image within 60 % of the canvas in both axes, never
/// upscaling, aspect preserved, centered.
pub fn fit_placement(iw: u32, ih: u32, cw: u32, ch: u32) -> RegionRect {
    if iw == 0 || ih == 0 {
        return RegionRect::new(cw as f32 / 2.0, ch as f32 / 2.0, 0.0, 0.0);
    }
    let max_w = cw as f32 * PASTE_MAX_FRACTION;
    let max_h = ch as f32 * PASTE_MAX_FRACTION;
    let scale = (max_w / iw as f32).min(max_h / ih as f32).min(1.0);
    let w = iw as f32 * scale;
    let h = ih as f32 * scale;
    RegionRect::new((cw as f32 - w) / 2.0, (ch as f32 - h) / 2.0, w, h)
}

// ---------------------------------------------------------------------------
//  Off-thread decoding
// ---------------------------------------------------------------------------

/// A finished decode, tagged with the document epoch it was started for.
#[derive(Debug)]
pub struct DecodeResult {
    pub id: Uuid,
    pub epoch: u64,
    pub image: Result<RgbaImage>,
}

/// Decodes pasted images on the rayon pool and hands results back over a
/// channel to the single-threaded session.
pub struct DecodeQueue {
    tx: Sender<DecodeResult>,
    rx: Receiver<DecodeResult>,
    in_flight: usize,
}

impl Default for DecodeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx, in_flight: 0 }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Start decoding `bytes`. The worker owns its copy.
    pub fn submit(&mut self, id: Uuid, epoch: u64, bytes: Vec<u8>) {
        let tx = self.tx.clone();
        self.in_flight += 1;
        rayon::spawn(move || {
            let image = crate::io::decode_image(&bytes);
            // Receiver gone means the session was dropped.
            let _ = tx.send(DecodeResult { id, epoch, image });
        });
    }

    /// Everything finished so far, without blocking.
    pub fn drain(&mut self) -> Vec<DecodeResult> {
        let done: Vec<DecodeResult> = self.rx.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(done.len());
        done
    }

    /// Block until one result arrives or `timeout` elapses.
    pub fn wait_one(&mut self, timeout: Duration) -> Option<DecodeResult> {
        if self.in_flight == 0 {
            return None;
        }
        let r = self.rx.recv_timeout(timeout).ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(r)
    }
}
