use chrono::{DateTime, Utc};
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};

use crate::components::history::Annotation;
use crate::error::{EditorError, Result};
use crate::preferences::DEFAULT_FOLDER;

/// File stem used when the user clears the name field.
pub const DEFAULT_FILE_STEM: &str = "screenshot";

// ============================================================================
// EXTERNAL COLLABORATORS
// ============================================================================

/// Yields the initial screenshot as encoded (PNG) bytes.
pub trait ImageSource {
    fn capture(&mut self) -> Result<Vec<u8>>;
}

impl<F> ImageSource for F
where
    F: FnMut() -> Result<Vec<u8>>,
{
    fn capture(&mut self) -> Result<Vec<u8>> {
        self()
    }
}

/// Reads the "capture" from an image file on disk (headless mode).
#[derive(Debug, Clone)]
pub struct FileImageSource {
    pub path: PathBuf,
}

impl FileImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ImageSource for FileImageSource {
    fn capture(&mut self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| EditorError::Capture(format!("{}: {}", self.path.display(), e)))
    }
}

/// Accepts final image bytes plus a suggested relative path
/// (`{folder}/{filename}.png`). Returns an identifier for the saved item.
pub trait ExportSink {
    fn save(&mut self, bytes: &[u8], suggested_path: &str, prompt_user: bool) -> Result<String>;
}

impl<F> ExportSink for F
where
    F: FnMut(&[u8], &str, bool) -> Result<String>,
{
    fn save(&mut self, bytes: &[u8], suggested_path: &str, prompt_user: bool) -> Result<String> {
        self(bytes, suggested_path, prompt_user)
    }
}

/// Writes exports under a root directory. The returned id is the full path.
#[derive(Debug, Clone)]
pub struct FileExportSink {
    root: PathBuf,
    /// Exact output file, overriding the suggested path.
    exact: Option<PathBuf>,
}

impl FileExportSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exact: None,
        }
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            root: PathBuf::from("."),
            exact: Some(path.into()),
        }
    }
}

impl ExportSink for FileExportSink {
    fn save(&mut self, bytes: &[u8], suggested_path: &str, prompt_user: bool) -> Result<String> {
        if prompt_user {
            tracing::debug!("File sink has no save dialog; writing {}", suggested_path);
        }
        let path = self
            .exact
            .clone()
            .unwrap_or_else(|| self.root.join(suggested_path));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EditorError::Export(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(&path, bytes).map_err(|e| EditorError::Export(format!("{}: {}", path.display(), e)))?;
        Ok(path.display().to_string())
    }
}

// ============================================================================
// NAMING
// ============================================================================

/// `screenshot-YYYY-MM-DDTHH-MM-SS` (UTC, ':' and '.' replaced, seconds precision).
pub fn default_file_name(now: DateTime<Utc>) -> String {
    format!("{}-{}", DEFAULT_FILE_STEM, now.format("%Y-%m-%dT%H-%M-%S"))
}

/// `{folder}/{filename}.png`, with blank parts replaced by their defaults.
pub fn export_path(folder: &str, file_name: &str) -> String {
    let folder = match folder.trim() {
        "" => DEFAULT_FOLDER,
        f => f,
    };
    let file_name = match file_name.trim() {
        "" => DEFAULT_FILE_STEM,
        f => f,
    };
    format!("{folder}/{file_name}.png")
}

// ============================================================================
// ENCODE / DECODE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg { quality: u8 },
    Bmp,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg { .. } => "jpg",
            ExportFormat::Bmp => "bmp",
        }
    }
}

pub fn encode_image(img: &RgbaImage, format: ExportFormat) -> Result<Vec<u8>> {
    let (w, h) = img.dimensions();
    let mut buf = Vec::new();
    match format {
        ExportFormat::Png => {
            PngEncoder::new(&mut buf).write_image(img.as_raw(), w, h, ColorType::Rgba8)?;
        }
        ExportFormat::Jpeg { quality } => {
            // JPEG has no alpha channel.
            let rgb = image::DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                w,
                h,
                ColorType::Rgb8,
            )?;
        }
        ExportFormat::Bmp => {
            BmpEncoder::new(&mut buf).write_image(img.as_raw(), w, h, ColorType::Rgba8)?;
        }
    }
    Ok(buf)
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    encode_image(img, ExportFormat::Png)
}

/// Decode any supported format to RGBA.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| EditorError::Decode(e.to_string()))
}

/// Read only the header to get the dimensions.
pub fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| EditorError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| EditorError::Decode(e.to_string()))
}

// ============================================================================
// SESSION PROJECT FILE (.smk)
// ============================================================================

const SMK_MAGIC_V1: &str = "SMK1";
/// Maximum supported canvas dimension in pixels (per axis).
const MAX_CANVAS_DIM: u32 = 32_768;

#[derive(Serialize, Deserialize)]
struct ProjectFileV1 {
    magic: String,
    width: u32,
    height: u32,
    base_png: Vec<u8>,
    operations: Vec<Annotation>,
}

/// Serialize the base image and operation list.
pub fn save_project(base: &RgbaImage, operations: &[Annotation], path: &Path) -> Result<()> {
    let project = ProjectFileV1 {
        magic: SMK_MAGIC_V1.to_string(),
        width: base.width(),
        height: base.height(),
        base_png: encode_png(base)?,
        operations: operations.to_vec(),
    };
    let file = File::create(path).map_err(|e| EditorError::io(path, e))?;
    bincode::serialize_into(BufWriter::new(file), &project)?;
    tracing::info!("Saved session file {} ({} ops)", path.display(), operations.len());
    Ok(())
}

/// Load a session file. Pasted images come back undecoded.
pub fn load_project(path: &Path) -> Result<(RgbaImage, Vec<Annotation>)> {
    let raw = std::fs::read(path).map_err(|e| EditorError::io(path, e))?;
    // bincode writes a String as an 8-byte length then the UTF-8 bytes.
    if raw.len() < 12 {
        return Err(EditorError::Project("file too small".into()));
    }
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != SMK_MAGIC_V1 {
        return Err(EditorError::Project(format!("unknown magic '{}'", magic)));
    }
    let project: ProjectFileV1 = bincode::deserialize(&raw)?;
    if project.width == 0 || project.height == 0 {
        return Err(EditorError::Project("canvas dimensions cannot be zero".into()));
    }
    if project.width > MAX_CANVAS_DIM || project.height > MAX_CANVAS_DIM {
        return Err(EditorError::Project(format!(
            "canvas size {}x{} exceeds maximum {}x{}",
            project.width, project.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    let base = decode_image(&project.base_png).map_err(|e| EditorError::Project(e.to_string()))?;
    if base.dimensions() != (project.width, project.height) {
        return Err(EditorError::Project("base image size does not match header".into()));
    }
    Ok((base, project.operations))
}
