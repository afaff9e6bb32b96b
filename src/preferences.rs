// ============================================================================
// PREFERENCES: small key/value settings store
// ============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::canvas::{Color, color_to_hex, parse_hex_color};
use crate::error::{EditorError, Result};
use crate::ops::adjustments::FilterMode;
use crate::ops::effects::DEFAULT_BLOCK_SIZE;

pub const KEY_DEFAULT_FOLDER: &str = "defaultFolder";
pub const KEY_WINDOW_HEIGHT: &str = "windowHeight";
pub const KEY_STROKE_WIDTH: &str = "strokeWidth";
pub const KEY_COLOR: &str = "color";
pub const KEY_BLUR_BLOCK_SIZE: &str = "blurBlockSize";
pub const KEY_FILTER_MODE: &str = "filterMode";
pub const KEY_MAX_HISTORY: &str = "maxHistory";

pub const DEFAULT_FOLDER: &str = "screenshots";

/// Key/value settings persistence.
pub trait PreferenceStore: Send {
    /// Values for the requested keys; missing keys are simply absent.
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, String>>;
    /// Merge `values` into the store.
    fn set(&mut self, values: &HashMap<String, String>) -> Result<()>;
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        Ok(keys
            .iter()
            .filter_map(|k| self.values.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&mut self, values: &HashMap<String, String>) -> Result<()> {
        for (k, v) in values {
            self.values.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

/// `key=value` line file. Unknown keys are preserved on rewrite.
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config location.
    pub fn open_default() -> Option<Self> {
        settings_path().map(Self::new)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(EditorError::io(&self.path, e)),
        };
        let mut map = BTreeMap::new();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            map.insert(key.trim().to_string(), val.trim().to_string());
        }
        Ok(map)
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let all = self.read_all()?;
        Ok(keys
            .iter()
            .filter_map(|k| all.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&mut self, values: &HashMap<String, String>) -> Result<()> {
        let mut all = self.read_all()?;
        for (k, v) in values {
            all.insert(k.clone(), v.replace('\n', " "));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EditorError::io(parent, e))?;
        }
        let content: String = all.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
        std::fs::write(&self.path, content).map_err(|e| EditorError::io(&self.path, e))
    }
}

/// Platform config file location.
pub fn settings_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok()?;
        return Some(PathBuf::from(appdata).join("ShotMark").join("shotmark_settings.cfg"));
    }
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").ok()?;
        return Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("ShotMark")
                .join("shotmark_settings.cfg"),
        );
    }
    #[allow(unreachable_code)]
    {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
            .ok()?;
        Some(config_dir.join("shotmark").join("shotmark_settings.cfg"))
    }
}

// ============================================================================
// EDITOR SETTINGS: typed view over the store
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub default_folder: String,
    /// `None` means "full viewport" (first run).
    pub window_height: Option<u32>,
    pub stroke_width: f32,
    pub color: Color,
    pub blur_block_size: u32,
    pub filter_mode: FilterMode,
    pub max_history: usize,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            default_folder: DEFAULT_FOLDER.to_string(),
            window_height: None,
            stroke_width: 3.0,
            color: [255, 0, 0, 255],
            blur_block_size: DEFAULT_BLOCK_SIZE,
            filter_mode: FilterMode::Grayscale,
            max_history: 100,
        }
    }
}

impl EditorSettings {
    const KEYS: [&'static str; 7] = [
        KEY_DEFAULT_FOLDER,
        KEY_WINDOW_HEIGHT,
        KEY_STROKE_WIDTH,
        KEY_COLOR,
        KEY_BLUR_BLOCK_SIZE,
        KEY_FILTER_MODE,
        KEY_MAX_HISTORY,
    ];

    /// Read settings; malformed or missing values keep their defaults.
    pub fn load(store: &dyn PreferenceStore) -> Result<Self> {
        let values = store.get(&Self::KEYS)?;
        let mut s = Self::default();
        for (key, val) in &values {
            let val = val.trim();
            match key.as_str() {
                KEY_DEFAULT_FOLDER if !val.is_empty() => s.default_folder = val.to_string(),
                KEY_WINDOW_HEIGHT => s.window_height = val.parse().ok(),
                KEY_STROKE_WIDTH => {
                    if let Ok(v) = val.parse::<f32>()
                        && v.is_finite()
                        && v > 0.0
                    {
                        s.stroke_width = v;
                    }
                }
                KEY_COLOR => {
                    if let Some(c) = parse_hex_color(val) {
                        s.color = c;
                    }
                }
                KEY_BLUR_BLOCK_SIZE => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.blur_block_size = v.max(1);
                    }
                }
                KEY_FILTER_MODE => s.filter_mode = FilterMode::from_name(val),
                KEY_MAX_HISTORY => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_history = v.max(1);
                    }
                }
                _ => {}
            }
        }
        Ok(s)
    }

    pub fn save(&self, store: &mut dyn PreferenceStore) -> Result<()> {
        let mut values = HashMap::new();
        values.insert(KEY_DEFAULT_FOLDER.to_string(), self.default_folder.clone());
        if let Some(h) = self.window_height {
            values.insert(KEY_WINDOW_HEIGHT.to_string(), h.to_string());
        }
        values.insert(KEY_STROKE_WIDTH.to_string(), self.stroke_width.to_string());
        values.insert(KEY_COLOR.to_string(), color_to_hex(self.color));
        values.insert(KEY_BLUR_BLOCK_SIZE.to_string(), self.blur_block_size.to_string());
        values.insert(KEY_FILTER_MODE.to_string(), self.filter_mode.name().to_string());
        values.insert(KEY_MAX_HISTORY.to_string(), self.max_history.to_string());
        store.set(&values)
    }

    /// Window height to use given the current viewport height.
    pub fn effective_window_height(&self, viewport_height: u32) -> u32 {
        self.window_height.unwrap_or(viewport_height)
    }
}
