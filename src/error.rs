// ============================================================================
// ERRORS: one error type for every fallible editor operation
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

use crate::ops::scripting::ScriptError;

/// Everything that can go wrong while editing a screenshot.
///
/// Variants follow the user-facing failure categories: capture failures abort
/// entry, too-small selections are rejected but kept, decode failures are only
/// logged by callers, export failures keep the session intact for a retry.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("screenshot capture failed: {0}")]
    Capture(String),

    #[error("selection {width}x{height} is smaller than the minimum {min_width}x{min_height}")]
    SelectionTooSmall {
        width: f32,
        height: f32,
        min_width: f32,
        min_height: f32,
    },

    #[error("no active selection to apply")]
    NoSelection,

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("no screenshot is loaded")]
    NoDocument,

    #[error("text annotation is empty")]
    EmptyText,

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("invalid session file: {0}")]
    Project(String),

    #[error("preferences error: {0}")]
    Preferences(String),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}

impl EditorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EditorError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures the user should see as a warning and simply retry.
    pub fn is_user_warning(&self) -> bool {
        matches!(
            self,
            EditorError::SelectionTooSmall { .. } | EditorError::NoSelection | EditorError::EmptyText
        )
    }
}

impl From<Box<bincode::ErrorKind>> for EditorError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        EditorError::Project(e.to_string())
    }
}

pub type Result<T, E = EditorError> = std::result::Result<T, E>;
