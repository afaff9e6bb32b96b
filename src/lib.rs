//! ShotMark: screenshot annotation engine.
//!
//! A captured screenshot becomes a [`canvas::CanvasDocument`]: an immutable
//! base image plus an ordered list of [`components::history::Annotation`]s
//! that the [`compositor::Compositor`] replays on every change. The
//! [`session::EditorSession`] ties the document to the tool state machine,
//! region selectors, clipboard decoding, preferences and export.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::large_enum_variant)]

pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod preferences;
pub mod session;

pub use canvas::{CanvasDocument, Color, Point, RasterSurface, RegionRect};
pub use components::history::{Annotation, AnnotationHistory};
pub use components::selection::{RegionSelector, SelectionPurpose};
pub use components::tools::{PointerOutcome, Tool, ToolState};
pub use error::{EditorError, Result};
pub use session::EditorSession;
