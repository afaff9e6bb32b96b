use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::canvas::{Color, Point, RegionRect};
use crate::ops::adjustments::FilterMode;
use crate::ops::text::{HeadingLevel, TextStyle};

// ============================================================================
// ANNOTATION OPERATIONS
// ============================================================================

/// Discriminant of an [`Annotation`], for logging and dispatch tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    Arrow,
    Line,
    Marker,
    Rectangle,
    Ellipse,
    Highlight,
    Text,
    Heading,
    PixelBlur,
    ColorFilter,
    PastedImage,
}

impl AnnotationKind {
    pub fn name(self) -> &'static str {
        match self {
            AnnotationKind::Arrow => "arrow",
            AnnotationKind::Line => "line",
            AnnotationKind::Marker => "marker-stroke",
            AnnotationKind::Rectangle => "rectangle",
            AnnotationKind::Ellipse => "ellipse",
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Text => "text",
            AnnotationKind::Heading => "heading",
            AnnotationKind::PixelBlur => "pixel-blur",
            AnnotationKind::ColorFilter => "color-filter",
            AnnotationKind::PastedImage => "pasted-image",
        }
    }
}

/// Two-point vector shape (arrow, line, rectangle, ellipse, highlight).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeOp {
    pub start: Point,
    pub end: Point,
    pub color: Color,
    pub stroke_width: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerOp {
    pub points: Vec<Point>,
    pub color: Color,
    pub stroke_width: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextOp {
    pub anchor: Point,
    pub content: String,
    pub style: TextStyle,
    pub color: Color,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadingOp {
    pub anchor: Point,
    pub content: String,
    pub level: HeadingLevel,
    pub style: TextStyle,
    pub color: Color,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlurOp {
    pub rect: RegionRect,
    pub block_size: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterOp {
    pub rect: RegionRect,
    pub mode: FilterMode,
}

/// Decoded state of a pasted image. Not serialized; rebuilt from `bytes`.
#[derive(Clone, Debug, Default)]
pub enum ImageResource {
    #[default]
    Pending,
    Ready(Arc<RgbaImage>),
}

impl PartialEq for ImageResource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ImageResource::Pending, ImageResource::Pending) => true,
            (ImageResource::Ready(a), ImageResource::Ready(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

/// An embedded raster scaled into `placement`. `bytes` holds the encoded
/// source so the op can be re-decoded after a project load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PastedImageOp {
    pub id: Uuid,
    pub placement: RegionRect,
    pub bytes: Vec<u8>,
    #[serde(skip)]
    pub resource: ImageResource,
}

impl PastedImageOp {
    pub fn new(placement: RegionRect, bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            placement,
            bytes,
            resource: ImageResource::Pending,
        }
    }
}

/// One replayable edit. List order is paint order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Annotation {
    Arrow(ShapeOp),
    Line(ShapeOp),
    Rectangle(ShapeOp),
    Ellipse(ShapeOp),
    Highlight(ShapeOp),
    Marker(MarkerOp),
    Text(TextOp),
    Heading(HeadingOp),
    PixelBlur(BlurOp),
    ColorFilter(FilterOp),
    PastedImage(PastedImageOp),
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::Arrow(_) => AnnotationKind::Arrow,
            Annotation::Line(_) => AnnotationKind::Line,
            Annotation::Rectangle(_) => AnnotationKind::Rectangle,
            Annotation::Ellipse(_) => AnnotationKind::Ellipse,
            Annotation::Highlight(_) => AnnotationKind::Highlight,
            Annotation::Marker(_) => AnnotationKind::Marker,
            Annotation::Text(_) => AnnotationKind::Text,
            Annotation::Heading(_) => AnnotationKind::Heading,
            Annotation::PixelBlur(_) => AnnotationKind::PixelBlur,
            Annotation::ColorFilter(_) => AnnotationKind::ColorFilter,
            Annotation::PastedImage(_) => AnnotationKind::PastedImage,
        }
    }

    /// Drawing color; region and image ops have none.
    pub fn color(&self) -> Option<Color> {
        match self {
            Annotation::Arrow(s)
            | Annotation::Line(s)
            | Annotation::Rectangle(s)
            | Annotation::Ellipse(s)
            | Annotation::Highlight(s) => Some(s.color),
            Annotation::Marker(m) => Some(m.color),
            Annotation::Text(t) => Some(t.color),
            Annotation::Heading(h) => Some(h.color),
            Annotation::PixelBlur(_) | Annotation::ColorFilter(_) | Annotation::PastedImage(_) => None,
        }
    }

    pub fn stroke_width(&self) -> Option<f32> {
        match self {
            Annotation::Arrow(s)
            | Annotation::Line(s)
            | Annotation::Rectangle(s)
            | Annotation::Ellipse(s)
            | Annotation::Highlight(s) => Some(s.stroke_width),
            Annotation::Marker(m) => Some(m.stroke_width),
            _ => None,
        }
    }

    /// Rough heap footprint, reported when the history is flattened.
    pub fn memory_size(&self) -> usize {
        let heap = match self {
            Annotation::Marker(m) => m.points.len() * std::mem::size_of::<Point>(),
            Annotation::Text(t) => t.content.len() + t.style.family.len(),
            Annotation::Heading(h) => h.content.len() + h.style.family.len(),
            Annotation::PastedImage(p) => {
                p.bytes.len()
                    + match &p.resource {
                        ImageResource::Ready(img) => img.as_raw().len(),
                        ImageResource::Pending => 0,
                    }
            }
            _ => 0,
        };
        std::mem::size_of::<Annotation>() + heap
    }
}

// ============================================================================
// ANNOTATION HISTORY: ordered, append-only operation list
// ============================================================================

/// Linear edit list. Undo removes the last entry; there is no redo.
#[derive(Clone, Debug, Default)]
pub struct AnnotationHistory {
    ops: Vec<Annotation>,
    max_len: usize,
}

impl AnnotationHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            ops: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    pub fn append(&mut self, op: Annotation) {
        tracing::debug!("Append {} (#{})", op.kind().name(), self.ops.len() + 1);
        self.ops.push(op);
    }

    /// Drop the most recent op. No-op when empty.
    pub fn remove_last(&mut self) -> Option<Annotation> {
        self.ops.pop()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn list(&self) -> &[Annotation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// True once the list holds more ops than the configured limit.
    pub fn over_limit(&self) -> bool {
        self.ops.len() > self.max_len
    }

    /// Sum of [`Annotation::memory_size`] over the list.
    pub fn memory_usage(&self) -> usize {
        self.ops.iter().map(Annotation::memory_size).sum()
    }

    pub fn pasted_mut(&mut self, id: Uuid) -> Option<&mut PastedImageOp> {
        self.ops.iter_mut().find_map(|op| match op {
            Annotation::PastedImage(p) if p.id == id => Some(p),
            _ => None,
        })
    }

    /// Remove the pasted image with `id`. Returns whether one was found.
    pub fn remove_pasted(&mut self, id: Uuid) -> bool {
        let before = self.ops.len();
        self.ops
            .retain(|op| !matches!(op, Annotation::PastedImage(p) if p.id == id));
        self.ops.len() != before
    }

    /// Topmost pasted image under `p` (reverse paint order).
    pub fn pasted_at(&self, p: Point) -> Option<Uuid> {
        self.ops.iter().rev().find_map(|op| match op {
            Annotation::PastedImage(img) if img.placement.contains(p) => Some(img.id),
            _ => None,
        })
    }
}
