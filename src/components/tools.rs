use uuid::Uuid;

use crate::canvas::{CanvasDocument, Color, Point, RegionRect};
use crate::components::history::{
    Annotation, AnnotationKind, BlurOp, HeadingOp, MarkerOp, ShapeOp, TextOp,
};
use crate::components::selection::SelectionPurpose;
use crate::error::{EditorError, Result};
use crate::ops::adjustments::FilterMode;
use crate::ops::text::{DEFAULT_TEXT_FAMILY, HeadingLevel, TEXT_SIZE_PER_STROKE, TextStyle};
use crate::preferences::EditorSettings;

/// Minimum drag distance (px) for a two-point shape to be kept.
pub const MIN_SHAPE_DRAG: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Arrow,
    Line,
    Rectangle,
    Ellipse,
    Highlight,
    Marker,
    Text,
    Heading,
    Crop,
    Filter,
    Blur,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[
            Tool::Arrow,
            Tool::Line,
            Tool::Rectangle,
            Tool::Ellipse,
            Tool::Highlight,
            Tool::Marker,
            Tool::Text,
            Tool::Heading,
            Tool::Crop,
            Tool::Filter,
            Tool::Blur,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Tool::Arrow => "arrow",
            Tool::Line => "line",
            Tool::Rectangle => "rectangle",
            Tool::Ellipse => "ellipse",
            Tool::Highlight => "highlight",
            Tool::Marker => "marker",
            Tool::Text => "text",
            Tool::Heading => "heading",
            Tool::Crop => "crop",
            Tool::Filter => "filter",
            Tool::Blur => "blur",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::all().iter().copied().find(|t| t.name() == name)
    }

    /// Tools that open a text entry instead of starting a drag.
    pub fn is_text_entry(self) -> bool {
        matches!(self, Tool::Text | Tool::Heading)
    }
}

/// Settings shared by all drawing tools.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolProperties {
    pub color: Color,
    pub stroke_width: f32,
    pub filter_mode: FilterMode,
    pub blur_block_size: u32,
    pub heading_level: HeadingLevel,
    pub heading_family: String,
    /// Explicit text size; `None` derives it from the stroke width.
    pub font_size: Option<f32>,
}

impl Default for ToolProperties {
    fn default() -> Self {
        Self::from_settings(&EditorSettings::default())
    }
}

impl ToolProperties {
    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self {
            color: settings.color,
            stroke_width: settings.stroke_width,
            filter_mode: settings.filter_mode,
            blur_block_size: settings.blur_block_size,
            heading_level: HeadingLevel::H1,
            heading_family: DEFAULT_TEXT_FAMILY.to_string(),
            font_size: None,
        }
    }

    pub fn text_style(&self) -> TextStyle {
        TextStyle::body(self.font_size.unwrap_or(self.stroke_width * TEXT_SIZE_PER_STROKE))
    }

    pub fn heading_style(&self) -> TextStyle {
        TextStyle::heading(self.heading_level, &self.heading_family)
    }
}

/// In-progress pointer interaction.
#[derive(Clone, Debug, Default, PartialEq)]
enum Gesture {
    #[default]
    None,
    Shape { start: Point, current: Point },
    Marker { points: Vec<Point> },
    ImageDrag { id: Uuid, last: Point },
    Selecting(SelectionPurpose),
}

/// What the host should do after a pointer event.
#[derive(Clone, Debug, PartialEq)]
pub enum PointerOutcome {
    /// Nothing changed.
    None,
    /// The displayed image changed (preview, selection guide, drag).
    Redraw,
    /// Show an inline text field at `anchor`; submit through the session.
    TextEntryRequested { anchor: Point, tool: Tool },
    /// An operation was appended to the history.
    Committed(AnnotationKind),
    /// A crop/filter selection was released at a valid size and awaits apply.
    SelectionReady { purpose: SelectionPurpose, rect: RegionRect },
    /// User-facing warning; state otherwise unchanged.
    Warning(String),
}

// ============================================================================
// TOOL STATE: active tool + pointer routing
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct ToolState {
    pub active: Tool,
    pub props: ToolProperties,
    gesture: Gesture,
}

impl ToolState {
    pub fn new(props: ToolProperties) -> Self {
        Self {
            active: Tool::default(),
            props,
            gesture: Gesture::None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gesture != Gesture::None
    }

    /// Switch tools, abandoning any gesture in progress.
    pub fn set_tool(&mut self, doc: Option<&mut CanvasDocument>, tool: Tool) {
        if let Some(doc) = doc {
            if self.is_busy() {
                doc.recomposite();
            }
            if tool != Tool::Crop {
                doc.crop.clear();
            }
            if tool != Tool::Filter {
                doc.filter.clear();
            }
        }
        self.gesture = Gesture::None;
        self.active = tool;
    }

    /// Abandon the current gesture without committing.
    pub fn reset_gesture(&mut self) {
        self.gesture = Gesture::None;
    }

    pub fn pointer_down(&mut self, doc: &mut CanvasDocument, p: Point) -> PointerOutcome {
        match self.active {
            Tool::Crop => {
                doc.crop.pointer_down(p);
                self.gesture = Gesture::Selecting(SelectionPurpose::Crop);
                return PointerOutcome::Redraw;
            }
            Tool::Filter => {
                doc.filter.pointer_down(p);
                self.gesture = Gesture::Selecting(SelectionPurpose::Filter);
                return PointerOutcome::Redraw;
            }
            _ => {}
        }
        if let Some(id) = doc.history.pasted_at(p) {
            self.gesture = Gesture::ImageDrag { id, last: p };
            return PointerOutcome::None;
        }
        if self.active.is_text_entry() {
            return PointerOutcome::TextEntryRequested {
                anchor: p,
                tool: self.active,
            };
        }
        self.gesture = if self.active == Tool::Marker {
            Gesture::Marker { points: vec![p] }
        } else {
            Gesture::Shape { start: p, current: p }
        };
        if let Some(op) = self.preview_op() {
            doc.recomposite_with_preview(&op);
        }
        PointerOutcome::Redraw
    }

    pub fn pointer_move(&mut self, doc: &mut CanvasDocument, p: Point) -> PointerOutcome {
        match &mut self.gesture {
            Gesture::None => return PointerOutcome::None,
            Gesture::Selecting(purpose) => {
                selector_for(doc, *purpose).pointer_move(p);
                return PointerOutcome::Redraw;
            }
            Gesture::ImageDrag { id, last } => {
                let (dx, dy) = (p.x - last.x, p.y - last.y);
                *last = p;
                if let Some(img) = doc.history.pasted_mut(*id) {
                    img.placement.x += dx;
                    img.placement.y += dy;
                }
                doc.recomposite();
                return PointerOutcome::Redraw;
            }
            Gesture::Shape { current, .. } => *current = p,
            Gesture::Marker { points } => points.push(p),
        }
        if let Some(op) = self.preview_op() {
            doc.recomposite_with_preview(&op);
        }
        PointerOutcome::Redraw
    }

    pub fn pointer_up(&mut self, doc: &mut CanvasDocument, p: Point) -> PointerOutcome {
        self.finalize(doc, p)
    }

    /// Leaving the canvas finishes the gesture exactly like a release.
    pub fn pointer_leave(&mut self, doc: &mut CanvasDocument, p: Point) -> PointerOutcome {
        self.finalize(doc, p)
    }

    fn finalize(&mut self, doc: &mut CanvasDocument, p: Point) -> PointerOutcome {
        match std::mem::take(&mut self.gesture) {
            Gesture::None => PointerOutcome::None,
            Gesture::Selecting(purpose) => match selector_for(doc, purpose).pointer_up(p) {
                Ok(rect) => PointerOutcome::SelectionReady { purpose, rect },
                Err(e) => PointerOutcome::Warning(e.to_string()),
            },
            Gesture::ImageDrag { .. } => {
                doc.recomposite();
                PointerOutcome::Redraw
            }
            mut gesture => {
                match &mut gesture {
                    Gesture::Shape { current, .. } => *current = p,
                    Gesture::Marker { points } => {
                        if points.last() != Some(&p) {
                            points.push(p);
                        }
                    }
                    _ => {}
                }
                self.gesture = gesture;
                let op = self.preview_op();
                self.gesture = Gesture::None;
                match op.filter(is_meaningful) {
                    Some(op) => {
                        let kind = op.kind();
                        doc.history.append(op);
                        doc.recomposite();
                        PointerOutcome::Committed(kind)
                    }
                    None => {
                        doc.recomposite();
                        PointerOutcome::Redraw
                    }
                }
            }
        }
    }

    /// Operation the current gesture would commit.
    fn preview_op(&self) -> Option<Annotation> {
        let props = &self.props;
        match &self.gesture {
            Gesture::Marker { points } => Some(Annotation::Marker(MarkerOp {
                points: points.clone(),
                color: props.color,
                stroke_width: props.stroke_width,
            })),
            Gesture::Shape { start, current } => {
                let shape = ShapeOp {
                    start: *start,
                    end: *current,
                    color: props.color,
                    stroke_width: props.stroke_width,
                };
                match self.active {
                    Tool::Arrow => Some(Annotation::Arrow(shape)),
                    Tool::Line => Some(Annotation::Line(shape)),
                    Tool::Rectangle => Some(Annotation::Rectangle(shape)),
                    Tool::Ellipse => Some(Annotation::Ellipse(shape)),
                    Tool::Highlight => Some(Annotation::Highlight(shape)),
                    Tool::Blur => Some(Annotation::PixelBlur(BlurOp {
                        rect: RegionRect::from_corners(*start, *current),
                        block_size: props.blur_block_size.max(1),
                    })),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Build the op for submitted text. Blank text is rejected.
    pub fn text_op(&self, tool: Tool, anchor: Point, content: &str) -> Result<Annotation> {
        if content.trim().is_empty() {
            return Err(EditorError::EmptyText);
        }
        let color = self.props.color;
        Ok(match tool {
            Tool::Heading => Annotation::Heading(HeadingOp {
                anchor,
                content: content.to_string(),
                level: self.props.heading_level,
                style: self.props.heading_style(),
                color,
            }),
            _ => Annotation::Text(TextOp {
                anchor,
                content: content.to_string(),
                style: self.props.text_style(),
                color,
            }),
        })
    }
}

fn selector_for(
    doc: &mut CanvasDocument,
    purpose: SelectionPurpose,
) -> &mut crate::components::selection::RegionSelector {
    match purpose {
        SelectionPurpose::Crop => &mut doc.crop,
        SelectionPurpose::Filter => &mut doc.filter,
    }
}

/// Degenerate drags (a click with no movement) are dropped.
fn is_meaningful(op: &Annotation) -> bool {
    match op {
        Annotation::Arrow(s)
        | Annotation::Line(s)
        | Annotation::Rectangle(s)
        | Annotation::Ellipse(s)
        | Annotation::Highlight(s) => s.start.distance(s.end) >= MIN_SHAPE_DRAG,
        Annotation::PixelBlur(b) => !b.rect.is_empty(),
        Annotation::Marker(m) => !m.points.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::history::PastedImageOp;
    use image::{Rgba, RgbaImage};

    fn doc() -> CanvasDocument {
        CanvasDocument::new(RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255])), 100, 0)
    }

    #[test]
    fn shape_drag_commits_on_release() {
        let mut d = doc();
        let mut t = ToolState::new(ToolProperties::default());
        t.active = Tool::Rectangle;
        assert_eq!(t.pointer_down(&mut d, Point::new(10.0, 10.0)), PointerOutcome::Redraw);
        t.pointer_move(&mut d, Point::new(40.0, 40.0));
        assert!(d.history.is_empty());
        let out = t.pointer_up(&mut d, Point::new(50.0, 50.0));
        assert_eq!(out, PointerOutcome::Committed(AnnotationKind::Rectangle));
        assert_eq!(d.history.len(), 1);
        match &d.history.list()[0] {
            Annotation::Rectangle(s) => assert_eq!(s.end, Point::new(50.0, 50.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn preview_does_not_touch_history() {
        let mut d = doc();
        let mut t = ToolState::new(ToolProperties::default());
        t.active = Tool::Line;
        t.pointer_down(&mut d, Point::new(0.0, 50.0));
        t.pointer_move(&mut d, Point::new(90.0, 50.0));
        assert!(d.history.is_empty());
        assert_ne!(d.surface.pixels(), d.surface.base());
    }

    #[test]
    fn pointer_leave_finalizes_like_release() {
        let mut d = doc();
        let mut t = ToolState::new(ToolProperties::default());
        t.active = Tool::Marker;
        t.pointer_down(&mut d, Point::new(10.0, 10.0));
        t.pointer_move(&mut d, Point::new(20.0, 15.0));
        let out = t.pointer_leave(&mut d, Point::new(30.0, 20.0));
        assert_eq!(out, PointerOutcome::Committed(AnnotationKind::Marker));
        assert!(!t.is_busy());
    }

    #[test]
    fn click_without_drag_is_dropped() {
        let mut d = doc();
        let mut t = ToolState::new(ToolProperties::default());
        t.active = Tool::Arrow;
        t.pointer_down(&mut d, Point::new(10.0, 10.0));
        assert_eq!(t.pointer_up(&mut d, Point::new(10.0, 10.0)), PointerOutcome::Redraw);
        assert!(d.history.is_empty());
        assert_eq!(d.surface.pixels(), d.surface.base());
    }

    #[test]
    fn text_tool_requests_entry() {
        let mut d = doc();
        let mut t = ToolState::new(ToolProperties::default());
        t.active = Tool::Text;
        let out = t.pointer_down(&mut d, Point::new(5.0, 6.0));
        assert_eq!(
            out,
            PointerOutcome::TextEntryRequested { anchor: Point::new(5.0, 6.0), tool: Tool::Text }
        );
        assert!(matches!(t.text_op(Tool::Text, Point::new(5.0, 6.0), "   "), Err(EditorError::EmptyText)));
        match t.text_op(Tool::Text, Point::new(5.0, 6.0), "hi").unwrap() {
            Annotation::Text(op) => assert_eq!(op.style.size, 24.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pasted_image_drag_takes_priority_over_shapes() {
        let mut d = doc();
        let img = PastedImageOp::new(RegionRect::new(10.0, 10.0, 20.0, 20.0), Vec::new());
        let id = img.id;
        d.history.append(Annotation::PastedImage(img));
        let mut t = ToolState::new(ToolProperties::default());
        t.active = Tool::Rectangle;
        t.pointer_down(&mut d, Point::new(15.0, 15.0));
        t.pointer_move(&mut d, Point::new(25.0, 20.0));
        t.pointer_up(&mut d, Point::new(25.0, 20.0));
        assert_eq!(d.history.len(), 1);
        let placed = d.history.pasted_mut(id).unwrap().placement;
        assert_eq!((placed.x, placed.y), (20.0, 15.0));
    }

    #[test]
    fn crop_tool_intercepts_before_image_hit_test() {
        let mut d = doc();
        d.history.append(Annotation::PastedImage(PastedImageOp::new(
            RegionRect::new(0.0, 0.0, 100.0, 100.0),
            Vec::new(),
        )));
        let mut t = ToolState::new(ToolProperties::default());
        t.set_tool(Some(&mut d), Tool::Crop);
        t.pointer_down(&mut d, Point::new(10.0, 10.0));
        let out = t.pointer_up(&mut d, Point::new(60.0, 70.0));
        assert_eq!(
            out,
            PointerOutcome::SelectionReady {
                purpose: SelectionPurpose::Crop,
                rect: RegionRect::new(10.0, 10.0, 50.0, 60.0)
            }
        );
    }

    #[test]
    fn small_filter_region_warns() {
        let mut d = doc();
        let mut t = ToolState::new(ToolProperties::default());
        t.set_tool(Some(&mut d), Tool::Filter);
        t.pointer_down(&mut d, Point::new(10.0, 10.0));
        let out = t.pointer_up(&mut d, Point::new(10.5, 40.0));
        assert!(matches!(out, PointerOutcome::Warning(_)));
        assert!(d.filter.rect().is_some());
    }
}
