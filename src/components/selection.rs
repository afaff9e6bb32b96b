use crate::canvas::{Point, RegionRect};
use crate::error::{EditorError, Result};

/// Pointer distance (px) from an edge that grabs it for resizing.
pub const EDGE_TOLERANCE: f32 = 10.0;

/// What a committed selection is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionPurpose {
    /// Replaces the base image; operations are discarded.
    Crop,
    /// Appends a color-filter operation over the rect.
    Filter,
}

/// One of the eight resize handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handle {
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

impl Handle {
    fn from_sides(horizontal: Option<Side>, vertical: Option<Side>) -> Option<Handle> {
        use Side::*;
        match (horizontal, vertical) {
            (None, None) => None,
            (Some(Low), None) => Some(Handle::West),
            (Some(High), None) => Some(Handle::East),
            (None, Some(Low)) => Some(Handle::North),
            (None, Some(High)) => Some(Handle::South),
            (Some(Low), Some(Low)) => Some(Handle::NorthWest),
            (Some(High), Some(Low)) => Some(Handle::NorthEast),
            (Some(Low), Some(High)) => Some(Handle::SouthWest),
            (Some(High), Some(High)) => Some(Handle::SouthEast),
        }
    }

    fn sides(self) -> (Option<Side>, Option<Side>) {
        use Side::*;
        match self {
            Handle::West => (Some(Low), None),
            Handle::East => (Some(High), None),
            Handle::North => (None, Some(Low)),
            Handle::South => (None, Some(High)),
            Handle::NorthWest => (Some(Low), Some(Low)),
            Handle::NorthEast => (Some(High), Some(Low)),
            Handle::SouthWest => (Some(Low), Some(High)),
            Handle::SouthEast => (Some(High), Some(High)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Low,
    High,
}

impl Side {
    fn flipped(self) -> Side {
        match self {
            Side::Low => Side::High,
            Side::High => Side::Low,
        }
    }
}

/// Current pointer interaction with the selector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DragMode {
    Idle,
    Creating { anchor: Point },
    Resizing(Handle),
    Moving,
}

/// What a pointer-down at some point would start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitZone {
    Handle(Handle),
    Inside,
    Outside,
}

// ============================================================================
// REGION SELECTOR
// ============================================================================

/// Draggable rectangle with edge/corner handles, shared by crop and filter.
///
/// `idle → creating → active → {resizing | moving | idle}`; "active" is a
/// present rect with no drag in progress.
#[derive(Clone, Debug)]
pub struct RegionSelector {
    purpose: SelectionPurpose,
    min_size: f32,
    bound_w: f32,
    bound_h: f32,
    rect: Option<RegionRect>,
    mode: DragMode,
    last: Point,
}

impl RegionSelector {
    pub fn new(purpose: SelectionPurpose, min_size: f32, bound_w: f32, bound_h: f32) -> Self {
        Self {
            purpose,
            min_size,
            bound_w,
            bound_h,
            rect: None,
            mode: DragMode::Idle,
            last: Point::default(),
        }
    }

    pub fn purpose(&self) -> SelectionPurpose {
        self.purpose
    }

    pub fn min_size(&self) -> f32 {
        self.min_size
    }

    pub fn rect(&self) -> Option<RegionRect> {
        self.rect
    }

    pub fn mode(&self) -> DragMode {
        self.mode
    }

    pub fn is_dragging(&self) -> bool {
        self.mode != DragMode::Idle
    }

    /// New canvas dimensions (after a crop or capture). Drops any selection.
    pub fn reset_bounds(&mut self, bound_w: f32, bound_h: f32) {
        self.bound_w = bound_w;
        self.bound_h = bound_h;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.rect = None;
        self.mode = DragMode::Idle;
    }

    /// Programmatic selection (scripts); normalized and clamped like a drag.
    pub fn set_rect(&mut self, rect: RegionRect) {
        self.rect = Some(rect.normalized().clamped(self.bound_w, self.bound_h));
        self.mode = DragMode::Idle;
    }

    pub fn hit_test(&self, p: Point) -> HitZone {
        let Some(r) = self.rect.map(RegionRect::normalized) else {
            return HitZone::Outside;
        };
        if !r.contains(p) {
            return HitZone::Outside;
        }
        let horizontal = nearest_side(p.x - r.x, r.right() - p.x);
        let vertical = nearest_side(p.y - r.y, r.bottom() - p.y);
        match Handle::from_sides(horizontal, vertical) {
            Some(h) => HitZone::Handle(h),
            None => HitZone::Inside,
        }
    }

    pub fn pointer_down(&mut self, p: Point) {
        let p = self.clamp_point(p);
        self.last = p;
        self.mode = match self.hit_test(p) {
            HitZone::Handle(h) => DragMode::Resizing(h),
            HitZone::Inside => DragMode::Moving,
            HitZone::Outside => {
                self.rect = Some(RegionRect::new(p.x, p.y, 0.0, 0.0));
                DragMode::Creating { anchor: p }
            }
        };
    }

    pub fn pointer_move(&mut self, p: Point) {
        let Some(rect) = self.rect else {
            return;
        };
        let p = self.clamp_point(p);
        let (dx, dy) = (p.x - self.last.x, p.y - self.last.y);
        self.last = p;

        let next = match self.mode {
            DragMode::Idle => return,
            DragMode::Creating { anchor } => RegionRect::new(anchor.x, anchor.y, p.x - anchor.x, p.y - anchor.y),
            DragMode::Moving => {
                let mut r = rect;
                r.x = (r.x + dx).clamp(0.0, (self.bound_w - r.width).max(0.0));
                r.y = (r.y + dy).clamp(0.0, (self.bound_h - r.height).max(0.0));
                r
            }
            DragMode::Resizing(handle) => {
                let (r, flipped) = resize_edges(rect, handle, dx, dy);
                self.mode = DragMode::Resizing(flipped);
                r
            }
        };
        self.rect = Some(next.normalized().clamped(self.bound_w, self.bound_h));
    }

    /// Finish the drag. The rect is normalized and clamped once more; one
    /// smaller than the minimum is kept but reported as a warning.
    pub fn pointer_up(&mut self, p: Point) -> Result<RegionRect> {
        if self.is_dragging() {
            self.pointer_move(p);
        }
        self.mode = DragMode::Idle;
        let rect = self.rect.ok_or(EditorError::NoSelection)?;
        let rect = rect.normalized().clamped(self.bound_w, self.bound_h);
        self.rect = Some(rect);
        self.validate(rect)
    }

    /// Take the selection for committing. On success the selector is cleared;
    /// a too-small selection is left in place.
    pub fn commit(&mut self) -> Result<RegionRect> {
        let rect = self.rect.ok_or(EditorError::NoSelection)?;
        let rect = self.validate(rect)?;
        self.clear();
        Ok(rect)
    }

    fn validate(&self, rect: RegionRect) -> Result<RegionRect> {
        if rect.width < self.min_size || rect.height < self.min_size {
            tracing::warn!(
                "{:?} selection {}x{} below minimum {}",
                self.purpose,
                rect.width,
                rect.height,
                self.min_size
            );
            return Err(EditorError::SelectionTooSmall {
                width: rect.width,
                height: rect.height,
                min_width: self.min_size,
                min_height: self.min_size,
            });
        }
        Ok(rect)
    }

    fn clamp_point(&self, p: Point) -> Point {
        Point::new(p.x.clamp(0.0, self.bound_w), p.y.clamp(0.0, self.bound_h))
    }
}

/// Which side (if any) is within tolerance, preferring the nearer one when
/// the rect is narrow enough that both qualify.
fn nearest_side(to_low: f32, to_high: f32) -> Option<Side> {
    let low = to_low <= EDGE_TOLERANCE;
    let high = to_high <= EDGE_TOLERANCE;
    match (low, high) {
        (true, true) if to_high < to_low => Some(Side::High),
        (true, _) => Some(Side::Low),
        (false, true) => Some(Side::High),
        (false, false) => None,
    }
}

/// Move only the dragged edge(s) by the pointer delta. When an edge crosses
/// its opposite the handle switches sides so the drag keeps following it.
fn resize_edges(r: RegionRect, handle: Handle, dx: f32, dy: f32) -> (RegionRect, Handle) {
    let (mut horizontal, mut vertical) = handle.sides();
    let mut out = r;
    match horizontal {
        Some(Side::Low) => {
            out.x += dx;
            out.width -= dx;
        }
        Some(Side::High) => out.width += dx,
        None => {}
    }
    match vertical {
        Some(Side::Low) => {
            out.y += dy;
            out.height -= dy;
        }
        Some(Side::High) => out.height += dy,
        None => {}
    }
    if out.width < 0.0 {
        horizontal = horizontal.map(Side::flipped);
    }
    if out.height < 0.0 {
        vertical = vertical.map(Side::flipped);
    }
    let next = Handle::from_sides(horizontal, vertical).unwrap_or(handle);
    (out, next)
}
