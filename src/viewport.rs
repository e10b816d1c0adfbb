//! Brush geometry and the visible time range
//!
//! The overview chart spans the whole retention window. A brush laid over it
//! selects the part shown in the detail chart. Pointer gestures on the brush
//! are handled by [`DragState`], a three-state machine whose transitions are
//! pure functions of the current brush and the pointer event.
//!
//! All geometry is in track units (terminal columns here), as `f64` so
//! rescaling and proportional mapping do not accumulate rounding.

use chrono::{DateTime, Duration, Utc};

use crate::store;

/// Default smallest brush width, in columns
pub const MIN_BRUSH_WIDTH: f64 = 3.0;
/// How close to an edge a press must land to grab the resize handle
pub const HANDLE_TOLERANCE: f64 = 1.0;

const EPSILON: f64 = 1e-9;

/// A closed time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

impl Viewport {
    pub fn new(min: DateTime<Utc>, max: DateTime<Utc>) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// The range `[now - retention, now]`
    pub fn trailing(now: DateTime<Utc>, retention: Duration) -> Self {
        let min = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(min, now)
    }

    pub fn span(&self) -> Duration {
        self.max - self.min
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.min <= t && t <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brush {
    pub offset: f64,
    pub width: f64,
}

impl Brush {
    pub fn new(offset: f64, width: f64) -> Self {
        Self { offset, width }
    }

    pub fn right(&self) -> f64 {
        self.offset + self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
}

/// What a pointer press on the brush grabbed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Move,
    Resize(Edge),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { x: f64, gesture: Gesture },
    Move { x: f64 },
    Up,
}

/// The strip the brush slides along
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub width: f64,
    pub min_brush_width: f64,
}

impl Track {
    pub fn new(width: f64) -> Self {
        Self {
            width: width.max(0.0),
            min_brush_width: MIN_BRUSH_WIDTH,
        }
    }

    pub fn with_min_brush_width(mut self, min: f64) -> Self {
        self.min_brush_width = min.max(0.0);
        self
    }

    /// Smallest width a brush may have on this track
    pub fn min_width(&self) -> f64 {
        self.min_brush_width.min(self.width)
    }

    pub fn full(&self) -> Brush {
        Brush::new(0.0, self.width)
    }

    /// Force a brush inside the track and above the minimum width
    pub fn clamp(&self, brush: Brush) -> Brush {
        let width = if brush.width.is_finite() {
            brush.width.clamp(self.min_width(), self.width)
        } else {
            self.width
        };
        let offset = if brush.offset.is_finite() {
            brush.offset.clamp(0.0, self.width - width)
        } else {
            0.0
        };
        Brush { offset, width }
    }

    /// Slide `start` by `dx`, keeping its width
    pub fn moved(&self, start: Brush, dx: f64) -> Brush {
        let offset = (start.offset + dx).clamp(0.0, (self.width - start.width).max(0.0));
        self.clamp(Brush::new(offset, start.width))
    }

    /// Drag the left edge of `start` by `dx`. When the width hits the floor
    /// the right edge stays put.
    pub fn resized_left(&self, start: Brush, dx: f64) -> Brush {
        let min = self.min_width();
        let mut offset = start.offset + dx;
        let mut width = start.width - dx;
        if offset < 0.0 {
            width += offset;
            offset = 0.0;
        }
        if width < min {
            width = min;
            offset = (start.right() - min).max(0.0);
        }
        self.clamp(Brush::new(offset, width))
    }

    /// Drag the right edge of `start` by `dx`
    pub fn resized_right(&self, start: Brush, dx: f64) -> Brush {
        let mut width = start.width + dx;
        if start.offset + width > self.width {
            width = self.width - start.offset;
        }
        if width < self.min_width() {
            width = self.min_width();
        }
        self.clamp(Brush::new(start.offset, width))
    }
}

/// Pointer gesture state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging { origin_x: f64, start: Brush },
    Resizing { edge: Edge, origin_x: f64, start: Brush },
}

impl DragState {
    pub fn is_active(&self) -> bool {
        !matches!(self, DragState::Idle)
    }

    /// Advance the state machine by one pointer event
    pub fn apply(self, brush: Brush, event: PointerEvent, track: Track) -> (DragState, Brush) {
        match (self, event) {
            (_, PointerEvent::Down { x, gesture }) => {
                let state = match gesture {
                    Gesture::Move => DragState::Dragging {
                        origin_x: x,
                        start: brush,
                    },
                    Gesture::Resize(edge) => DragState::Resizing {
                        edge,
                        origin_x: x,
                        start: brush,
                    },
                };
                (state, brush)
            }
            (DragState::Dragging { origin_x, start }, PointerEvent::Move { x }) => {
                (self, track.moved(start, x - origin_x))
            }
            (DragState::Resizing { edge, origin_x, start }, PointerEvent::Move { x }) => {
                let dx = x - origin_x;
                let brush = match edge {
                    Edge::Left => track.resized_left(start, dx),
                    Edge::Right => track.resized_right(start, dx),
                };
                (self, brush)
            }
            (DragState::Idle, PointerEvent::Move { .. }) => (self, brush),
            (_, PointerEvent::Up) => (DragState::Idle, brush),
        }
    }
}

/// Keyboard adjustments, each a complete gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nudge {
    PanLeft,
    PanRight,
    Grow,
    Shrink,
}

/// Owns the overview window, the brush and the gesture in progress
#[derive(Debug, Clone)]
pub struct ViewportController {
    window: Viewport,
    retention: Duration,
    track: Track,
    brush: Brush,
    drag: DragState,
}

impl ViewportController {
    pub fn new(retention_hours: u32, track: Track, now: DateTime<Utc>) -> Self {
        let retention = store::retention_span(retention_hours);
        Self {
            window: Viewport::trailing(now, retention),
            retention,
            track,
            brush: track.full(),
            drag: DragState::Idle,
        }
    }

    /// Back to the full retention window with a full-width brush
    pub fn reset(&mut self, retention_hours: u32, now: DateTime<Utc>) {
        self.retention = store::retention_span(retention_hours);
        self.window = Viewport::trailing(now, self.retention);
        self.brush = self.track.full();
        self.drag = DragState::Idle;
    }

    /// Resize the track, scaling the brush with it
    pub fn set_track_width(&mut self, width: f64) {
        let width = width.max(0.0);
        if (width - self.track.width).abs() < EPSILON {
            return;
        }
        let was_full = self.is_full();
        let old = self.track.width;
        self.track.width = width;
        self.brush = if was_full || old <= EPSILON {
            self.track.full()
        } else {
            let scale = width / old;
            self.track
                .clamp(Brush::new(self.brush.offset * scale, self.brush.width * scale))
        };
        // A gesture in flight has stale origin coordinates
        self.drag = DragState::Idle;
    }

    /// What a press at `x` would grab, if anything
    pub fn hit_test(&self, x: f64) -> Option<Gesture> {
        let left = self.brush.offset;
        let right = self.brush.right();
        if (x - left).abs() <= HANDLE_TOLERANCE {
            Some(Gesture::Resize(Edge::Left))
        } else if (x - right).abs() <= HANDLE_TOLERANCE {
            Some(Gesture::Resize(Edge::Right))
        } else if x > left && x < right {
            Some(Gesture::Move)
        } else {
            None
        }
    }

    /// Start a gesture at `x`. Returns false if `x` misses the brush.
    pub fn on_drag_start(&mut self, x: f64) -> bool {
        let Some(gesture) = self.hit_test(x) else {
            return false;
        };
        self.step(PointerEvent::Down { x, gesture });
        true
    }

    pub fn on_drag_move(&mut self, x: f64) {
        self.step(PointerEvent::Move { x });
    }

    /// Finish the gesture. Returns true if one was active, meaning derived
    /// views should be recomputed.
    pub fn on_drag_end(&mut self) -> bool {
        let was_active = self.drag.is_active();
        self.step(PointerEvent::Up);
        was_active
    }

    fn step(&mut self, event: PointerEvent) {
        let (drag, brush) = self.drag.apply(self.brush, event, self.track);
        self.drag = drag;
        self.brush = brush;
    }

    pub fn nudge(&mut self, nudge: Nudge, step: f64) -> bool {
        if self.drag.is_active() {
            return false;
        }
        let before = self.brush;
        let b = self.brush;
        self.brush = match nudge {
            Nudge::PanLeft => self.track.moved(b, -step),
            Nudge::PanRight => self.track.moved(b, step),
            Nudge::Grow => self
                .track
                .resized_right(self.track.resized_left(b, -step), step),
            Nudge::Shrink => {
                let width = (b.width - 2.0 * step).max(self.track.min_width());
                let centre = b.offset + b.width / 2.0;
                self.track.clamp(Brush::new(centre - width / 2.0, width))
            }
        };
        self.brush != before
    }

    /// Keep a full-width, idle brush trailing `now`. Returns true if the
    /// window moved.
    pub fn follow(&mut self, now: DateTime<Utc>) -> bool {
        if self.drag.is_active() || !self.is_full() {
            return false;
        }
        let window = Viewport::trailing(now, self.retention);
        let moved = window != self.window;
        self.window = window;
        moved
    }

    pub fn is_full(&self) -> bool {
        self.brush.offset <= EPSILON && self.brush.width >= self.track.width - EPSILON
    }

    /// The time range selected by the brush
    pub fn current_viewport(&self) -> Viewport {
        let window = self.window;
        if self.track.width <= EPSILON {
            return window;
        }
        let span_ms = window.span().num_milliseconds() as f64;
        let at = |px: f64| {
            if px <= EPSILON {
                window.min
            } else if px >= self.track.width - EPSILON {
                window.max
            } else {
                let ms = (px / self.track.width * span_ms).round() as i64;
                window.min + Duration::milliseconds(ms)
            }
        };
        Viewport::new(at(self.brush.offset), at(self.brush.right()))
    }

    pub fn window(&self) -> Viewport {
        self.window
    }

    pub fn brush(&self) -> Brush {
        self.brush
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn drag_state(&self) -> DragState {
        self.drag
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn controller() -> ViewportController {
        ViewportController::new(48, Track::new(100.0), now())
    }

    #[test]
    fn test_reset_state() {
        let c = controller();
        assert_eq!(c.brush(), Brush::new(0.0, 100.0));
        assert_eq!(c.current_viewport(), Viewport::new(now() - Duration::hours(48), now()));
        assert_eq!(c.drag_state(), DragState::Idle);
    }

    #[test]
    fn test_move_fully_right_ends_at_now() {
        let mut c = controller();
        // Shrink to a quarter of the track from the left
        assert!(c.on_drag_start(0.5));
        c.on_drag_move(75.5);
        assert!(c.on_drag_end());
        assert_eq!(c.brush(), Brush::new(75.0, 25.0));

        // Then drag it back to the left and all the way right again
        assert!(c.on_drag_start(87.0));
        c.on_drag_move(0.0);
        assert_eq!(c.brush().offset, 0.0);
        c.on_drag_move(500.0);
        c.on_drag_end();

        let span = Duration::hours(48);
        let viewport = c.current_viewport();
        assert_eq!(viewport.max, now());
        assert_eq!(viewport.min, now() - span / 4);
    }

    #[test]
    fn test_left_resize_clamps_at_zero() {
        let track = Track::new(100.0);
        let start = Brush::new(10.0, 30.0);
        let (state, _) = DragState::Idle.apply(
            start,
            PointerEvent::Down {
                x: 10.0,
                gesture: Gesture::Resize(Edge::Left),
            },
            track,
        );
        let (_, brush) = state.apply(start, PointerEvent::Move { x: -50.0 }, track);
        assert_eq!(brush, Brush::new(0.0, 40.0));
    }

    #[test]
    fn test_left_resize_respects_minimum() {
        let track = Track::new(100.0);
        let start = Brush::new(10.0, 30.0);
        let brush = track.resized_left(start, 60.0);
        assert_eq!(brush.width, MIN_BRUSH_WIDTH);
        assert_eq!(brush.right(), 40.0);
        assert!(brush.offset >= 0.0);
    }

    #[test]
    fn test_right_resize_stays_in_track() {
        let track = Track::new(100.0);
        let start = Brush::new(60.0, 20.0);
        assert_eq!(track.resized_right(start, 500.0), Brush::new(60.0, 40.0));
        assert_eq!(track.resized_right(start, -500.0), Brush::new(60.0, MIN_BRUSH_WIDTH));

        // Floor wins over the track edge, then the brush is pulled back in
        let tight = Brush::new(99.0, 1.0);
        let brush = track.resized_right(tight, 0.0);
        assert!(brush.right() <= 100.0);
        assert!(brush.width >= MIN_BRUSH_WIDTH);
    }

    #[test]
    fn test_minimum_is_capped_by_track() {
        let track = Track::new(2.0);
        let brush = track.clamp(Brush::new(5.0, 0.0));
        assert_eq!(brush, Brush::new(0.0, 2.0));
    }

    #[test]
    fn test_hit_test() {
        let mut c = controller();
        c.nudge(Nudge::Shrink, 30.0);
        let b = c.brush();
        assert_eq!(b, Brush::new(30.0, 40.0));

        assert_eq!(c.hit_test(30.5), Some(Gesture::Resize(Edge::Left)));
        assert_eq!(c.hit_test(69.5), Some(Gesture::Resize(Edge::Right)));
        assert_eq!(c.hit_test(50.0), Some(Gesture::Move));
        assert_eq!(c.hit_test(10.0), None);
        assert!(!c.on_drag_start(10.0));
        assert!(!c.on_drag_end());
    }

    #[test]
    fn test_move_without_gesture_is_ignored() {
        let mut c = controller();
        c.on_drag_move(40.0);
        assert_eq!(c.brush(), Brush::new(0.0, 100.0));
    }

    #[test]
    fn test_viewport_tracks_intermediate_moves() {
        let mut c = controller();
        c.nudge(Nudge::Shrink, 25.0);
        c.on_drag_start(50.0);
        c.on_drag_move(40.0);
        let viewport = c.current_viewport();
        assert_eq!(viewport.min, now() - Duration::hours(48) + Duration::hours(48) * 15 / 100);
        assert!(c.drag_state().is_active());
    }

    #[test]
    fn test_track_resize_scales_brush() {
        let mut c = controller();
        c.nudge(Nudge::Shrink, 25.0);
        c.set_track_width(200.0);
        assert_eq!(c.brush(), Brush::new(50.0, 100.0));

        let mut full = controller();
        full.set_track_width(57.0);
        assert!(full.is_full());
    }

    #[test]
    fn test_follow_only_when_full_and_idle() {
        let mut c = controller();
        let later = now() + Duration::minutes(5);
        assert!(c.follow(later));
        assert_eq!(c.window().max, later);

        c.nudge(Nudge::PanLeft, 1.0);
        c.nudge(Nudge::Shrink, 10.0);
        assert!(!c.follow(later + Duration::minutes(5)));
        assert_eq!(c.window().max, later);
    }

    #[test]
    fn test_nudges_stay_in_track() {
        let mut c = controller();
        assert!(!c.nudge(Nudge::PanLeft, 5.0));
        assert!(!c.nudge(Nudge::Grow, 5.0));
        for _ in 0..100 {
            c.nudge(Nudge::Shrink, 5.0);
        }
        assert_eq!(c.brush().width, MIN_BRUSH_WIDTH);
        for _ in 0..100 {
            c.nudge(Nudge::PanRight, 5.0);
        }
        assert_eq!(c.brush().right(), 100.0);
    }

    #[test]
    fn test_oversized_retention_is_clamped() {
        let c = ViewportController::new(u32::MAX, Track::new(100.0), now());
        assert_eq!(c.retention(), store::retention_span(store::MAX_RETENTION_HOURS));
        assert_eq!(c.window().max, now());
        let earliest = DateTime::<Utc>::MIN_UTC;
        assert_eq!(Viewport::trailing(earliest, Duration::hours(1)).min, earliest);
    }
}
