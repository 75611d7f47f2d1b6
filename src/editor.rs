// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Pointer-driven curve editing.
//!
//! A press near a point starts a gesture, drags move the point inside a
//! draft copy of the curve, and nothing reaches the [`CurveStore`] until an
//! explicit commit. While dragging, a point's temperature is kept strictly
//! between its neighbours so the draft never breaks temperature ordering.
//! Speed ordering is only checked when the draft is committed.

use crate::curve::{self, ControlPoint, Curve, CurveError, MAX_PERCENT, MIN_PERCENT};
use crate::store::{Accepted, CurveStore};
use std::sync::Arc;

/// Default pick distance, in screen units.
pub const DEFAULT_PICK_TOLERANCE: f64 = 5.0;

/// A position in screen coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
}

impl Pointer {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance(self, other: Pointer) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

// ---------------------------------------------------------------------------
// Viewport
// ---------------------------------------------------------------------------

/// Maps the chart's data space onto a screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub temp_range: (f64, f64),
    pub speed_range: (f64, f64),
}

impl Viewport {
    /// Chart limits: a little headroom around the 0-100 range.
    pub const TEMP_RANGE: (f64, f64) = (-5.0, 105.0);
    pub const SPEED_RANGE: (f64, f64) = (0.0, 105.0);

    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width: width.max(1.0),
            height: height.max(1.0),
            temp_range: Self::TEMP_RANGE,
            speed_range: Self::SPEED_RANGE,
        }
    }

    pub fn to_screen(&self, point: ControlPoint) -> Pointer {
        let (t0, t1) = self.temp_range;
        let (s0, s1) = self.speed_range;
        let fx = (f64::from(point.temperature()) - t0) / (t1 - t0);
        let fy = (f64::from(point.speed()) - s0) / (s1 - s0);
        Pointer {
            x: self.left + fx * self.width,
            y: self.top + (1.0 - fy) * self.height,
        }
    }

    /// Data-space `(temperature, speed)` under a screen position. Not clamped.
    pub fn to_data(&self, pointer: Pointer) -> (f64, f64) {
        let (t0, t1) = self.temp_range;
        let (s0, s1) = self.speed_range;
        let fx = (pointer.x - self.left) / self.width;
        let fy = (pointer.y - self.top) / self.height;
        (t0 + fx * (t1 - t0), s1 - fy * (s1 - s0))
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 800.0, 600.0)
    }
}

// ---------------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------------

/// The point grabbed by an active drag gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointHandle {
    index: usize,
}

impl PointHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy)]
struct Gesture {
    handle: PointHandle,
    origin: ControlPoint,
}

/// Interactive editor over a draft copy of the store's curve.
pub struct CurveEditor {
    store: Arc<CurveStore>,
    viewport: Viewport,
    tolerance: f64,
    draft: Option<Curve>,
    gesture: Option<Gesture>,
}

impl CurveEditor {
    pub fn new(store: Arc<CurveStore>, viewport: Viewport) -> Self {
        Self {
            store,
            viewport,
            tolerance: DEFAULT_PICK_TOLERANCE,
            draft: None,
            gesture: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// The curve to show: the draft if one is pending, else the store's curve.
    pub fn displayed(&self) -> Curve {
        match &self.draft {
            Some(draft) => draft.clone(),
            None => self.store.curve(),
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.gesture.is_some()
    }

    pub fn active_handle(&self) -> Option<PointHandle> {
        self.gesture.map(|g| g.handle)
    }

    /// True if the draft differs from the store's curve.
    pub fn has_pending_changes(&self) -> bool {
        self.draft
            .as_ref()
            .is_some_and(|draft| *draft != self.store.curve())
    }

    /// Grab the point nearest to `pointer`, if one lies within the pick
    /// tolerance. Starts a draft from the store's curve if none is pending.
    pub fn begin_drag(&mut self, pointer: Pointer) -> Option<PointHandle> {
        if let Some(previous) = self.gesture.take() {
            log::debug!("Drag on point {} superseded", previous.handle.index);
        }

        let shown = self.displayed();
        let mut best: Option<(usize, f64)> = None;
        for (index, point) in shown.points().iter().enumerate() {
            let distance = self.viewport.to_screen(*point).distance(pointer);
            if distance > self.tolerance {
                continue;
            }
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }

        let (index, _) = best?;
        let origin = shown.get(index)?;
        if self.draft.is_none() {
            self.draft = Some(shown);
        }

        let handle = PointHandle { index };
        self.gesture = Some(Gesture { handle, origin });
        log::trace!("Drag started on point {index}");
        Some(handle)
    }

    /// Move the grabbed point toward `pointer`.
    ///
    /// The temperature is held strictly between the neighbouring points
    /// (and within 0-100 at the ends); the speed is only clamped to 0-100.
    /// Does nothing unless `handle` is the active gesture.
    pub fn update_drag(&mut self, handle: PointHandle, pointer: Pointer) {
        let Some(gesture) = self.gesture else {
            return;
        };
        if gesture.handle != handle {
            return;
        }
        let Some(draft) = self.draft.as_mut() else {
            return;
        };

        let index = handle.index;
        let Some(current) = draft.get(index) else {
            return;
        };
        let (temp, speed) = self.viewport.to_data(pointer);
        let points = draft.points();

        let lo = match index.checked_sub(1).and_then(|i| points.get(i)) {
            Some(left) => left.temperature().saturating_add(1),
            None => MIN_PERCENT,
        };
        let hi = match points.get(index + 1) {
            Some(right) => right.temperature().saturating_sub(1),
            None => MAX_PERCENT,
        };

        let temperature = if lo <= hi {
            curve::clamp_percent_f64(temp).clamp(lo, hi)
        } else {
            current.temperature()
        };
        let speed = curve::clamp_percent_f64(speed);

        draft.replace(
            index,
            ControlPoint::new(i64::from(temperature), i64::from(speed)),
        );
    }

    /// Release the grabbed point. The draft stays pending until committed.
    pub fn end_drag(&mut self, handle: PointHandle) {
        if self.gesture.is_some_and(|g| g.handle == handle) {
            self.gesture = None;
        }
    }

    /// Abort the active gesture, putting the grabbed point back where it was.
    pub fn cancel_drag(&mut self) {
        let Some(gesture) = self.gesture.take() else {
            return;
        };
        if let Some(draft) = self.draft.as_mut() {
            draft.replace(gesture.handle.index, gesture.origin);
        }
        if !self.has_pending_changes() {
            self.draft = None;
        }
    }

    /// Replace the draft wholesale, e.g. with a curve read from a file.
    pub fn load_draft(&mut self, curve: Curve) {
        self.gesture = None;
        self.draft = Some(curve);
    }

    /// Drop the draft and show the store's curve again.
    pub fn revert(&mut self) {
        self.gesture = None;
        self.draft = None;
    }

    /// Submit the displayed curve straight to the store.
    pub fn commit(&mut self) -> Result<Accepted, CurveError> {
        let store = self.store.clone();
        self.commit_with(|candidate| store.try_set_curve(candidate))
    }

    /// Hand a snapshot of the displayed curve to `apply`.
    ///
    /// On success the draft is discarded. On rejection it is kept so the
    /// caller can decide what to show; call [`CurveEditor::revert`] to fall
    /// back to the last accepted curve.
    pub fn commit_with<F>(&mut self, apply: F) -> Result<Accepted, CurveError>
    where
        F: FnOnce(Curve) -> Result<Accepted, CurveError>,
    {
        self.gesture = None;
        let accepted = apply(self.displayed())?;
        self.draft = None;
        Ok(accepted)
    }
}
