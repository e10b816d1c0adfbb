//! Time-ordered sample series
//!
//! A [`Series`] holds the in-memory points for one tracked key. Points are kept
//! sorted by timestamp and are pruned from the front once they fall out of the
//! retention window.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// A single sample value with its timestamp
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Ordered points for one key. Timestamps never decrease from front to back.
#[derive(Clone, Debug, Default)]
pub struct Series {
    points: VecDeque<Point>,
}

impl Series {
    /// Create an empty series
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from points in any order. Equal timestamps keep their
    /// original relative order.
    pub fn from_points(mut points: Vec<Point>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self {
            points: points.into(),
        }
    }

    /// Add a point, keeping the series ordered.
    ///
    /// Live points almost always arrive in order and are appended in O(1); a
    /// late point is inserted after any points sharing its timestamp.
    pub fn push(&mut self, point: Point) {
        match self.points.back() {
            Some(last) if last.timestamp > point.timestamp => {
                let at = self
                    .points
                    .partition_point(|p| p.timestamp <= point.timestamp);
                self.points.insert(at, point);
            }
            _ => self.points.push_back(point),
        }
    }

    /// Remove points older than `cutoff`, returning how many were dropped
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some(front) = self.points.front() {
            if front.timestamp < cutoff {
                self.points.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// Points whose timestamp falls in `[min, max]`
    pub fn range(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> impl Iterator<Item = &Point> {
        self.points
            .iter()
            .filter(move |p| p.timestamp >= min && p.timestamp <= max)
    }

    pub fn points(&self) -> &VecDeque<Point> {
        &self.points
    }

    pub fn first(&self) -> Option<&Point> {
        self.points.front()
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
