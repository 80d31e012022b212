//! The `Position` data type: one coordinate of a scan.
//!
//! A position is an ordered mapping from axis name to a scalar demand (or
//! reached) value, plus the overall step index within the scan and an
//! optional per-axis index into that axis's own sweep. Positions are built by
//! the point generators and are never mutated once the engine has read them;
//! per-level task results are merged by [`Position::compose`], which produces
//! a fresh position rather than editing either input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named axis entry within a position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Axis {
    name: String,
    value: f64,
    /// Index of this value within its axis's sweep, where known.
    index: Option<usize>,
}

/// One coordinate of the scan: named axis values plus a step index.
///
/// Axis names are unique within a position; insertion order is preserved so
/// the outermost axis stays first when positions are composed segment by
/// segment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    axes: Vec<Axis>,
    step_index: usize,
}

impl Position {
    /// An empty position with step index 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-axis position.
    pub fn single(name: impl Into<String>, value: f64) -> Self {
        let mut pos = Self::new();
        pos.insert(name, value);
        pos
    }

    /// A single-axis position carrying the axis's sweep index.
    pub fn single_indexed(name: impl Into<String>, value: f64, index: usize) -> Self {
        let mut pos = Self::new();
        pos.insert_indexed(name, value, index);
        pos
    }

    /// Set an axis value, replacing any existing entry of the same name in
    /// place (insertion order of first appearance is kept).
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.insert_axis(Axis {
            name: name.into(),
            value,
            index: None,
        });
    }

    /// Set an axis value together with its per-axis sweep index.
    pub fn insert_indexed(&mut self, name: impl Into<String>, value: f64, index: usize) {
        self.insert_axis(Axis {
            name: name.into(),
            value,
            index: Some(index),
        });
    }

    fn insert_axis(&mut self, axis: Axis) {
        if let Some(existing) = self.axes.iter_mut().find(|a| a.name == axis.name) {
            *existing = axis;
        } else {
            self.axes.push(axis);
        }
    }

    /// The value of a named axis, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.axes.iter().find(|a| a.name == name).map(|a| a.value)
    }

    /// The per-axis sweep index of a named axis, if known.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.axes.iter().find(|a| a.name == name).and_then(|a| a.index)
    }

    /// Axis names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.axes.iter().map(|a| a.name.clone()).collect()
    }

    /// True if the position contains the named axis.
    pub fn contains(&self, name: &str) -> bool {
        self.axes.iter().any(|a| a.name == name)
    }

    /// Number of axes.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// True if the position has no axes.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// The overall step index of this position within the scan.
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Builder-style step index assignment.
    pub fn with_step_index(mut self, step: usize) -> Self {
        self.step_index = step;
        self
    }

    /// Set the overall step index.
    pub fn set_step_index(&mut self, step: usize) {
        self.step_index = step;
    }

    /// Compose two positions: the result's axis set is the union, values and
    /// indices from `other` win on name collision. The step index of `self`
    /// is kept.
    pub fn compose(&self, other: &Position) -> Position {
        let mut ret = self.clone();
        for axis in &other.axes {
            ret.insert_axis(axis.clone());
        }
        ret
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.axes.iter().map(|a| (a.name.as_str(), a.value))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: ", self.step_index)?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", axis.name, axis.value)?;
        }
        Ok(())
    }
}
