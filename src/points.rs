//! Scan-path models and lazy position generators.
//!
//! A scan path is described by a [`PointsModel`] and consumed as a lazy,
//! finite, forward-only iterator of [`Position`]s. A fresh iterator restarts
//! the sequence from the beginning; nothing here ever materializes the whole
//! sequence, which may run to millions of points.
//!
//! The model set is deliberately small: a static (axis-less) model, a single
//! axis step sweep, a two-axis grid, and a compound model nesting any of the
//! others outermost to innermost. Path mathematics beyond this is out of
//! scope; the engine only needs models it can iterate and, for compound
//! models, moderate segment by segment.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::position::Position;

/// A source of lazy position sequences.
pub trait PointGenerator: Send + Sync {
    /// A fresh iterator over the sequence, starting from the first point.
    fn iter(&self) -> Box<dyn Iterator<Item = Position> + Send>;

    /// Total number of points in the sequence.
    fn size(&self) -> usize;

    /// The axis names this generator drives, outermost first.
    fn axis_names(&self) -> Vec<String>;
}

/// Declarative description of a scan path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointsModel {
    /// A fixed number of axis-less points. Used where the outer loop must
    /// execute even though every real axis is swept elsewhere.
    Static {
        /// Number of (empty) positions to produce.
        size: usize,
    },

    /// Evenly spaced sweep of one axis, endpoints inclusive.
    Step {
        /// Axis name.
        axis: String,
        /// First value.
        start: f64,
        /// Last value.
        stop: f64,
        /// Number of points; 1 produces just `start`.
        count: usize,
    },

    /// Row-major two-axis grid, `y` slow and `x` fast.
    Grid {
        /// Fast axis name.
        x_axis: String,
        /// Slow axis name.
        y_axis: String,
        /// Fast axis range.
        x_start: f64,
        /// Fast axis last value.
        x_stop: f64,
        /// Fast axis point count.
        x_count: usize,
        /// Slow axis range.
        y_start: f64,
        /// Slow axis last value.
        y_stop: f64,
        /// Slow axis point count.
        y_count: usize,
    },

    /// Nested product of segment models, outermost first.
    Compound {
        /// Segments, outermost to innermost.
        segments: Vec<PointsModel>,
    },
}

impl PointsModel {
    /// A one-point static model.
    pub fn static_one() -> Self {
        PointsModel::Static { size: 1 }
    }

    /// Compound model from segments (outermost first).
    pub fn compound(segments: Vec<PointsModel>) -> Self {
        PointsModel::Compound { segments }
    }

    /// The segment list of a compound model, if this is one.
    pub fn segments(&self) -> Option<&[PointsModel]> {
        match self {
            PointsModel::Compound { segments } => Some(segments),
            _ => None,
        }
    }

    /// Validate the model and return it as a generator.
    pub fn generator(&self) -> ScanResult<Box<dyn PointGenerator>> {
        self.validate()?;
        Ok(Box::new(self.clone()))
    }

    fn validate(&self) -> ScanResult<()> {
        match self {
            PointsModel::Static { .. } => Ok(()),
            PointsModel::Step { axis, count, .. } => {
                if axis.is_empty() {
                    return Err(ScanError::Configuration(
                        "step model requires an axis name".to_string(),
                    ));
                }
                if *count == 0 {
                    return Err(ScanError::Configuration(
                        "step model requires at least one point".to_string(),
                    ));
                }
                Ok(())
            }
            PointsModel::Grid {
                x_axis,
                y_axis,
                x_count,
                y_count,
                ..
            } => {
                if x_axis == y_axis {
                    return Err(ScanError::Configuration(format!(
                        "grid model axes must differ, both are '{x_axis}'"
                    )));
                }
                if *x_count == 0 || *y_count == 0 {
                    return Err(ScanError::Configuration(
                        "grid model requires at least one point per axis".to_string(),
                    ));
                }
                Ok(())
            }
            PointsModel::Compound { segments } => {
                if segments.is_empty() {
                    return Err(ScanError::Configuration(
                        "compound model has no segments".to_string(),
                    ));
                }
                for segment in segments {
                    if matches!(segment, PointsModel::Compound { .. }) {
                        return Err(ScanError::Configuration(
                            "compound models do not nest".to_string(),
                        ));
                    }
                    segment.validate()?;
                }
                Ok(())
            }
        }
    }
}

/// Value of point `i` in an inclusive sweep of `count` points.
fn step_value(start: f64, stop: f64, count: usize, i: usize) -> f64 {
    if count <= 1 {
        start
    } else {
        start + (stop - start) * (i as f64) / ((count - 1) as f64)
    }
}

impl PointGenerator for PointsModel {
    fn iter(&self) -> Box<dyn Iterator<Item = Position> + Send> {
        match self.clone() {
            PointsModel::Static { size } => Box::new(
                (0..size).map(|i| Position::new().with_step_index(i)),
            ),
            PointsModel::Step {
                axis,
                start,
                stop,
                count,
            } => Box::new((0..count).map(move |i| {
                Position::single_indexed(axis.clone(), step_value(start, stop, count, i), i)
                    .with_step_index(i)
            })),
            PointsModel::Grid {
                x_axis,
                y_axis,
                x_start,
                x_stop,
                x_count,
                y_start,
                y_stop,
                y_count,
            } => Box::new((0..y_count * x_count).map(move |step| {
                let yi = step / x_count;
                let xi = step % x_count;
                let mut pos = Position::new().with_step_index(step);
                pos.insert_indexed(y_axis.clone(), step_value(y_start, y_stop, y_count, yi), yi);
                pos.insert_indexed(x_axis.clone(), step_value(x_start, x_stop, x_count, xi), xi);
                pos
            })),
            PointsModel::Compound { segments } => Box::new(CompoundIter::new(segments)),
        }
    }

    fn size(&self) -> usize {
        match self {
            PointsModel::Static { size } => *size,
            PointsModel::Step { count, .. } => *count,
            PointsModel::Grid {
                x_count, y_count, ..
            } => x_count * y_count,
            PointsModel::Compound { segments } => {
                segments.iter().map(PointGenerator::size).product()
            }
        }
    }

    fn axis_names(&self) -> Vec<String> {
        match self {
            PointsModel::Static { .. } => Vec::new(),
            PointsModel::Step { axis, .. } => vec![axis.clone()],
            PointsModel::Grid { x_axis, y_axis, .. } => vec![y_axis.clone(), x_axis.clone()],
            PointsModel::Compound { segments } => {
                segments.iter().flat_map(|s| s.axis_names()).collect()
            }
        }
    }
}

/// Odometer over the product of segment sequences, outermost slowest.
///
/// Each segment contributes a fresh iterator; when an inner segment is
/// exhausted it is restarted and the carry moves outward. Positions are
/// composed outer to inner so inner axes override on (illegal but harmless)
/// name collision.
struct CompoundIter {
    segments: Vec<PointsModel>,
    iters: Vec<Box<dyn Iterator<Item = Position> + Send>>,
    current: Vec<Position>,
    step: usize,
    started: bool,
    done: bool,
}

impl CompoundIter {
    fn new(segments: Vec<PointsModel>) -> Self {
        let mut iters = Vec::with_capacity(segments.len());
        let mut current = Vec::with_capacity(segments.len());
        let mut done = segments.is_empty();
        for segment in &segments {
            let mut it = segment.iter();
            match it.next() {
                Some(first) => {
                    iters.push(it);
                    current.push(first);
                }
                None => {
                    // Any empty segment empties the whole product.
                    done = true;
                    break;
                }
            }
        }
        Self {
            segments,
            iters,
            current,
            step: 0,
            started: false,
            done,
        }
    }

    fn compose_current(&mut self) -> Position {
        let mut pos = Position::new();
        for segment_pos in &self.current {
            pos = pos.compose(segment_pos);
        }
        pos.set_step_index(self.step);
        self.step += 1;
        pos
    }
}

impl Iterator for CompoundIter {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.compose_current());
        }
        // Advance innermost first, carrying outward on exhaustion.
        for i in (0..self.iters.len()).rev() {
            if let Some(pos) = self.iters[i].next() {
                self.current[i] = pos;
                for j in (i + 1)..self.iters.len() {
                    let mut fresh = self.segments[j].iter();
                    match fresh.next() {
                        Some(first) => {
                            self.current[j] = first;
                            self.iters[j] = fresh;
                        }
                        None => {
                            self.done = true;
                            return None;
                        }
                    }
                }
                return Some(self.compose_current());
            }
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(axis: &str, count: usize) -> PointsModel {
        PointsModel::Step {
            axis: axis.to_string(),
            start: 0.0,
            stop: (count as f64) - 1.0,
            count,
        }
    }

    #[test]
    fn test_step_values_and_indices() {
        let model = PointsModel::Step {
            axis: "x".to_string(),
            start: 1.0,
            stop: 2.0,
            count: 3,
        };
        let points: Vec<Position> = model.iter().collect();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].get("x"), Some(1.0));
        assert_eq!(points[1].get("x"), Some(1.5));
        assert_eq!(points[2].get("x"), Some(2.0));
        assert_eq!(points[2].index_of("x"), Some(2));
        assert_eq!(points[2].step_index(), 2);
    }

    #[test]
    fn test_single_point_step() {
        let model = PointsModel::Step {
            axis: "x".to_string(),
            start: 5.0,
            stop: 9.0,
            count: 1,
        };
        let points: Vec<Position> = model.iter().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].get("x"), Some(5.0));
    }

    #[test]
    fn test_grid_is_row_major() {
        let model = PointsModel::Grid {
            x_axis: "x".to_string(),
            y_axis: "y".to_string(),
            x_start: 0.0,
            x_stop: 1.0,
            x_count: 2,
            y_start: 0.0,
            y_stop: 1.0,
            y_count: 2,
        };
        let points: Vec<Position> = model.iter().collect();
        assert_eq!(points.len(), 4);
        assert_eq!(model.size(), 4);
        // y slow, x fast
        assert_eq!((points[0].get("y"), points[0].get("x")), (Some(0.0), Some(0.0)));
        assert_eq!((points[1].get("y"), points[1].get("x")), (Some(0.0), Some(1.0)));
        assert_eq!((points[2].get("y"), points[2].get("x")), (Some(1.0), Some(0.0)));
        assert_eq!(points[3].step_index(), 3);
    }

    #[test]
    fn test_compound_product_order() {
        let model = PointsModel::compound(vec![step("T", 3), step("x", 2)]);
        assert_eq!(model.size(), 6);
        let points: Vec<Position> = model.iter().collect();
        assert_eq!(points.len(), 6);
        // Outer T changes slowest.
        assert_eq!(points[0].get("T"), Some(0.0));
        assert_eq!(points[1].get("T"), Some(0.0));
        assert_eq!(points[2].get("T"), Some(1.0));
        assert_eq!(points[1].get("x"), Some(1.0));
        assert_eq!(points[5].step_index(), 5);
        assert_eq!(model.axis_names(), vec!["T".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_compound_restartable() {
        let model = PointsModel::compound(vec![step("a", 2), step("b", 2)]);
        assert_eq!(model.iter().count(), 4);
        // A fresh iterator restarts from the first point.
        let first = model.iter().next().map(|p| p.step_index());
        assert_eq!(first, Some(0));
    }

    #[test]
    fn test_static_model_yields_empty_positions() {
        let model = PointsModel::static_one();
        let points: Vec<Position> = model.iter().collect();
        assert_eq!(points.len(), 1);
        assert!(points[0].is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(PointsModel::Step {
            axis: "x".to_string(),
            start: 0.0,
            stop: 1.0,
            count: 0,
        }
        .generator()
        .is_err());
        assert!(PointsModel::compound(vec![]).generator().is_err());
        assert!(
            PointsModel::compound(vec![PointsModel::compound(vec![step("x", 2)])])
                .generator()
                .is_err()
        );
    }
}
