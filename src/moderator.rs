//! Splitting a scan path between the engine and hardware-scanning detectors.
//!
//! Some detectors sweep axes themselves (a malcolm-style hardware scan): the
//! engine must not also step those axes point by point. The moderator takes
//! the requested path and the detector set and strips, from the innermost
//! end of a compound model, every segment whose axes the detectors handle
//! internally. What remains is the outer path the engine iterates; the
//! stripped segments are the inner path the hardware performs at each outer
//! point.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::device::Detector;
use crate::error::ScanResult;
use crate::points::{PointGenerator, PointsModel};

/// The requested path split into an engine-stepped outer part and a
/// detector-handled inner part.
pub struct SubscanModerator {
    outer: PointsModel,
    inner: Option<PointsModel>,
}

impl SubscanModerator {
    /// Split `model` against the axes the detectors sweep internally.
    ///
    /// The model is returned unchanged when no detector declares subscan
    /// axes, or when it is not a compound model. Segments are considered
    /// innermost first; stripping stops at the first segment with an axis
    /// the detectors do not handle. When every segment is stripped the
    /// outer path collapses to a single empty point, so the hardware scan
    /// still runs exactly once.
    pub fn moderate(model: &PointsModel, detectors: &[Arc<dyn Detector>]) -> ScanResult<Self> {
        model.generator()?;

        let handled: HashSet<String> = detectors
            .iter()
            .flat_map(|d| d.subscan_axes())
            .collect();
        let Some(segments) = model.segments() else {
            return Ok(Self {
                outer: model.clone(),
                inner: None,
            });
        };
        if handled.is_empty() {
            return Ok(Self {
                outer: model.clone(),
                inner: None,
            });
        }

        let mut outer = segments.to_vec();
        let mut inner = Vec::new();
        while let Some(last) = outer.last() {
            // An axis-less segment has nothing the engine must step itself,
            // so it goes inner along with its handled neighbours.
            let axes = last.axis_names();
            if !axes.iter().all(|a| handled.contains(a)) {
                break;
            }
            if let Some(segment) = outer.pop() {
                inner.insert(0, segment);
            }
        }

        if !inner.is_empty() {
            debug!(
                handled = ?handled,
                outer_segments = outer.len(),
                inner_segments = inner.len(),
                "scan path moderated for hardware-scanning detectors"
            );
        }

        let outer = match outer.len() {
            0 => PointsModel::static_one(),
            1 => outer.remove(0),
            _ => PointsModel::compound(outer),
        };
        let inner = match inner.len() {
            0 => None,
            1 => Some(inner.remove(0)),
            _ => Some(PointsModel::compound(inner)),
        };
        Ok(Self { outer, inner })
    }

    /// The path the engine iterates point by point.
    pub fn outer_model(&self) -> &PointsModel {
        &self.outer
    }

    /// The path the detectors perform internally at each outer point, if
    /// any was stripped.
    pub fn inner_model(&self) -> Option<&PointsModel> {
        self.inner.as_ref()
    }

    /// Number of points the engine will step.
    pub fn outer_size(&self) -> usize {
        self.outer.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDetector;

    fn step(axis: &str, count: usize) -> PointsModel {
        PointsModel::Step {
            axis: axis.to_string(),
            start: 0.0,
            stop: (count as f64) - 1.0,
            count,
        }
    }

    fn grid() -> PointsModel {
        PointsModel::Grid {
            x_axis: "x".to_string(),
            y_axis: "y".to_string(),
            x_start: 0.0,
            x_stop: 1.0,
            x_count: 2,
            y_start: 0.0,
            y_stop: 1.0,
            y_count: 3,
        }
    }

    fn hardware_detector(axes: &[&str]) -> Arc<dyn Detector> {
        Arc::new(
            MockDetector::new("malcolm", 1)
                .with_subscan_axes(axes.iter().map(|a| a.to_string()).collect()),
        )
    }

    #[test]
    fn test_unchanged_without_subscan_detectors() {
        let model = PointsModel::compound(vec![step("T", 3), grid()]);
        let plain: Arc<dyn Detector> = Arc::new(MockDetector::new("det", 1));
        let moderated = SubscanModerator::moderate(&model, &[plain]).expect("moderate");
        assert_eq!(moderated.outer_model(), &model);
        assert!(moderated.inner_model().is_none());
        assert_eq!(moderated.outer_size(), 18);
    }

    #[test]
    fn test_non_compound_model_unchanged() {
        let model = grid();
        let det = hardware_detector(&["x", "y"]);
        let moderated = SubscanModerator::moderate(&model, &[det]).expect("moderate");
        assert_eq!(moderated.outer_model(), &model);
        assert!(moderated.inner_model().is_none());
    }

    #[test]
    fn test_inner_grid_stripped() {
        let model = PointsModel::compound(vec![step("T", 3), grid()]);
        let det = hardware_detector(&["x", "y"]);
        let moderated = SubscanModerator::moderate(&model, &[det]).expect("moderate");
        assert_eq!(moderated.outer_model(), &step("T", 3));
        assert_eq!(moderated.inner_model(), Some(&grid()));
        assert_eq!(moderated.outer_size(), 3);
    }

    #[test]
    fn test_axisless_segment_is_stripped_with_the_handled_axes() {
        let model = PointsModel::compound(vec![
            step("T", 3),
            PointsModel::Static { size: 2 },
            grid(),
        ]);
        let det = hardware_detector(&["x", "y"]);
        let moderated = SubscanModerator::moderate(&model, &[det]).expect("moderate");
        assert_eq!(moderated.outer_model(), &step("T", 3));
        assert_eq!(moderated.outer_size(), 3);
        assert_eq!(
            moderated.inner_model(),
            Some(&PointsModel::compound(vec![
                PointsModel::Static { size: 2 },
                grid(),
            ]))
        );
    }

    #[test]
    fn test_stripping_stops_at_unhandled_segment() {
        // y is handled but the inner x sweep is not; nothing can be
        // stripped without reordering the nest.
        let model = PointsModel::compound(vec![step("y", 3), step("x", 2)]);
        let det = hardware_detector(&["y"]);
        let moderated = SubscanModerator::moderate(&model, &[det]).expect("moderate");
        assert_eq!(moderated.outer_model(), &model);
        assert!(moderated.inner_model().is_none());
    }

    #[test]
    fn test_fully_handled_scan_collapses_to_one_point() {
        let model = PointsModel::compound(vec![step("y", 3), step("x", 2)]);
        let det = hardware_detector(&["x", "y"]);
        let moderated = SubscanModerator::moderate(&model, &[det]).expect("moderate");
        assert_eq!(moderated.outer_model(), &PointsModel::static_one());
        assert_eq!(moderated.outer_size(), 1);
        assert_eq!(
            moderated.inner_model(),
            Some(&PointsModel::compound(vec![step("y", 3), step("x", 2)]))
        );
    }

    #[test]
    fn test_handled_axes_union_across_detectors() {
        let model = PointsModel::compound(vec![step("T", 2), grid()]);
        let dx = hardware_detector(&["x"]);
        let dy = hardware_detector(&["y"]);
        let moderated = SubscanModerator::moderate(&model, &[dx, dy]).expect("moderate");
        assert_eq!(moderated.outer_model(), &step("T", 2));
        assert!(moderated.inner_model().is_some());
    }
}
