use std::cmp::Ordering;

use locus_types::{AnchorSet, DistanceMeasurement};
use tracing::instrument;

use crate::error::LocalizationError;
use crate::refine::{RefineOptions, Refinement, refine_with};
use crate::trilateration::validate_ranges;

/// Localization engine bound to a fixed anchor layout.
///
/// Holds no per-sample state, so one instance can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct Localizer {
    anchors: AnchorSet,
    options: RefineOptions,
}

impl Localizer {
    pub fn new(anchors: AnchorSet) -> Self {
        Self {
            anchors,
            options: RefineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RefineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn options(&self) -> RefineOptions {
        self.options
    }

    /// Estimate and refine the position for one range sample.
    #[instrument(level = "debug", skip(self), fields(ranges = measurement.len()))]
    pub fn locate(&self, measurement: &DistanceMeasurement) -> Result<Refinement, LocalizationError> {
        let distances = measurement.as_slice();
        match distances.len().cmp(&AnchorSet::LEN) {
            Ordering::Less => {
                return Err(LocalizationError::InsufficientMeasurements {
                    needed: AnchorSet::LEN,
                    got: distances.len(),
                });
            }
            Ordering::Greater => {
                return Err(LocalizationError::DimensionMismatch {
                    operation: "locate",
                    left: (distances.len(), 1),
                    right: (AnchorSet::LEN, 3),
                });
            }
            Ordering::Equal => {}
        }
        validate_ranges(distances)?;
        refine_with(distances, self.anchors.as_slice(), self.options)
    }
}

#[cfg(test)]
mod tests {
    use locus_types::Point;

    use super::*;

    fn localizer() -> Localizer {
        Localizer::new(AnchorSet::new([
            Point::planar(0.0, 0.0),
            Point::planar(10.0, 0.0),
            Point::planar(10.0, 10.0),
            Point::planar(0.0, 10.0),
        ]))
    }

    fn sample(target: &Point, loc: &Localizer) -> DistanceMeasurement {
        loc.anchors()
            .as_slice()
            .iter()
            .map(|a| a.distance_to(target))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn locates_interior_target() {
        let loc = localizer();
        let target = Point::new(7.0, 2.0, 1.0);
        let r = loc.locate(&sample(&target, &loc)).unwrap();
        assert!(r.converged);
        assert!(r.position.distance_to(&target) < 1e-3);
    }

    #[test]
    fn rejects_short_and_long_samples() {
        let loc = localizer();
        let short = DistanceMeasurement::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(
            loc.locate(&short).unwrap_err(),
            LocalizationError::InsufficientMeasurements { needed: 4, got: 3 }
        );
        let long = DistanceMeasurement::new(vec![1.0; 5]);
        assert!(matches!(
            loc.locate(&long).unwrap_err(),
            LocalizationError::DimensionMismatch { operation: "locate", .. }
        ));
    }

    #[test]
    fn rejects_invalid_ranges() {
        let loc = localizer();
        let bad = DistanceMeasurement::new(vec![5.0, f64::INFINITY, 5.0, 5.0]);
        assert!(matches!(
            loc.locate(&bad).unwrap_err(),
            LocalizationError::InvalidMeasurement { index: 1, .. }
        ));
    }

    #[test]
    fn options_are_applied() {
        let opts = RefineOptions {
            max_iterations: 0,
            ..RefineOptions::default()
        };
        let loc = localizer().with_options(opts);
        assert_eq!(loc.options(), opts);
        let r = loc.locate(&sample(&Point::new(4.0, 4.0, 1.0), &loc)).unwrap();
        assert_eq!(r.iterations, 0);
    }
}
