//! `locus-geometry` – range-based localization engine.
//!
//! Turns a vector of measured ranges to four fixed anchors into a 3-D
//! position estimate.  Every call is independent: nothing is carried over
//! from one sample to the next.
//!
//! # Modules
//!
//! - [`linalg`] – [`Matrix`][linalg::Matrix]: small dense row-major matrix
//!   with dimension-checked multiply, transpose and 2×2 / 3×3 inversion.
//! - [`containment`] – half-plane, triangle and quadrilateral containment
//!   tests used to pick among algebraic candidate solutions.
//! - [`trilateration`] – closed-form estimates from two, three or four
//!   anchors.
//! - [`refine`] – Gauss-Newton least-squares polish of the closed-form
//!   estimate.
//! - [`localizer`] – [`Localizer`][localizer::Localizer]: binds the pipeline
//!   to a configured [`AnchorSet`][locus_types::AnchorSet].
//!
//! # Example
//!
//! ```rust
//! use locus_geometry::Localizer;
//! use locus_types::{AnchorSet, DistanceMeasurement, Point};
//!
//! let anchors = AnchorSet::new([
//!     Point::planar(0.0, 0.0),
//!     Point::planar(10.0, 0.0),
//!     Point::planar(10.0, 10.0),
//!     Point::planar(0.0, 10.0),
//! ]);
//! let target = Point::new(3.0, 4.0, 1.5);
//! let ranges: Vec<f64> = anchors.as_slice().iter().map(|a| a.distance_to(&target)).collect();
//!
//! let fix = Localizer::new(anchors).locate(&DistanceMeasurement::new(ranges)).unwrap();
//! assert!(fix.converged);
//! assert!(fix.position.distance_to(&target) < 1e-3);
//! ```

pub mod containment;
pub mod error;
pub mod linalg;
pub mod localizer;
pub mod refine;
pub mod trilateration;

pub use error::LocalizationError;
pub use linalg::Matrix;
pub use localizer::Localizer;
pub use refine::{refine, refine_with, RefineOptions, Refinement};
pub use trilateration::{
    DEFAULT_HEIGHT_SLACK, four_anchor_trilaterate, four_anchor_trilaterate_with,
    three_anchor_trilaterate, two_anchor_trilaterate,
};
