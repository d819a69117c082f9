use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A position or anchor coordinate.
///
/// Anchors are conventionally surveyed on the `z = 0` plane; refined target
/// positions carry a free height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// A point on the survey plane (`z = 0`).
    pub fn planar(x: f64, y: f64) -> Self {
        Self::new(x, y, 0.0)
    }

    /// Euclidean distance in 3-D.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance projected onto the survey plane (heights ignored).
    pub fn horizontal_distance_to(&self, other: &Point) -> f64 {
        let (dx, dy) = (self.x - other.x, self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// The four fixed reference anchors, indices 0–3.
///
/// The anchors are expected to form a convex, non-degenerate quadrilateral
/// listed in hull order. That is not validated here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct AnchorSet([Point; 4]);

impl AnchorSet {
    pub const LEN: usize = 4;

    pub fn new(anchors: [Point; 4]) -> Self {
        Self(anchors)
    }

    pub fn as_slice(&self) -> &[Point] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Point> {
        self.0.get(index)
    }
}

impl TryFrom<Vec<Point>> for AnchorSet {
    type Error = LocusError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        let len = points.len();
        let anchors: [Point; 4] = points.try_into().map_err(|_| {
            LocusError::Config(format!("an anchor set needs exactly 4 anchors, got {len}"))
        })?;
        Ok(Self(anchors))
    }
}

impl From<AnchorSet> for Vec<Point> {
    fn from(set: AnchorSet) -> Self {
        set.0.to_vec()
    }
}

/// One measured range per anchor, index-aligned with the [`AnchorSet`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistanceMeasurement(Vec<f64>);

impl DistanceMeasurement {
    pub fn new(distances: Vec<f64>) -> Self {
        Self(distances)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for DistanceMeasurement {
    fn from(distances: Vec<f64>) -> Self {
        Self(distances)
    }
}

/// Range report as sent by the upstream measurement server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RangeReport {
    /// Measured ranges in anchor order, same unit as the anchor coordinates.
    pub distances: Vec<f64>,
    /// Identifier of the tracked tag, if the server multiplexes several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
    /// Time the ranges were sampled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RangeReport {
    pub fn measurement(&self) -> DistanceMeasurement {
        DistanceMeasurement::new(self.distances.clone())
    }
}

/// A localized sample together with its refinement diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub position: Point,
    pub iterations: usize,
    pub converged: bool,
}

/// State of the upstream transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "locus-middleware::range_client"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped now.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A range sample received from the transport.
    Ranges {
        measurement: DistanceMeasurement,
        tag_id: Option<String>,
    },
    Position {
        fix: PositionFix,
        tag_id: Option<String>,
    },
    /// A sample that could not be localized; no position was produced.
    LocalizationFailed { reason: String },
    Connection(ConnectionStatus),
    Danger { active: bool },
}

/// Global error type spanning transport, bus, configuration and localization
/// failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocusError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Localization Error: {0}")]
    Localization(String),
}
