//! `locus-runtime` – tracking session orchestration.
//!
//! # Modules
//!
//! - [`pipeline`] – [`LocalizationPipeline`][pipeline::LocalizationPipeline]:
//!   turns range samples from the bus into position fixes or failure alerts.
//! - [`tracker`] – [`Tracker`][tracker::Tracker]: observable connection,
//!   position and danger state with a cancellable danger auto-clear.
//! - [`session`] – [`TrackingSession`][session::TrackingSession]: spawns the
//!   range client, pipeline and tracker as one unit.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod pipeline;
pub mod session;
pub mod telemetry;
pub mod tracker;

pub use pipeline::LocalizationPipeline;
pub use session::{SessionConfig, TrackingSession};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use tracker::{DEFAULT_DANGER_HOLD, DangerZone, Tracker};
