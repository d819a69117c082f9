//! Range sample → position fix.
//!
//! [`LocalizationPipeline`] consumes [`Topic::Ranges`], runs the
//! [`Localizer`] on each sample in arrival order and publishes either a
//! position on [`Topic::Positions`] or a `LocalizationFailed` alert on
//! [`Topic::Alerts`].  A failed sample produces no position at all.

use std::sync::Arc;

use locus_geometry::{LocalizationError, Localizer};
use locus_middleware::{EventBus, Topic, stopped};
use locus_types::{DistanceMeasurement, Event, EventPayload, PositionFix};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const SOURCE: &str = "locus-runtime::pipeline";

pub struct LocalizationPipeline {
    localizer: Localizer,
    bus: Arc<EventBus>,
}

impl LocalizationPipeline {
    pub fn new(localizer: Localizer, bus: Arc<EventBus>) -> Self {
        Self { localizer, bus }
    }

    pub fn localizer(&self) -> &Localizer {
        &self.localizer
    }

    /// Localize one sample.  A fix that hit the iteration bound is still
    /// returned, flagged `converged = false`.
    pub fn process(&self, measurement: &DistanceMeasurement) -> Result<PositionFix, LocalizationError> {
        let refinement = self.localizer.locate(measurement)?;
        if !refinement.converged {
            warn!(
                iterations = refinement.iterations,
                step_norm = refinement.step_norm,
                "refinement did not converge"
            );
        }
        Ok(PositionFix {
            position: refinement.position,
            iterations: refinement.iterations,
            converged: refinement.converged,
        })
    }

    /// Consume range samples until `stop` is raised.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ranges = self.bus.subscribe_to(Topic::Ranges);
        info!("localization pipeline started");
        loop {
            tokio::select! {
                received = ranges.recv() => match received {
                    Ok(event) => self.handle(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "pipeline lagged; range samples dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = stopped(&mut stop) => break,
            }
        }
        info!("localization pipeline stopped");
    }

    fn handle(&self, event: Event) {
        let EventPayload::Ranges { measurement, tag_id } = event.payload else {
            return;
        };
        let (topic, payload) = match self.process(&measurement) {
            Ok(fix) => {
                debug!(position = %fix.position, iterations = fix.iterations, "position fix");
                (Topic::Positions, EventPayload::Position { fix, tag_id })
            }
            Err(e) => {
                warn!(error = %e, ranges = ?measurement.as_slice(), "sample could not be localized");
                (
                    Topic::Alerts,
                    EventPayload::LocalizationFailed {
                        reason: e.to_string(),
                    },
                )
            }
        };
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            debug!(error = %e, "pipeline output dropped");
        }
    }
}
