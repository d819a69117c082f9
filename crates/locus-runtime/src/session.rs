//! One tracking session: transport, pipeline and tracker wired over a bus.

use std::sync::Arc;
use std::time::Duration;

use locus_geometry::{Localizer, RefineOptions};
use locus_middleware::{EventBus, RangeClient, ReconnectPolicy};
use locus_types::AnchorSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::pipeline::LocalizationPipeline;
use crate::tracker::{DEFAULT_DANGER_HOLD, DangerZone, Tracker};

/// Everything a session needs to run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the measurement server.
    pub server_url: String,
    pub anchors: AnchorSet,
    pub refine: RefineOptions,
    pub reconnect: ReconnectPolicy,
    pub danger_hold: Duration,
    pub danger_zone: Option<DangerZone>,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>, anchors: AnchorSet) -> Self {
        Self {
            server_url: server_url.into(),
            anchors,
            refine: RefineOptions::default(),
            reconnect: ReconnectPolicy::default(),
            danger_hold: DEFAULT_DANGER_HOLD,
            danger_zone: None,
        }
    }
}

/// Handle to the running tasks.  Dropping it without [`stop`][Self::stop]
/// leaves the tasks running until the bus or runtime goes away.
pub struct TrackingSession {
    bus: Arc<EventBus>,
    tracker: Tracker,
    stop: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TrackingSession {
    /// Spawn the range client, the localization pipeline and the tracker on
    /// the current Tokio runtime.
    pub fn start(config: SessionConfig, bus: Arc<EventBus>) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let tracker = Tracker::new(config.danger_hold, config.danger_zone.clone());
        let localizer = Localizer::new(config.anchors).with_options(config.refine);

        let pipeline = LocalizationPipeline::new(localizer, bus.clone());
        let client = RangeClient::new(bus.clone(), config.server_url.clone())
            .with_reconnect(config.reconnect);
        let tracker_task = {
            let tracker = tracker.clone();
            let bus = bus.clone();
            let stop_rx = stop_rx.clone();
            async move { tracker.run(bus, stop_rx).await }
        };

        let tasks = vec![
            ("tracker", tokio::spawn(tracker_task)),
            ("pipeline", tokio::spawn(pipeline.run(stop_rx.clone()))),
            ("range_client", tokio::spawn(client.run(stop_rx))),
        ];
        info!(url = %config.server_url, "tracking session started");
        Self {
            bus,
            tracker,
            stop,
            tasks,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Raise the stop signal and wait for every task to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "session task ended abnormally");
            }
        }
        info!("tracking session stopped");
    }
}
