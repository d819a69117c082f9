//! Observable tracking state.
//!
//! [`Tracker`] holds the latest connection status, the latest position fix
//! and the danger flag, each published through a [`watch`] channel.  The
//! danger flag is raised by a fix inside the configured [`DangerZone`] (or by
//! an explicit [`Tracker::trigger_danger`]) and clears itself once the hold
//! duration passes without another trigger.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use locus_geometry::containment::point_in_region;
use locus_middleware::{EventBus, Topic, stopped};
use locus_types::{ConnectionStatus, Event, EventPayload, LocusError, Point, PositionFix};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SOURCE: &str = "locus-runtime::tracker";

/// How long the danger flag stays raised after the most recent trigger.
pub const DEFAULT_DANGER_HOLD: Duration = Duration::from_secs(5);

/// Triangle or quadrilateral on the survey plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct DangerZone(Vec<Point>);

impl DangerZone {
    pub fn new(polygon: Vec<Point>) -> Result<Self, LocusError> {
        match polygon.len() {
            3 | 4 => Ok(Self(polygon)),
            n => Err(LocusError::Config(format!(
                "a danger zone needs 3 or 4 vertices, got {n}"
            ))),
        }
    }

    pub fn vertices(&self) -> &[Point] {
        &self.0
    }

    /// Strict containment of the horizontal position; edges are outside.
    pub fn contains(&self, position: &Point) -> bool {
        matches!(point_in_region(position, &self.0), Ok(true))
    }
}

impl TryFrom<Vec<Point>> for DangerZone {
    type Error = LocusError;

    fn try_from(polygon: Vec<Point>) -> Result<Self, Self::Error> {
        Self::new(polygon)
    }
}

impl From<DangerZone> for Vec<Point> {
    fn from(zone: DangerZone) -> Self {
        zone.0
    }
}

/// Pending auto-clear.  `generation` changes on every trigger or clear so a
/// timer that fires late cannot clear a newer trigger.
#[derive(Default)]
struct DangerTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    connection: watch::Sender<ConnectionStatus>,
    position: watch::Sender<Option<PositionFix>>,
    danger: watch::Sender<bool>,
    timer: Mutex<DangerTimer>,
    hold: Duration,
    zone: Option<DangerZone>,
}

/// Shared handle; clones observe and mutate the same state.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(DEFAULT_DANGER_HOLD, None)
    }
}

impl Tracker {
    pub fn new(hold: Duration, zone: Option<DangerZone>) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection: watch::Sender::new(ConnectionStatus::Disconnected),
                position: watch::Sender::new(None),
                danger: watch::Sender::new(false),
                timer: Mutex::new(DangerTimer::default()),
                hold,
                zone,
            }),
        }
    }

    pub fn hold(&self) -> Duration {
        self.inner.hold
    }

    pub fn zone(&self) -> Option<&DangerZone> {
        self.inner.zone.as_ref()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.inner.connection.borrow().clone()
    }

    /// `None` until the first fix arrives.
    pub fn last_position(&self) -> Option<PositionFix> {
        *self.inner.position.borrow()
    }

    pub fn danger_active(&self) -> bool {
        *self.inner.danger.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.connection.subscribe()
    }

    pub fn watch_position(&self) -> watch::Receiver<Option<PositionFix>> {
        self.inner.position.subscribe()
    }

    /// Notified on danger-flag transitions only.
    pub fn watch_danger(&self) -> watch::Receiver<bool> {
        self.inner.danger.subscribe()
    }

    pub fn set_connection(&self, status: ConnectionStatus) {
        self.inner.connection.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    /// Record `fix`; a fix inside the danger zone triggers the danger flag.
    pub fn apply_fix(&self, fix: PositionFix) {
        self.inner.position.send_replace(Some(fix));
        if self.zone().is_some_and(|zone| zone.contains(&fix.position)) {
            debug!(position = %fix.position, "fix inside danger zone");
            self.trigger_danger();
        }
    }

    /// Raise the danger flag and (re)start the auto-clear timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger_danger(&self) {
        let mut timer = self.lock_timer();
        if let Some(pending) = timer.handle.take() {
            pending.abort();
        }
        timer.generation = timer.generation.wrapping_add(1);
        let generation = timer.generation;
        if self.set_danger(true) {
            info!(hold = ?self.inner.hold, "danger raised");
        }

        let tracker = self.clone();
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(tracker.inner.hold).await;
            let mut timer = tracker.lock_timer();
            if timer.generation == generation {
                timer.handle = None;
                tracker.set_danger(false);
                info!("danger cleared after hold");
            }
        }));
    }

    /// Clear the danger flag now and cancel any pending auto-clear.
    pub fn clear_danger(&self) {
        let mut timer = self.lock_timer();
        if let Some(pending) = timer.handle.take() {
            pending.abort();
        }
        timer.generation = timer.generation.wrapping_add(1);
        if self.set_danger(false) {
            info!("danger cleared");
        }
    }

    /// Follow [`Topic::Positions`] and [`Topic::Connection`] until `stop` is
    /// raised, publishing `Danger { active }` on [`Topic::Alerts`] at every
    /// danger-flag transition.
    pub async fn run(&self, bus: Arc<EventBus>, mut stop: watch::Receiver<bool>) {
        let mut positions = bus.subscribe_to(Topic::Positions);
        let mut connection = bus.subscribe_to(Topic::Connection);
        let mut danger = self.watch_danger();
        loop {
            tokio::select! {
                received = positions.recv() => {
                    if !self.on_event(received) {
                        break;
                    }
                }
                received = connection.recv() => {
                    if !self.on_event(received) {
                        break;
                    }
                }
                changed = danger.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let active = *danger.borrow_and_update();
                    let alert = Event::new(SOURCE, EventPayload::Danger { active });
                    if let Err(e) = bus.publish_to(Topic::Alerts, alert) {
                        debug!(error = %e, "danger alert dropped");
                    }
                }
                _ = stopped(&mut stop) => break,
            }
        }
        self.clear_danger();
    }

    /// Returns `false` once the bus has closed.
    fn on_event(&self, received: Result<Event, broadcast::error::RecvError>) -> bool {
        match received {
            Ok(event) => {
                match event.payload {
                    EventPayload::Position { fix, .. } => self.apply_fix(fix),
                    EventPayload::Connection(status) => self.set_connection(status),
                    _ => {}
                }
                true
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "tracker lagged");
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    fn set_danger(&self, active: bool) -> bool {
        self.inner.danger.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        })
    }

    fn lock_timer(&self) -> MutexGuard<'_, DangerTimer> {
        self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_millis(100);

    fn square_zone() -> DangerZone {
        DangerZone::new(vec![
            Point::planar(0.0, 0.0),
            Point::planar(4.0, 0.0),
            Point::planar(4.0, 4.0),
            Point::planar(0.0, 4.0),
        ])
        .unwrap()
    }

    fn fix_at(x: f64, y: f64) -> PositionFix {
        PositionFix {
            position: Point::new(x, y, 1.0),
            iterations: 1,
            converged: true,
        }
    }

    #[test]
    fn initial_state() {
        let tracker = Tracker::default();
        assert_eq!(tracker.connection(), ConnectionStatus::Disconnected);
        assert!(tracker.last_position().is_none());
        assert!(!tracker.danger_active());
        assert_eq!(tracker.hold(), Duration::from_secs(5));
    }

    #[test]
    fn zone_needs_three_or_four_vertices() {
        assert!(DangerZone::new(vec![Point::default(); 2]).is_err());
        assert!(DangerZone::new(vec![Point::default(); 5]).is_err());
        let zone = square_zone();
        assert!(zone.contains(&Point::new(1.0, 1.0, 3.0)));
        assert!(!zone.contains(&Point::planar(5.0, 1.0)));
        assert!(!zone.contains(&Point::planar(4.0, 1.0)));
    }

    #[test]
    fn zone_deserializes_from_point_list() {
        let zone: DangerZone =
            serde_json::from_str(r#"[{"x":0,"y":0},{"x":4,"y":0},{"x":0,"y":4}]"#).unwrap();
        assert_eq!(zone.vertices().len(), 3);
        assert!(serde_json::from_str::<DangerZone>(r#"[{"x":0,"y":0}]"#).is_err());
    }

    #[test]
    fn connection_changes_are_observable() {
        let tracker = Tracker::default();
        let mut rx = tracker.watch_connection();
        tracker.set_connection(ConnectionStatus::Connecting);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Connecting);
        tracker.set_connection(ConnectionStatus::Connecting);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn danger_auto_clears_after_hold() {
        let tracker = Tracker::new(HOLD, None);
        tracker.trigger_danger();
        assert!(tracker.danger_active());
        tokio::time::sleep(HOLD / 2).await;
        assert!(tracker.danger_active());
        tokio::time::sleep(HOLD * 2).await;
        assert!(!tracker.danger_active());
    }

    #[tokio::test]
    async fn retrigger_postpones_the_clear() {
        let tracker = Tracker::new(HOLD, None);
        tracker.trigger_danger();
        tokio::time::sleep(HOLD * 6 / 10).await;
        tracker.trigger_danger();
        tokio::time::sleep(HOLD * 6 / 10).await;
        // 120 ms after the first trigger, 60 ms after the second.
        assert!(tracker.danger_active());
        tokio::time::sleep(HOLD).await;
        assert!(!tracker.danger_active());
    }

    #[tokio::test]
    async fn clear_cancels_pending_timer() {
        let tracker = Tracker::new(HOLD, None);
        let mut rx = tracker.watch_danger();
        tracker.trigger_danger();
        tracker.clear_danger();
        assert!(!tracker.danger_active());
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();
        tokio::time::sleep(HOLD * 2).await;
        // No late clear fired (the flag was already down, nothing changed).
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn fix_inside_zone_triggers_danger() {
        let tracker = Tracker::new(HOLD, Some(square_zone()));
        tracker.apply_fix(fix_at(9.0, 9.0));
        assert!(!tracker.danger_active());
        assert_eq!(tracker.last_position(), Some(fix_at(9.0, 9.0)));

        tracker.apply_fix(fix_at(2.0, 2.0));
        assert!(tracker.danger_active());
        tokio::time::sleep(HOLD * 2).await;
        assert!(!tracker.danger_active());
    }

    #[tokio::test]
    async fn run_follows_bus_and_publishes_danger_alerts() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(EventBus::default());
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        let tracker = Tracker::new(HOLD, Some(square_zone()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn({
            let tracker = tracker.clone();
            let bus = bus.clone();
            async move { tracker.run(bus, stop_rx).await }
        });
        while bus.subscriber_count(Topic::Positions) == 0 || bus.subscriber_count(Topic::Connection) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        bus.publish_to(
            Topic::Connection,
            Event::new("test", EventPayload::Connection(ConnectionStatus::Connected)),
        )?;
        bus.publish_to(
            Topic::Positions,
            Event::new("test", EventPayload::Position { fix: fix_at(1.0, 3.0), tag_id: None }),
        )?;

        for expected in [true, false] {
            let event = tokio::time::timeout(HOLD * 5, alerts.recv()).await??;
            assert!(
                matches!(event.payload, EventPayload::Danger { active } if active == expected),
                "expected danger {expected}, got {:?}",
                event.payload
            );
        }
        assert_eq!(tracker.connection(), ConnectionStatus::Connected);
        assert_eq!(tracker.last_position(), Some(fix_at(1.0, 3.0)));

        stop_tx.send(true)?;
        tokio::time::timeout(Duration::from_secs(1), handle).await??;
        Ok(())
    }
}
