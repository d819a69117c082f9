//! WebSocket transport for range samples.
//!
//! [`RangeClient`] keeps a persistent connection to the measurement server,
//! parses every text frame into a [`RangeReport`] and publishes it on
//! [`Topic::Ranges`].  Connection-status changes go to [`Topic::Connection`].
//! Dropped or refused connections are retried with exponential backoff until
//! the stop signal is raised.
//!
//! Accepted frame shapes:
//!
//! ```text
//! {"distances": [7.07, 7.07, 7.07, 7.07], "tag_id": "tag-1"}
//! [7.07, 7.07, 7.07, 7.07]
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use locus_types::{ConnectionStatus, Event, EventPayload, LocusError, RangeReport};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};

const SOURCE: &str = "locus-middleware::range_client";

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based): `initial · 2^attempt`,
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeFrame {
    Report(RangeReport),
    Bare(Vec<f64>),
}

/// Parse one text frame, either a [`RangeReport`] object or a bare array of
/// ranges.
pub fn parse_range_frame(text: &str) -> Result<RangeReport, LocusError> {
    match serde_json::from_str::<RangeFrame>(text) {
        Ok(RangeFrame::Report(report)) => Ok(report),
        Ok(RangeFrame::Bare(distances)) => Ok(RangeReport {
            distances,
            tag_id: None,
            timestamp: None,
        }),
        Err(e) => Err(LocusError::Serialization(format!("invalid range frame: {e}"))),
    }
}

enum SessionEnd {
    Stopped,
    Closed,
}

/// Resolves once `stop` is raised or its sender is dropped.
pub async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|raised| *raised).await;
}

/// Client side of the range stream.
pub struct RangeClient {
    bus: Arc<EventBus>,
    url: String,
    policy: ReconnectPolicy,
}

impl RangeClient {
    pub fn new(bus: Arc<EventBus>, url: impl Into<String>) -> Self {
        Self {
            bus,
            url: url.into(),
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect, stream and reconnect until `stop` is raised.
    ///
    /// A final [`ConnectionStatus::Disconnected`] is published on exit.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut attempt = 0u32;
        loop {
            if *stop.borrow() {
                break;
            }
            self.publish_status(ConnectionStatus::Connecting);
            match self.session(&mut attempt, &mut stop).await {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::Closed) => {
                    info!(url = %self.url, "range stream closed by server");
                    self.publish_status(ConnectionStatus::Disconnected);
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "range stream failed");
                    self.publish_status(ConnectionStatus::Failed(e.to_string()));
                }
            }

            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(?delay, attempt, "reconnecting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut stop) => break,
            }
        }
        self.publish_status(ConnectionStatus::Disconnected);
        info!(url = %self.url, "range client stopped");
    }

    async fn session(
        &self,
        attempt: &mut u32,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, LocusError> {
        let connected = tokio::select! {
            res = connect_async(self.url.as_str()) => res,
            _ = stopped(stop) => return Ok(SessionEnd::Stopped),
        };
        let (mut ws, _) = connected
            .map_err(|e| LocusError::Transport(format!("connect to {}: {e}", self.url)))?;
        *attempt = 0;
        info!(url = %self.url, "range stream connected");
        self.publish_status(ConnectionStatus::Connected);

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.forward(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => {
                        warn!(bytes = bytes.len(), "ignoring binary range frame");
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(LocusError::Transport(e.to_string())),
                },
                _ = stopped(stop) => {
                    let _ = ws.close(None).await;
                    return Ok(SessionEnd::Stopped);
                }
            }
        }
    }

    fn forward(&self, text: &str) {
        let report = match parse_range_frame(text) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "skipping malformed range frame");
                return;
            }
        };
        let event = Event::new(
            SOURCE,
            EventPayload::Ranges {
                measurement: report.measurement(),
                tag_id: report.tag_id,
            },
        );
        if let Err(e) = self.bus.publish_to(Topic::Ranges, event) {
            debug!(error = %e, "range sample dropped");
        }
    }

    fn publish_status(&self, status: ConnectionStatus) {
        debug!(%status, "connection status");
        let _ = self
            .bus
            .publish_to(Topic::Connection, Event::new(SOURCE, EventPayload::Connection(status)));
    }
}
