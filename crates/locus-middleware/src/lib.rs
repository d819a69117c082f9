//! `locus-middleware` – event routing and transport.
//!
//! Moves range samples, position fixes and status changes between the
//! components of a tracking session without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`range_client`] – WebSocket client that streams range reports from the
//!   measurement server onto the bus, reconnecting with backoff.

pub mod bus;
pub mod range_client;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use range_client::{RangeClient, ReconnectPolicy, parse_range_frame, stopped};
