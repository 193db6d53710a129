//! # chatrelay Stream
//!
//! Out-of-band progress streams. A [`StreamPublisher`] creates streams on a
//! [`chatrelay_core::StreamTransport`] and hands out per-turn
//! [`StreamSink`]s that publish without ever blocking the turn.

pub mod interim;
pub mod local;
pub mod publisher;
pub mod web_pubsub;

pub use interim::{INTERIM_INTERVAL, InterimBuffer};
pub use local::LocalTransport;
pub use publisher::{StreamPublisher, StreamSink};
pub use web_pubsub::WebPubSubTransport;
