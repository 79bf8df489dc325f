//! Change feed: persisted-message events in, broadcasts out.
//!
//! - [`record`] - stream entry decoding
//! - [`trigger`] - per-record broadcast logic
//! - [`consumer`] - Redis Streams consumer-group loop

pub mod consumer;
pub mod record;
pub mod trigger;

pub use consumer::{FeedConsumer, FeedSettings, PassSummary};
pub use record::{FeedEventKind, FeedRecord};
pub use trigger::{ChangeFeedTrigger, RecordOutcome};
