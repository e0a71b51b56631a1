//! Client-side synchronizer for a single shared conversation feed.
//!
//! A [`FeedSession`] arms a live subscription, loads a bounded snapshot and
//! merges both into one ordered, deduplicated [`FeedState`]. Author metadata
//! is resolved lazily through the [`ProfileResolver`]; new messages are
//! written through the [`Composer`] and only show up once the store echoes
//! them back on the live channel.

pub mod composer;
pub mod config;
pub mod error;
pub mod feed;
pub mod live;
pub mod profiles;
pub mod session;
pub mod snapshot;
pub mod wire;

pub use composer::Composer;
pub use config::SyncConfig;
pub use error::{ConfigError, DecodeError, SendError, SendStage, SessionError, TransientFetchError};
pub use feed::{Admission, FeedPhase, FeedReducer, FeedState, FeedView, SnapshotAdmission};
pub use live::{LiveSubscriber, LiveSubscription};
pub use profiles::{ProfileOutcome, ProfileResolver, ProfileUpdate, Resolution};
pub use session::FeedSession;
pub use snapshot::SnapshotLoader;
