//! Shared types for the lobby feed: the message model, raw change events and
//! the collaborator interfaces (relational store, push channel, blob store)
//! that the synchronizer is written against.

pub mod blob;
pub mod channel;
pub mod events;
pub mod models;
pub mod store;

pub use blob::{BlobError, BlobStore};
pub use channel::{ChannelError, ChannelSubscription, PushChannel, SubscriptionId};
pub use events::{ChangeKind, EventFilter, RawChange};
pub use models::{AttachmentRef, AuthorId, AuthorProfile, Entry, EntryId, EntryKind, Viewer};
pub use store::{Direction, Order, Query, RelationalStore, Row, StoreError};
