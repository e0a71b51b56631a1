use std::fmt;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{EventFilter, RawChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open subscription: its id (for `close`) and the event stream.
pub struct ChannelSubscription {
    pub id: SubscriptionId,
    pub events: BoxStream<'static, RawChange>,
}

impl fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("push channel is shut down")]
    Closed,

    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// Push-notification channel keyed by topic (table) and change kind.
pub trait PushChannel: Send + Sync + 'static {
    fn open(&self, topic: &str, filter: EventFilter) -> Result<ChannelSubscription, ChannelError>;

    /// Release a subscription. Closing an unknown id is a no-op.
    fn close(&self, id: SubscriptionId);
}

impl<C: PushChannel> PushChannel for Arc<C> {
    fn open(&self, topic: &str, filter: EventFilter) -> Result<ChannelSubscription, ChannelError> {
        (**self).open(topic, filter)
    }

    fn close(&self, id: SubscriptionId) {
        (**self).close(id)
    }
}
