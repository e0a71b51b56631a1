use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use lobby_types::channel::{ChannelError, ChannelSubscription, PushChannel, SubscriptionId};
use lobby_types::events::{ChangeKind, EventFilter};
use lobby_types::models::Entry;

use crate::wire;

/// Turns insert events on one topic into typed entries.
///
/// It adds no delivery guarantees of its own: whatever the channel delivers,
/// duplicates and gaps included, is passed on once decoded.
pub struct LiveSubscriber<C> {
    channel: Arc<C>,
    topic: String,
}

impl<C: PushChannel> LiveSubscriber<C> {
    pub fn new(channel: Arc<C>, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
        }
    }

    /// Open the subscription and call `on_insert` for every decoded insert.
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, mut on_insert: F) -> Result<LiveSubscription<C>, ChannelError>
    where
        F: FnMut(Entry) + Send + 'static,
    {
        let ChannelSubscription { id, mut events } = self
            .channel
            .open(&self.topic, EventFilter::Only(ChangeKind::Insert))?;

        let topic = self.topic.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = events.next().await {
                if change.kind != ChangeKind::Insert || change.topic != topic {
                    trace!("Ignoring {:?} on '{}'", change.kind, change.topic);
                    continue;
                }
                match wire::decode_payload(&change.payload) {
                    Ok(entry) => on_insert(entry),
                    Err(e) => warn!("Dropping malformed live event on '{}': {}", topic, e),
                }
            }
            debug!("Live stream on '{}' ended", topic);
        });

        info!("Live updates armed on '{}' ({})", self.topic, id);
        Ok(LiveSubscription {
            id,
            channel: self.channel.clone(),
            task,
        })
    }

    pub fn unsubscribe(&self, subscription: LiveSubscription<C>) {
        drop(subscription);
    }
}

/// An armed subscription. Dropping it stops delivery and closes the channel
/// subscription, whichever way the owner goes away.
pub struct LiveSubscription<C: PushChannel> {
    id: SubscriptionId,
    channel: Arc<C>,
    task: JoinHandle<()>,
}

impl<C: PushChannel> LiveSubscription<C> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The channel ended the stream on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<C: PushChannel> Drop for LiveSubscription<C> {
    fn drop(&mut self) {
        self.task.abort();
        self.channel.close(self.id);
        info!("Live updates released ({})", self.id);
    }
}
