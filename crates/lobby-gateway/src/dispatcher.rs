use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use lobby_types::channel::{ChannelError, ChannelSubscription, PushChannel, SubscriptionId};
use lobby_types::events::{EventFilter, RawChange};

const BROADCAST_CAPACITY: usize = 1024;

/// Fans row changes out to every open subscription.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscription receives every change; topic filtering happens per stream
    broadcast_tx: broadcast::Sender<RawChange>,

    /// Open subscriptions: id -> (topic, close signal)
    subscriptions: Mutex<HashMap<SubscriptionId, (String, oneshot::Sender<()>)>>,

    shut_down: AtomicBool,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                subscriptions: Mutex::new(HashMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Publish a change to all open subscriptions.
    pub fn publish(&self, change: RawChange) {
        debug!(topic = %change.topic, kind = ?change.kind, "publish");
        // No receivers is not an error: nobody is listening yet.
        let _ = self.inner.broadcast_tx.send(change);
    }

    pub fn open_subscriptions(&self) -> usize {
        self.subscriptions().len()
    }

    /// Close every subscription and refuse new ones.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let closed: Vec<_> = self.subscriptions().drain().collect();
        for (id, (topic, close_tx)) in closed {
            let _ = close_tx.send(());
            debug!("Closed subscription {} on '{}' at shutdown", id, topic);
        }
        info!("Dispatcher shut down");
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<SubscriptionId, (String, oneshot::Sender<()>)>> {
        // The map stays consistent even if a holder panicked mid-operation
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PushChannel for Dispatcher {
    fn open(&self, topic: &str, filter: EventFilter) -> Result<ChannelSubscription, ChannelError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }

        let id = SubscriptionId::new();
        let mut rx = self.inner.broadcast_tx.subscribe();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        self.subscriptions().insert(id, (topic.to_string(), close_tx));

        let topic = topic.to_string();
        info!("Subscription {} opened on '{}'", id, topic);

        let events = async_stream::stream! {
            loop {
                let result = tokio::select! {
                    _ = &mut close_rx => break,
                    result = rx.recv() => result,
                };

                let change = match result {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Subscription {} lagged by {} changes", id, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if change.topic == topic && filter.matches(change.kind) {
                    yield change;
                }
            }
        };

        Ok(ChannelSubscription {
            id,
            events: Box::pin(events),
        })
    }

    fn close(&self, id: SubscriptionId) {
        if let Some((topic, close_tx)) = self.subscriptions().remove(&id) {
            let _ = close_tx.send(());
            info!("Subscription {} closed on '{}'", id, topic);
        }
    }
}
