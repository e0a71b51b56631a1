use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lobby_types::channel::PushChannel;
use lobby_types::models::Entry;
use lobby_types::store::RelationalStore;

use crate::config::SyncConfig;
use crate::error::{SessionError, TransientFetchError};
use crate::feed::{Admission, FeedPhase, FeedReducer, FeedView};
use crate::live::{LiveSubscriber, LiveSubscription};
use crate::profiles::ProfileResolver;
use crate::snapshot::SnapshotLoader;

enum FeedEvent {
    Live(Entry),
    Snapshot(Result<Vec<Entry>, TransientFetchError>),
    RetrySnapshot,
}

/// One running feed: live subscription, snapshot load and the reducer task
/// that merges them. Dropping the session tears all of it down.
pub struct FeedSession<S: RelationalStore, C: PushChannel> {
    live: Option<LiveSubscription<C>>,
    events: mpsc::UnboundedSender<FeedEvent>,
    view: watch::Receiver<FeedView>,
    loader: SnapshotLoader<S>,
    snapshot_limit: u32,
    profiles: ProfileResolver<S>,
    reducer: JoinHandle<()>,
    snapshot: Mutex<Option<JoinHandle<()>>>,
}

impl<S: RelationalStore, C: PushChannel> FeedSession<S, C> {
    /// Arm live updates, then start the snapshot load. Must be called from
    /// within a Tokio runtime.
    pub fn start(store: Arc<S>, channel: Arc<C>, config: &SyncConfig) -> Result<Self, SessionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(FeedView::loading());

        // Inserts that land while the snapshot is in flight are queued here
        let live_tx = events_tx.clone();
        let live = LiveSubscriber::new(channel, config.topic.clone()).subscribe(move |entry| {
            let _ = live_tx.send(FeedEvent::Live(entry));
        })?;

        let reducer = tokio::spawn(run_reducer(events_rx, view_tx));
        let loader = SnapshotLoader::new(store.clone(), config.topic.clone());
        let profiles = ProfileResolver::new(store, config.profile_table.clone());

        let session = Self {
            live: Some(live),
            events: events_tx,
            view: view_rx,
            loader,
            snapshot_limit: config.snapshot_limit,
            profiles,
            reducer,
            snapshot: Mutex::new(None),
        };
        session.spawn_snapshot();
        info!("Feed session started on '{}'", config.topic);
        Ok(session)
    }

    /// Start a snapshot load, replacing any earlier one still in flight.
    fn spawn_snapshot(&self) {
        let loader = self.loader.clone();
        let limit = self.snapshot_limit;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let result = loader.load(limit).await;
            let _ = events.send(FeedEvent::Snapshot(result));
        });
        match self.snapshot.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(handle) {
                    previous.abort();
                }
            }
            Err(_) => handle.abort(),
        }
    }

    /// A receiver that sees every published view.
    pub fn view(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    pub fn current(&self) -> FeedView {
        self.view.borrow().clone()
    }

    /// Wait until the snapshot has either been admitted or failed.
    pub async fn ready(&self) -> Result<FeedView, TransientFetchError> {
        let mut view = self.view.clone();
        let settled = view
            .wait_for(|v| v.phase != FeedPhase::Loading)
            .await
            .map(|v| v.clone());
        match settled {
            Ok(FeedView {
                phase: FeedPhase::Failed(e),
                ..
            }) => Err(e),
            Ok(view) => Ok(view),
            Err(_) => Err(TransientFetchError {
                table: self.loader.table().to_string(),
                reason: "feed session closed".to_string(),
            }),
        }
    }

    pub fn profiles(&self) -> &ProfileResolver<S> {
        &self.profiles
    }

    /// Start another snapshot load after a failed one. Returns false when the
    /// feed is not in the failed phase.
    pub fn retry_snapshot(&self) -> bool {
        if !matches!(self.view.borrow().phase, FeedPhase::Failed(_)) {
            return false;
        }
        if self.events.send(FeedEvent::RetrySnapshot).is_err() {
            return false;
        }
        info!("Retrying snapshot load");
        self.spawn_snapshot();
        true
    }
}

impl<S: RelationalStore, C: PushChannel> Drop for FeedSession<S, C> {
    fn drop(&mut self) {
        drop(self.live.take());
        if let Ok(mut slot) = self.snapshot.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.reducer.abort();
        self.profiles.shutdown();
        info!("Feed session closed");
    }
}

async fn run_reducer(mut events: mpsc::UnboundedReceiver<FeedEvent>, view: watch::Sender<FeedView>) {
    let mut reducer = FeedReducer::new();
    let mut phase = FeedPhase::Loading;

    while let Some(event) = events.recv().await {
        match event {
            FeedEvent::Live(entry) => {
                if reducer.admit_live(entry) == Admission::Duplicate {
                    continue;
                }
            }
            FeedEvent::Snapshot(Ok(entries)) => {
                let outcome = reducer.admit_snapshot(entries);
                info!(
                    admitted = outcome.admitted,
                    duplicates = outcome.duplicates,
                    "Feed ready"
                );
                phase = FeedPhase::Ready;
            }
            FeedEvent::Snapshot(Err(e)) => {
                warn!("Snapshot load failed: {}", e);
                phase = FeedPhase::Failed(e);
            }
            FeedEvent::RetrySnapshot => phase = FeedPhase::Loading,
        }
        view.send_replace(FeedView {
            phase: phase.clone(),
            state: reducer.state(),
        });
    }
    debug!("Reducer queue closed");
}
