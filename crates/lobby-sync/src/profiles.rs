use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use lobby_types::models::{AuthorId, AuthorProfile, Entry};
use lobby_types::store::{Query, RelationalStore};

use crate::error::TransientFetchError;
use crate::wire::{self, USER_ID};

const UPDATE_CAPACITY: usize = 256;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(Arc<AuthorProfile>),
    /// A fetch is outstanding; render with this fallback meanwhile.
    Pending(Arc<AuthorProfile>),
}

impl Resolution {
    pub fn profile(&self) -> &AuthorProfile {
        match self {
            Self::Ready(p) | Self::Pending(p) => p,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    /// Stored profile cached.
    Resolved,
    /// No stored profile; the fallback is cached for the session.
    Missing,
    /// Fetch failed; nothing cached, the next lookup fetches again.
    Failed,
    /// Session ended before the fetch finished.
    Discarded,
}

/// Sent when a fetch settles, so views can re-render that author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub author_id: AuthorId,
    pub outcome: ProfileOutcome,
}

enum Slot {
    Ready(Arc<AuthorProfile>),
    Pending(AbortHandle),
}

/// Lazily fetched, memoized author profiles.
///
/// At most one fetch is outstanding per author: lookups that miss while a
/// fetch is in flight get the fallback and share its result. Profiles are
/// never refreshed once cached.
pub struct ProfileResolver<S> {
    inner: Arc<ResolverInner<S>>,
}

struct ResolverInner<S> {
    store: Arc<S>,
    table: String,
    slots: Mutex<HashMap<AuthorId, Slot>>,
    updates: broadcast::Sender<ProfileUpdate>,
    fetches: AtomicU64,
    closed: AtomicBool,
}

impl<S> Clone for ProfileResolver<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> ResolverInner<S> {
    fn slots(&self) -> MutexGuard<'_, HashMap<AuthorId, Slot>> {
        // Slots are replaced whole, so a poisoned map is still coherent
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: RelationalStore> ProfileResolver<S> {
    pub fn new(store: Arc<S>, table: impl Into<String>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            inner: Arc::new(ResolverInner {
                store,
                table: table.into(),
                slots: Mutex::new(HashMap::new()),
                updates,
                fetches: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Profile for the author of `entry`; never waits.
    pub fn resolve(&self, entry: &Entry) -> Resolution {
        self.resolve_author(entry.author_id, &entry.author_handle)
    }

    /// Like [`resolve`](Self::resolve), with the handle used for the fallback
    /// given directly. Must be called from within a Tokio runtime.
    pub fn resolve_author(&self, author_id: AuthorId, handle: &str) -> Resolution {
        let fallback = || Arc::new(AuthorProfile::fallback(author_id, handle));

        if self.inner.closed.load(Ordering::Acquire) {
            return Resolution::Pending(fallback());
        }

        let mut slots = self.inner.slots();
        match slots.get(&author_id) {
            Some(Slot::Ready(profile)) => return Resolution::Ready(profile.clone()),
            Some(Slot::Pending(_)) => return Resolution::Pending(fallback()),
            None => {}
        }

        // The slot is claimed before the lock is released, so concurrent
        // misses for this author all see Pending.
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(fetch(self.inner.clone(), author_id, handle.to_string()));
        slots.insert(author_id, Slot::Pending(task.abort_handle()));
        debug!(author = %author_id, "profile fetch started");

        Resolution::Pending(fallback())
    }

    /// Resolve and wait for any outstanding fetch. A failed or discarded
    /// fetch yields the fallback.
    pub async fn resolved(&self, author_id: AuthorId, handle: &str) -> Arc<AuthorProfile> {
        let mut updates = self.inner.updates.subscribe();
        let fallback = match self.resolve_author(author_id, handle) {
            Resolution::Ready(profile) => return profile,
            Resolution::Pending(fallback) => fallback,
        };
        if self.inner.closed.load(Ordering::Acquire) {
            return fallback;
        }

        loop {
            match updates.recv().await {
                Ok(update) if update.author_id != author_id => continue,
                Ok(update) => match update.outcome {
                    ProfileOutcome::Resolved | ProfileOutcome::Missing => {
                        return self.cached(author_id).unwrap_or(fallback);
                    }
                    ProfileOutcome::Failed | ProfileOutcome::Discarded => return fallback,
                },
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed updates; the cache is the source of truth
                    if let Some(profile) = self.cached(author_id) {
                        return profile;
                    }
                    if !self.is_pending(author_id) {
                        return fallback;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return fallback,
            }
        }
    }

    pub fn cached(&self, author_id: AuthorId) -> Option<Arc<AuthorProfile>> {
        match self.inner.slots().get(&author_id) {
            Some(Slot::Ready(profile)) => Some(profile.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self, author_id: AuthorId) -> bool {
        matches!(self.inner.slots().get(&author_id), Some(Slot::Pending(_)))
    }

    /// Number of store fetches started so far.
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> broadcast::Receiver<ProfileUpdate> {
        self.inner.updates.subscribe()
    }

    /// Abort in-flight fetches and stop starting new ones. Cached profiles
    /// stay readable.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut discarded = Vec::new();
        self.inner.slots().retain(|author_id, slot| match slot {
            Slot::Ready(_) => true,
            Slot::Pending(task) => {
                task.abort();
                discarded.push(*author_id);
                false
            }
        });

        for author_id in &discarded {
            let _ = self.inner.updates.send(ProfileUpdate {
                author_id: *author_id,
                outcome: ProfileOutcome::Discarded,
            });
        }
        info!("Profile resolver shut down ({} fetches discarded)", discarded.len());
    }
}

async fn fetch<S: RelationalStore>(inner: Arc<ResolverInner<S>>, author_id: AuthorId, handle: String) {
    let query = Query::table(&inner.table)
        .eq(USER_ID, author_id.to_string())
        .limit(1);

    let (slot, outcome) = match inner.store.query(query).await {
        Ok(rows) => match rows.first().map(wire::decode_profile) {
            Some(Ok(profile)) => (Some(profile), ProfileOutcome::Resolved),
            Some(Err(e)) => {
                warn!("Unusable profile row for {}: {}", author_id, e);
                (Some(AuthorProfile::fallback(author_id, &handle)), ProfileOutcome::Missing)
            }
            None => (Some(AuthorProfile::fallback(author_id, &handle)), ProfileOutcome::Missing),
        },
        Err(e) => {
            let err = TransientFetchError::new(&inner.table, e);
            warn!("Profile fetch for {} failed: {}", author_id, err);
            (None, ProfileOutcome::Failed)
        }
    };

    {
        let mut slots = inner.slots();
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        match slot {
            Some(profile) => {
                slots.insert(author_id, Slot::Ready(Arc::new(profile)));
            }
            None => {
                slots.remove(&author_id);
            }
        }
    }

    debug!(author = %author_id, ?outcome, "profile fetch settled");
    let _ = inner.updates.send(ProfileUpdate { author_id, outcome });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_types::store::{Row, StoreError};
    use serde_json::json;
    use std::future::Future;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    /// Profile table that counts queries and can hold them until released.
    struct GatedProfiles {
        rows: Mutex<HashMap<String, Row>>,
        fail: AtomicBool,
        queries: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedProfiles {
        fn open() -> Self {
            Self::with_permits(Semaphore::MAX_PERMITS)
        }

        fn with_permits(permits: usize) -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
                fail: AtomicBool::new(false),
                queries: AtomicUsize::new(0),
                gate: Semaphore::new(permits),
            }
        }

        fn add(&self, author: AuthorId, username: &str) {
            let row = json!({ "user_id": author.to_string(), "username": username, "avatar_url": "http://a/x.png" });
            self.rows
                .lock()
                .unwrap()
                .insert(author.to_string(), row.as_object().unwrap().clone());
        }
    }

    impl RelationalStore for GatedProfiles {
        fn query(&self, query: Query) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send {
            async move {
                self.queries.fetch_add(1, Ordering::SeqCst);
                let _permit = self.gate.acquire().await.unwrap();
                if self.fail.load(Ordering::SeqCst) {
                    return Err(StoreError::Unavailable("offline".into()));
                }
                let key = query.filter[0].1.as_str().unwrap().to_string();
                Ok(self.rows.lock().unwrap().get(&key).cloned().into_iter().collect())
            }
        }

        fn insert(
            &self,
            _table: &str,
            _record: Row,
        ) -> impl Future<Output = Result<Row, StoreError>> + Send {
            async { Err(StoreError::Rejected("read only".into())) }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_fetch() {
        let store = Arc::new(GatedProfiles::with_permits(0));
        let author = AuthorId::new();
        store.add(author, "grace");
        let resolver = ProfileResolver::new(store.clone(), "profiles");

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let resolver = resolver.clone();
            tasks.push(tokio::spawn(async move {
                resolver.resolve_author(author, "grace@example.com")
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_pending());
        }
        assert_eq!(resolver.fetch_count(), 1);

        store.gate.add_permits(1);
        let profile = resolver.resolved(author, "grace@example.com").await;
        assert_eq!(profile.display_handle, "grace");
        assert_eq!(profile.avatar_url.as_deref(), Some("http://a/x.png"));
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);

        // Hits never go back to the store
        assert!(!resolver.resolve_author(author, "grace@example.com").is_pending());
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_local_part() {
        let store = Arc::new(GatedProfiles::open());
        store.fail.store(true, Ordering::SeqCst);
        let resolver = ProfileResolver::new(store.clone(), "profiles");
        let author = AuthorId::new();

        let pending = resolver.resolve_author(author, "heidi@example.com");
        assert_eq!(pending.profile().display_handle, "heidi");

        let profile = resolver.resolved(author, "heidi@example.com").await;
        assert_eq!(profile.display_handle, "heidi");
        assert!(resolver.cached(author).is_none());

        // Failure is not memoized: the next lookup fetches again
        store.fail.store(false, Ordering::SeqCst);
        store.add(author, "heidi_h");
        let profile = resolver.resolved(author, "heidi@example.com").await;
        assert_eq!(profile.display_handle, "heidi_h");
        assert_eq!(resolver.fetch_count(), 2);
    }

    #[tokio::test]
    async fn missing_profile_memoizes_fallback() {
        let store = Arc::new(GatedProfiles::open());
        let resolver = ProfileResolver::new(store.clone(), "profiles");
        let author = AuthorId::new();

        let profile = resolver.resolved(author, "ivan@example.com").await;
        assert_eq!(profile.display_handle, "ivan");
        assert_eq!(resolver.cached(author).unwrap().display_handle, "ivan");

        resolver.resolve_author(author, "ivan@example.com");
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn updates_announce_settled_fetches() {
        let store = Arc::new(GatedProfiles::open());
        let author = AuthorId::new();
        store.add(author, "judy");
        let resolver = ProfileResolver::new(store, "profiles");
        let mut updates = resolver.updates();

        resolver.resolve_author(author, "judy@example.com");
        let update = updates.recv().await.unwrap();
        assert_eq!(update.author_id, author);
        assert_eq!(update.outcome, ProfileOutcome::Resolved);
    }

    #[tokio::test]
    async fn shutdown_discards_in_flight_fetches() {
        let store = Arc::new(GatedProfiles::with_permits(0));
        let resolver = ProfileResolver::new(store.clone(), "profiles");
        let author = AuthorId::new();

        resolver.resolve_author(author, "ken@example.com");
        assert!(resolver.is_pending(author));

        let waiter = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolved(author, "ken@example.com").await })
        };
        tokio::task::yield_now().await;

        resolver.shutdown();
        store.gate.add_permits(1);

        let profile = waiter.await.unwrap();
        assert_eq!(profile.display_handle, "ken");
        assert!(!resolver.is_pending(author));
        assert!(resolver.cached(author).is_none());

        // No new fetches after teardown
        assert!(resolver.resolve_author(AuthorId::new(), "x@y").is_pending());
        assert_eq!(resolver.fetch_count(), 1);
    }
}
