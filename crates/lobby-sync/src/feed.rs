use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use lobby_types::models::{Entry, EntryId};

use crate::error::TransientFetchError;

/// The admitted entries, ordered by `(created_at, id)`, plus their ids.
///
/// The id set and the sequence always hold exactly the same entries. The
/// only way in is [`FeedReducer`], which publishes each new state whole.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    entries: Vec<Entry>,
    ids: HashSet<EntryId>,
}

/// What an admission did to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Appended,
    Inserted,
    Duplicate,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    fn admit(&mut self, entry: Entry) -> Admission {
        if self.ids.contains(&entry.id) {
            return Admission::Duplicate;
        }

        let id = entry.id;
        let key = entry.sort_key();
        let admission = match self.entries.last() {
            // Backfilled or out-of-order: find its slot
            Some(last) if last.sort_key() > key => {
                let at = self.entries.partition_point(|e| e.sort_key() < key);
                self.entries.insert(at, entry);
                Admission::Inserted
            }
            _ => {
                self.entries.push(entry);
                Admission::Appended
            }
        };
        self.ids.insert(id);
        admission
    }
}

impl<'a> IntoIterator for &'a FeedState {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Counts from one snapshot admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotAdmission {
    pub admitted: usize,
    pub duplicates: usize,
    /// A snapshot had already been admitted; this one was dropped whole.
    pub ignored: bool,
}

/// Owns the feed state and applies admissions one at a time.
///
/// The state sits behind an `Arc` and is copied on write, so a state handed
/// out by [`FeedReducer::state`] never changes under its reader.
#[derive(Debug, Default)]
pub struct FeedReducer {
    state: Arc<FeedState>,
    snapshot_admitted: bool,
}

impl FeedReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<FeedState> {
        self.state.clone()
    }

    pub fn snapshot_admitted(&self) -> bool {
        self.snapshot_admitted
    }

    /// Merge the snapshot in. Only the first call has any effect.
    pub fn admit_snapshot(&mut self, entries: Vec<Entry>) -> SnapshotAdmission {
        if self.snapshot_admitted {
            warn!("Ignoring second snapshot of {} entries", entries.len());
            return SnapshotAdmission {
                ignored: true,
                ..Default::default()
            };
        }
        self.snapshot_admitted = true;

        let mut outcome = SnapshotAdmission::default();
        let state = Arc::make_mut(&mut self.state);
        for entry in entries {
            match state.admit(entry) {
                Admission::Duplicate => outcome.duplicates += 1,
                _ => outcome.admitted += 1,
            }
        }
        debug!(
            admitted = outcome.admitted,
            duplicates = outcome.duplicates,
            total = state.len(),
            "snapshot admitted"
        );
        outcome
    }

    /// Idempotent insert of one live entry.
    pub fn admit_live(&mut self, entry: Entry) -> Admission {
        // Checked first so a redelivery never copies the state
        if self.state.contains(entry.id) {
            debug!(id = %entry.id, "duplicate live entry");
            return Admission::Duplicate;
        }
        let id = entry.id;
        let admission = Arc::make_mut(&mut self.state).admit(entry);
        debug!(id = %id, ?admission, "live entry admitted");
        admission
    }
}

/// Where the initial load stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedPhase {
    Loading,
    Ready,
    Failed(TransientFetchError),
}

/// What the presentation layer sees: one consistent state plus the phase.
#[derive(Debug, Clone)]
pub struct FeedView {
    pub phase: FeedPhase,
    pub state: Arc<FeedState>,
}

impl FeedView {
    pub fn loading() -> Self {
        Self {
            phase: FeedPhase::Loading,
            state: Arc::new(FeedState::new()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase == FeedPhase::Ready
    }

    pub fn entries(&self) -> &[Entry] {
        self.state.entries()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Header line: "Loading...", "N messages" or the load failure.
    pub fn status_line(&self) -> String {
        match &self.phase {
            FeedPhase::Loading => "Loading...".to_string(),
            FeedPhase::Ready => format!("{} messages", self.len()),
            FeedPhase::Failed(e) => format!("Could not load messages: {}", e.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lobby_types::models::{AuthorId, EntryKind};
    use uuid::Uuid;

    const AUTHOR: Uuid = Uuid::from_u128(0x2c5e_a4c0_4067_11e9_8bad_9b1d_eb4d_3b7d);

    fn entry(id: i64, t: i64) -> Entry {
        Entry {
            id: EntryId(id),
            author_id: AuthorId(AUTHOR),
            author_handle: "tester@example.com".into(),
            body: format!("message {id}"),
            kind: EntryKind::Text,
            attachment: None,
            created_at: Utc.timestamp_opt(t, 0).unwrap(),
        }
    }

    fn ids(reducer: &FeedReducer) -> Vec<i64> {
        reducer.state().iter().map(|e| e.id.0).collect()
    }

    fn assert_consistent(state: &FeedState) {
        assert_eq!(state.entries.len(), state.ids.len());
        for e in &state.entries {
            assert!(state.ids.contains(&e.id));
        }
        assert!(state.entries.windows(2).all(|w| w[0].sort_key() < w[1].sort_key()));
    }

    #[test]
    fn duplicate_live_after_snapshot_is_suppressed() {
        let mut reducer = FeedReducer::new();
        reducer.admit_snapshot(vec![entry(1, 10), entry(2, 20)]);
        assert_eq!(reducer.admit_live(entry(2, 20)), Admission::Duplicate);
        assert_eq!(ids(&reducer), vec![1, 2]);
    }

    #[test]
    fn live_before_snapshot_survives() {
        let mut reducer = FeedReducer::new();
        assert_eq!(reducer.admit_live(entry(3, 30)), Admission::Appended);
        let outcome = reducer.admit_snapshot(vec![entry(1, 10)]);
        assert_eq!(outcome.admitted, 1);
        assert_eq!(ids(&reducer), vec![1, 3]);
    }

    #[test]
    fn admit_live_is_idempotent() {
        let mut once = FeedReducer::new();
        once.admit_live(entry(5, 50));

        let mut twice = FeedReducer::new();
        twice.admit_live(entry(5, 50));
        twice.admit_live(entry(5, 50));

        assert_eq!(entry(5, 50), entry(5, 50));
        assert_eq!(once.state().entries(), twice.state().entries());
        assert_eq!(twice.state().len(), 1);
        assert_consistent(&twice.state());
    }

    #[test]
    fn out_of_order_live_is_inserted_in_place() {
        let mut reducer = FeedReducer::new();
        reducer.admit_live(entry(1, 10));
        reducer.admit_live(entry(4, 40));
        assert_eq!(reducer.admit_live(entry(2, 20)), Admission::Inserted);
        assert_eq!(reducer.admit_live(entry(5, 50)), Admission::Appended);
        assert_eq!(ids(&reducer), vec![1, 2, 4, 5]);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let mut reducer = FeedReducer::new();
        reducer.admit_live(entry(9, 10));
        reducer.admit_live(entry(7, 10));
        reducer.admit_snapshot(vec![entry(8, 10)]);
        assert_eq!(ids(&reducer), vec![7, 8, 9]);
        assert_consistent(&reducer.state());
    }

    #[test]
    fn second_snapshot_is_ignored() {
        let mut reducer = FeedReducer::new();
        reducer.admit_snapshot(vec![entry(1, 10)]);
        let outcome = reducer.admit_snapshot(vec![entry(2, 20)]);
        assert!(outcome.ignored);
        assert_eq!(ids(&reducer), vec![1]);
    }

    #[test]
    fn published_state_is_not_mutated_by_later_admissions() {
        let mut reducer = FeedReducer::new();
        reducer.admit_live(entry(1, 10));
        let before = reducer.state();
        reducer.admit_live(entry(2, 20));
        assert_eq!(before.len(), 1);
        assert_eq!(reducer.state().len(), 2);
    }

    /// Every interleaving of a snapshot call and several live calls, with
    /// overlapping ids, ends in the same deduplicated, sorted feed.
    #[test]
    fn union_is_independent_of_admission_order() {
        enum Call {
            Snapshot(Vec<Entry>),
            Live(Entry),
        }

        let calls = || {
            vec![
                Call::Snapshot(vec![entry(1, 10), entry(2, 20), entry(4, 40)]),
                Call::Live(entry(2, 20)),
                Call::Live(entry(3, 30)),
                Call::Live(entry(5, 50)),
                Call::Live(entry(3, 30)),
            ]
        };

        let mut orders: Vec<Vec<usize>> = Vec::new();
        permutations((0..5).collect(), Vec::new(), &mut orders);
        assert_eq!(orders.len(), 120);

        for order in orders {
            let mut pending: Vec<Option<Call>> = calls().into_iter().map(Some).collect();
            let mut reducer = FeedReducer::new();
            for i in order {
                match pending[i].take().unwrap() {
                    Call::Snapshot(entries) => {
                        reducer.admit_snapshot(entries);
                    }
                    Call::Live(e) => {
                        reducer.admit_live(e);
                    }
                }
            }
            assert_eq!(ids(&reducer), vec![1, 2, 3, 4, 5]);
            assert_consistent(&reducer.state());
        }
    }

    fn permutations(remaining: Vec<usize>, prefix: Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if remaining.is_empty() {
            out.push(prefix);
            return;
        }
        for i in 0..remaining.len() {
            let mut rest = remaining.clone();
            let next = rest.remove(i);
            let mut longer = prefix.clone();
            longer.push(next);
            permutations(rest, longer, out);
        }
    }

    #[test]
    fn view_status_line() {
        let mut view = FeedView::loading();
        assert_eq!(view.status_line(), "Loading...");
        view.phase = FeedPhase::Ready;
        assert_eq!(view.status_line(), "0 messages");
        assert!(view.is_empty());
    }
}
