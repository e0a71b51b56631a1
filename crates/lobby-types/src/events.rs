use serde::{Deserialize, Serialize};

/// Kind of row change announced on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscription wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => *wanted == kind,
        }
    }
}

/// A change event as it comes off the wire. The record is still JSON text;
/// decoding it into a typed entry is the subscriber's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChange {
    /// Table the change happened on.
    pub topic: String,
    pub kind: ChangeKind,
    pub payload: String,
}
