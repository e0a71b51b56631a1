use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned message id. Sortable, and monotonic within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub Uuid);

#[allow(clippy::new_without_default)]
impl AuthorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Text,
    Image,
    File,
}

impl EntryKind {
    /// `image/*` media types render inline, everything else is a file.
    pub fn from_media_type(media_type: &str) -> Self {
        if media_type.trim().to_ascii_lowercase().starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Retrievable reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
    pub media_type: String,
}

/// One conversation message as confirmed by the store.
///
/// Entries are immutable once created. `created_at` is the authoritative
/// ordering key; `id` breaks ties between identical timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub author_id: AuthorId,
    /// Email or handle of the author, denormalized at write time.
    pub author_handle: String,
    pub body: String,
    pub kind: EntryKind,
    pub attachment: Option<AttachmentRef>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn sort_key(&self) -> (DateTime<Utc>, EntryId) {
        (self.created_at, self.id)
    }

    pub fn is_own(&self, viewer: &Viewer) -> bool {
        self.author_id == viewer.author_id
    }

    /// Name shown above a bubble when no profile has been resolved yet.
    pub fn sender_name(&self) -> &str {
        local_part(&self.author_handle).unwrap_or("user")
    }

    /// `HH:MM` in the viewer's local time zone.
    pub fn pretty_time(&self) -> String {
        self.created_at.with_timezone(&Local).format("%H:%M").to_string()
    }
}

/// Display metadata for an author, owned by the profile cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub author_id: AuthorId,
    pub display_handle: String,
    pub avatar_url: Option<String>,
}

impl AuthorProfile {
    /// Profile synthesized from the handle denormalized onto an entry.
    pub fn fallback(author_id: AuthorId, handle: &str) -> Self {
        Self {
            author_id,
            display_handle: local_part(handle).unwrap_or("user").to_string(),
            avatar_url: None,
        }
    }

    pub fn initial(&self) -> char {
        avatar_initial(&self.display_handle)
    }
}

/// The single identity a session is viewed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub author_id: AuthorId,
    pub email: String,
}

impl Viewer {
    pub fn new(author_id: AuthorId, email: impl Into<String>) -> Self {
        Self {
            author_id,
            email: email.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        local_part(&self.email).unwrap_or("User")
    }
}

/// The part of an email before `@`, or the whole handle if there is no `@`.
pub fn local_part(handle: &str) -> Option<&str> {
    let local = handle.split('@').next().unwrap_or_default().trim();
    if local.is_empty() { None } else { Some(local) }
}

pub fn avatar_initial(name: &str) -> char {
    name.chars().flat_map(char::to_uppercase).next().unwrap_or('?')
}
