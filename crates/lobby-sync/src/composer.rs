use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use uuid::Uuid;

use lobby_types::blob::BlobStore;
use lobby_types::models::{AttachmentRef, EntryKind, Viewer};
use lobby_types::store::{RelationalStore, Row};

use crate::error::SendError;
use crate::wire::{self, DEFAULT_MEDIA_TYPE, ID};

/// 50 MB upload limit for attachments
pub const MAX_ATTACHMENT_BYTES: usize = 50 * 1024 * 1024;

/// Writes new entries to the store on behalf of the viewer.
///
/// Nothing is added to the feed here. A sent message shows up when the store
/// echoes it back over the live channel, like anyone else's.
pub struct Composer<S, B> {
    store: Arc<S>,
    blobs: Arc<B>,
    viewer: Viewer,
    table: String,
}

impl<S, B> Clone for Composer<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            blobs: self.blobs.clone(),
            viewer: self.viewer.clone(),
            table: self.table.clone(),
        }
    }
}

impl<S: RelationalStore, B: BlobStore> Composer<S, B> {
    pub fn new(store: Arc<S>, blobs: Arc<B>, viewer: Viewer, table: impl Into<String>) -> Self {
        Self {
            store,
            blobs,
            viewer,
            table: table.into(),
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub async fn submit_text(&self, body: &str) -> Result<(), SendError> {
        let content = body.trim();
        if content.is_empty() {
            return Err(SendError::validation("message is empty"));
        }
        self.write(wire::text_record(&self.viewer, content)).await
    }

    /// Store the blob, then write an entry pointing at it. If the blob
    /// cannot be stored no entry is written.
    pub async fn submit_attachment(
        &self,
        blob: Bytes,
        filename: &str,
        media_type: &str,
    ) -> Result<(), SendError> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(SendError::validation("attachment has no filename"));
        }
        if blob.is_empty() {
            return Err(SendError::validation("attachment is empty"));
        }
        if blob.len() > MAX_ATTACHMENT_BYTES {
            return Err(SendError::validation(format!(
                "attachment is {} bytes, limit is {}",
                blob.len(),
                MAX_ATTACHMENT_BYTES
            )));
        }

        let media_type = match media_type.trim() {
            "" => DEFAULT_MEDIA_TYPE,
            given => given,
        };
        let path = format!(
            "{}/{}-{}",
            self.viewer.author_id,
            Uuid::new_v4(),
            sanitize_filename(filename)
        );

        let size = blob.len();
        self.blobs
            .put(&path, blob)
            .await
            .map_err(SendError::storage)?;
        info!("Stored attachment {} ({} bytes)", path, size);

        let attachment = AttachmentRef {
            url: self.blobs.public_url_for(&path),
            filename: filename.to_string(),
            media_type: media_type.to_string(),
        };
        let kind = EntryKind::from_media_type(media_type);
        let body = placeholder_body(kind, filename);

        self.write(wire::attachment_record(&self.viewer, &body, kind, &attachment))
            .await
    }

    async fn write(&self, record: Row) -> Result<(), SendError> {
        let stored = self
            .store
            .insert(&self.table, record)
            .await
            .map_err(SendError::write)?;
        debug!(id = ?stored.get(ID), "entry written, awaiting echo");
        Ok(())
    }
}

/// Body shown in place of the attachment itself.
pub fn placeholder_body(kind: EntryKind, filename: &str) -> String {
    match kind {
        EntryKind::Image => format!("📷 {}", filename),
        EntryKind::File | EntryKind::Text => format!("📎 {}", filename),
    }
}

/// Keep blob paths to one plain segment.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
