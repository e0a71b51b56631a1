//! Mapping between store rows / change payloads and typed entries.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use lobby_types::models::{
    AttachmentRef, AuthorId, AuthorProfile, Entry, EntryId, EntryKind, Viewer, local_part,
};
use lobby_types::store::Row;

use crate::error::DecodeError;

pub const ID: &str = "id";
pub const USER_ID: &str = "user_id";
pub const USER_EMAIL: &str = "user_email";
pub const CONTENT: &str = "content";
pub const MESSAGE_TYPE: &str = "message_type";
pub const FILE_URL: &str = "file_url";
pub const FILE_NAME: &str = "file_name";
pub const FILE_TYPE: &str = "file_type";
pub const CREATED_AT: &str = "created_at";

pub const USERNAME: &str = "username";
pub const EMAIL: &str = "email";
pub const AVATAR_URL: &str = "avatar_url";

pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Decode the JSON text of a change event.
pub fn decode_payload(payload: &str) -> Result<Entry, DecodeError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| DecodeError::Json(e.to_string()))?;
    match value {
        Value::Object(row) => decode_row(&row),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Decode a message row. `id`, `user_id` and `created_at` are required; an
/// entry without them is never admitted.
pub fn decode_row(row: &Row) -> Result<Entry, DecodeError> {
    let id = match row.get(ID) {
        None | Some(Value::Null) => return Err(DecodeError::MissingField(ID)),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| invalid(ID, "not an integer"))?,
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|e| invalid(ID, e))?,
        Some(_) => return Err(invalid(ID, "unexpected type")),
    };

    let author_id = Uuid::parse_str(required_str(row, USER_ID)?)
        .map(AuthorId)
        .map_err(|e| invalid(USER_ID, e))?;

    let raw_created = required_str(row, CREATED_AT)?;
    let created_at = parse_timestamp(raw_created)
        .ok_or_else(|| invalid(CREATED_AT, format!("unparseable '{}'", raw_created)))?;

    let attachment = non_empty(row, FILE_URL).map(|url| AttachmentRef {
        url: url.to_string(),
        filename: non_empty(row, FILE_NAME)
            .map(str::to_string)
            .unwrap_or_else(|| filename_from_url(url)),
        media_type: non_empty(row, FILE_TYPE)
            .unwrap_or(DEFAULT_MEDIA_TYPE)
            .to_string(),
    });

    let kind = match non_empty(row, MESSAGE_TYPE) {
        Some(raw) => EntryKind::parse(raw)
            .ok_or_else(|| invalid(MESSAGE_TYPE, format!("unknown kind '{}'", raw)))?,
        None => attachment
            .as_ref()
            .map(|a| EntryKind::from_media_type(&a.media_type))
            .unwrap_or_default(),
    };

    Ok(Entry {
        id: EntryId(id),
        author_id,
        author_handle: optional_str(row, USER_EMAIL).unwrap_or_default().to_string(),
        body: optional_str(row, CONTENT).unwrap_or_default().to_string(),
        kind,
        attachment,
        created_at,
    })
}

/// Decode a profile row. The display handle is the username, or the local
/// part of the email when no username was stored.
pub fn decode_profile(row: &Row) -> Result<AuthorProfile, DecodeError> {
    let author_id = Uuid::parse_str(required_str(row, USER_ID)?)
        .map(AuthorId)
        .map_err(|e| invalid(USER_ID, e))?;

    let display_handle = non_empty(row, USERNAME)
        .or_else(|| non_empty(row, EMAIL).and_then(local_part))
        .ok_or(DecodeError::MissingField(USERNAME))?
        .to_string();

    Ok(AuthorProfile {
        author_id,
        display_handle,
        avatar_url: non_empty(row, AVATAR_URL).map(str::to_string),
    })
}

/// Record for a plain text message.
pub fn text_record(viewer: &Viewer, body: &str) -> Row {
    let mut row = Row::new();
    row.insert(USER_ID.into(), Value::from(viewer.author_id.to_string()));
    row.insert(USER_EMAIL.into(), Value::from(viewer.email.as_str()));
    row.insert(CONTENT.into(), Value::from(body));
    row.insert(MESSAGE_TYPE.into(), Value::from(EntryKind::Text.as_str()));
    row
}

/// Record for a message backed by an uploaded blob.
pub fn attachment_record(
    viewer: &Viewer,
    body: &str,
    kind: EntryKind,
    attachment: &AttachmentRef,
) -> Row {
    let mut row = text_record(viewer, body);
    row.insert(MESSAGE_TYPE.into(), Value::from(kind.as_str()));
    row.insert(FILE_URL.into(), Value::from(attachment.url.as_str()));
    row.insert(FILE_NAME.into(), Value::from(attachment.filename.as_str()));
    row.insert(FILE_TYPE.into(), Value::from(attachment.media_type.as_str()));
    row
}

/// RFC 3339, or SQLite's `YYYY-MM-DD HH:MM:SS[.fff]` read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}

fn required_str<'a>(row: &'a Row, field: &'static str) -> Result<&'a str, DecodeError> {
    match row.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}

fn optional_str<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    row.get(field).and_then(Value::as_str)
}

fn non_empty<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    optional_str(row, field)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn filename_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("attachment")
        .to_string()
}

fn invalid(field: &'static str, reason: impl ToString) -> DecodeError {
    DecodeError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const AUTHOR: &str = "6f1c1f38-8a3e-4c55-9d43-2b8f3f1b8a01";

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn decodes_text_row() {
        let entry = decode_row(&row(json!({
            "id": 7,
            "user_id": AUTHOR,
            "user_email": "alice@example.com",
            "content": "hello",
            "created_at": "2024-05-01T10:00:00.250Z",
        })))
        .unwrap();

        assert_eq!(entry.id, EntryId(7));
        assert_eq!(entry.author_id.to_string(), AUTHOR);
        assert_eq!(entry.kind, EntryKind::Text);
        assert_eq!(entry.sender_name(), "alice");
        assert!(entry.attachment.is_none());
        assert_eq!(
            entry.created_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
                + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn decodes_attachment_and_infers_kind() {
        let entry = decode_payload(
            &json!({
                "id": "8",
                "user_id": AUTHOR,
                "content": "📷 cat.png",
                "file_url": "http://host/blobs/a/cat.png",
                "file_type": "image/png",
                "created_at": "2024-05-01 10:00:00",
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(entry.id, EntryId(8));
        assert_eq!(entry.kind, EntryKind::Image);
        let attachment = entry.attachment.unwrap();
        assert_eq!(attachment.filename, "cat.png");
        assert_eq!(attachment.media_type, "image/png");
    }

    #[test]
    fn rejects_partial_rows() {
        let missing_id = row(json!({ "user_id": AUTHOR, "created_at": "2024-05-01T10:00:00Z" }));
        assert_eq!(decode_row(&missing_id), Err(DecodeError::MissingField(ID)));

        let null_created = row(json!({ "id": 1, "user_id": AUTHOR, "created_at": null }));
        assert_eq!(
            decode_row(&null_created),
            Err(DecodeError::MissingField(CREATED_AT))
        );

        let bad_author = row(json!({ "id": 1, "user_id": "nope", "created_at": "2024-05-01T10:00:00Z" }));
        assert!(matches!(
            decode_row(&bad_author),
            Err(DecodeError::InvalidField { field: USER_ID, .. })
        ));

        let bad_kind = row(json!({
            "id": 1, "user_id": AUTHOR, "created_at": "2024-05-01T10:00:00Z", "message_type": "video"
        }));
        assert!(matches!(
            decode_row(&bad_kind),
            Err(DecodeError::InvalidField { field: MESSAGE_TYPE, .. })
        ));
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(matches!(decode_payload("{oops"), Err(DecodeError::Json(_))));
        assert_eq!(decode_payload("[1,2]"), Err(DecodeError::NotAnObject));
    }

    #[test]
    fn profile_falls_back_to_email_local_part() {
        let profile = decode_profile(&row(json!({
            "user_id": AUTHOR, "username": "", "email": "erin@example.com", "avatar_url": null
        })))
        .unwrap();
        assert_eq!(profile.display_handle, "erin");
        assert!(profile.avatar_url.is_none());

        let nameless = row(json!({ "user_id": AUTHOR }));
        assert_eq!(
            decode_profile(&nameless),
            Err(DecodeError::MissingField(USERNAME))
        );
    }

    #[test]
    fn records_carry_viewer_identity() {
        let viewer = Viewer::new(AuthorId(Uuid::parse_str(AUTHOR).unwrap()), "frank@example.com");
        let attachment = AttachmentRef {
            url: "http://host/blobs/x/report.pdf".into(),
            filename: "report.pdf".into(),
            media_type: "application/pdf".into(),
        };
        let record = attachment_record(&viewer, "📎 report.pdf", EntryKind::File, &attachment);

        assert_eq!(record[USER_ID], json!(AUTHOR));
        assert_eq!(record[USER_EMAIL], json!("frank@example.com"));
        assert_eq!(record[MESSAGE_TYPE], json!("file"));
        assert_eq!(record[FILE_NAME], json!("report.pdf"));
        assert!(!record.contains_key(ID));
    }
}
