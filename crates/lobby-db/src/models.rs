/// Table layouts the store will accept queries and inserts for.
/// Column names are only ever taken from here when building SQL.
#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    /// Unique key, used to break ordering ties.
    pub key: &'static str,
    pub columns: &'static [&'static str],
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&'static str> {
        self.columns.iter().copied().find(|c| *c == name)
    }
}

pub static MESSAGES: TableSchema = TableSchema {
    name: "messages",
    key: "id",
    columns: &[
        "id",
        "user_id",
        "user_email",
        "content",
        "message_type",
        "file_url",
        "file_name",
        "file_type",
        "created_at",
    ],
};

pub static PROFILES: TableSchema = TableSchema {
    name: "profiles",
    key: "user_id",
    columns: &["user_id", "username", "email", "avatar_url", "created_at"],
};

pub fn schema_for(table: &str) -> Option<&'static TableSchema> {
    match table {
        "messages" => Some(&MESSAGES),
        "profiles" => Some(&PROFILES),
        _ => None,
    }
}
