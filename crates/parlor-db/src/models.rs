/// Database row types — these map directly to SQLite rows.
/// Distinct from the parlor-types wire models to keep the DB layer
/// independent; id columns stay as TEXT until resolution time.

pub struct MessageRow {
    pub id: String,
    pub room: String,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub body: String,
    pub file_url: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub user_id: String,
    pub emoji: String,
}

pub struct ReadRow {
    pub user_id: String,
    pub username: Option<String>,
}
