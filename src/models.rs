use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The authenticated caller, resolved once per request and passed on explicitly.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub is_admin: bool,
}

/// A validated upload. `file_path` is relative to the storage root and is
/// always a machine-generated name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewFile<'a> {
    pub user_id: Uuid,
    pub filename: &'a str,
    pub file_path: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewNote<'a> {
    pub user_id: Uuid,
    pub title: &'a str,
    pub content: &'a str,
}
