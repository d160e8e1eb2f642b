use crate::error::AppError;
use crate::models::{NewFile, NewNote, Note, StoredFile, User};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type DbConnection = Arc<Mutex<Connection>>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS auth_tokens (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users (id)
    );
    CREATE TABLE IF NOT EXISTS admin_credentials (
        user_id TEXT PRIMARY KEY,
        FOREIGN KEY (user_id) REFERENCES users (id)
    );
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        file_path TEXT NOT NULL UNIQUE,
        uploaded_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users (id)
    );
    CREATE INDEX IF NOT EXISTS files_user_id ON files (user_id);
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users (id)
    );
    CREATE INDEX IF NOT EXISTS notes_user_id ON notes (user_id);
";

pub fn establish_connection(path: impl AsRef<Path>) -> Result<DbConnection> {
    init(Connection::open(path)?)
}

/// Fresh private database, used by tests.
pub fn in_memory() -> Result<DbConnection> {
    init(Connection::open_in_memory()?)
}

fn init(conn: Connection) -> Result<DbConnection> {
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Timestamps are stored with a fixed width so that text ordering is chronological.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn uuid_at(row: &Row<'_>, idx: usize) -> Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn datetime_at(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// Users

pub async fn create_user(
    conn: &DbConnection,
    username: &str,
    password_hash: &str,
) -> Result<Uuid, AppError> {
    let id = Uuid::new_v4();
    let result = conn.lock().await.execute(
        "INSERT INTO users (id, username, password_hash, created_at) VALUES (?, ?, ?, ?)",
        params![id.to_string(), username, password_hash, timestamp(now())],
    );

    match result {
        Ok(_) => Ok(id),
        Err(e) if is_constraint_violation(&e) => Err(AppError::UserExists),
        Err(e) => Err(e.into()),
    }
}

/// Returns `(user id, password hash)` for a username.
pub async fn find_credentials(conn: &DbConnection, username: &str) -> Result<Option<(Uuid, String)>> {
    conn.lock()
        .await
        .query_row(
            "SELECT id, password_hash FROM users WHERE username = ?",
            [username],
            |row| Ok((uuid_at(row, 0)?, row.get(1)?)),
        )
        .optional()
}

pub async fn get_user(conn: &DbConnection, id: Uuid) -> Result<Option<User>> {
    conn.lock()
        .await
        .query_row(
            "SELECT id, username, password_hash, created_at FROM users WHERE id = ?",
            [id.to_string()],
            |row| {
                Ok(User {
                    id: uuid_at(row, 0)?,
                    username: row.get(1)?,
                    password_hash: row.get(2)?,
                    created_at: datetime_at(row, 3)?,
                })
            },
        )
        .optional()
}

/// Whether the user has an entry in the `admin_credentials` side table.
pub async fn is_admin(conn: &DbConnection, user_id: Uuid) -> Result<bool> {
    conn.lock()
        .await
        .query_row(
            "SELECT 1 FROM admin_credentials WHERE user_id = ? LIMIT 1",
            [user_id.to_string()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
}

pub async fn grant_admin(conn: &DbConnection, user_id: Uuid) -> Result<()> {
    conn.lock().await.execute(
        "INSERT OR IGNORE INTO admin_credentials (user_id) VALUES (?)",
        [user_id.to_string()],
    )?;
    Ok(())
}

// Files

fn file_from_row(row: &Row<'_>) -> Result<StoredFile> {
    Ok(StoredFile {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        filename: row.get(2)?,
        file_path: row.get(3)?,
        uploaded_at: datetime_at(row, 4)?,
    })
}

pub async fn insert_file(conn: &DbConnection, new_file: NewFile<'_>) -> Result<StoredFile> {
    let file = StoredFile {
        id: Uuid::new_v4(),
        user_id: new_file.user_id,
        filename: new_file.filename.to_string(),
        file_path: new_file.file_path.to_string(),
        uploaded_at: now(),
    };

    conn.lock().await.execute(
        "INSERT INTO files (id, user_id, filename, file_path, uploaded_at) VALUES (?, ?, ?, ?, ?)",
        params![
            file.id.to_string(),
            file.user_id.to_string(),
            file.filename,
            file.file_path,
            timestamp(file.uploaded_at),
        ],
    )?;

    Ok(file)
}

pub async fn get_file(conn: &DbConnection, id: Uuid) -> Result<Option<StoredFile>> {
    conn.lock()
        .await
        .query_row(
            "SELECT id, user_id, filename, file_path, uploaded_at FROM files WHERE id = ?",
            [id.to_string()],
            file_from_row,
        )
        .optional()
}

pub async fn list_files(conn: &DbConnection, user_id: Uuid) -> Result<Vec<StoredFile>> {
    let conn = conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, filename, file_path, uploaded_at FROM files
         WHERE user_id = ? ORDER BY uploaded_at DESC, rowid DESC",
    )?;
    let files = stmt
        .query_map([user_id.to_string()], file_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(files)
}

/// Deletes the record if it belongs to `user_id`. Returns whether a row went away.
pub async fn delete_file(conn: &DbConnection, id: Uuid, user_id: Uuid) -> Result<bool> {
    let deleted = conn.lock().await.execute(
        "DELETE FROM files WHERE id = ? AND user_id = ?",
        params![id.to_string(), user_id.to_string()],
    )?;
    Ok(deleted > 0)
}

// Notes

fn note_from_row(row: &Row<'_>) -> Result<Note> {
    Ok(Note {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: datetime_at(row, 4)?,
    })
}

pub async fn insert_note(conn: &DbConnection, new_note: NewNote<'_>) -> Result<Note> {
    let note = Note {
        id: Uuid::new_v4(),
        user_id: new_note.user_id,
        title: new_note.title.to_string(),
        content: new_note.content.to_string(),
        created_at: now(),
    };

    conn.lock().await.execute(
        "INSERT INTO notes (id, user_id, title, content, created_at) VALUES (?, ?, ?, ?, ?)",
        params![
            note.id.to_string(),
            note.user_id.to_string(),
            note.title,
            note.content,
            timestamp(note.created_at),
        ],
    )?;

    Ok(note)
}

pub async fn get_note(conn: &DbConnection, id: Uuid) -> Result<Option<Note>> {
    conn.lock()
        .await
        .query_row(
            "SELECT id, user_id, title, content, created_at FROM notes WHERE id = ?",
            [id.to_string()],
            note_from_row,
        )
        .optional()
}

pub async fn list_notes(conn: &DbConnection, user_id: Uuid) -> Result<Vec<Note>> {
    let conn = conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, content, created_at FROM notes
         WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )?;
    let notes = stmt
        .query_map([user_id.to_string()], note_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(notes)
}

pub async fn delete_note(conn: &DbConnection, id: Uuid, user_id: Uuid) -> Result<bool> {
    let deleted = conn.lock().await.execute(
        "DELETE FROM notes WHERE id = ? AND user_id = ?",
        params![id.to_string(), user_id.to_string()],
    )?;
    Ok(deleted > 0)
}
