use crate::db::{self, DbConnection};
use crate::error::AppError;
use crate::models::{CurrentUser, NewNote, Note};
use uuid::Uuid;

/// Escapes the characters that are significant in HTML text and attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Stores a note for `user`. Title and content are stored escaped.
pub async fn create(
    conn: &DbConnection,
    user: &CurrentUser,
    title: &str,
    content: &str,
) -> Result<Note, AppError> {
    if title.trim().is_empty() || content.trim().is_empty() {
        return Err(AppError::BadRequest("Title and content are required".into()));
    }

    let (title, content) = (escape_html(title), escape_html(content));
    let note = db::insert_note(
        conn,
        NewNote {
            user_id: user.id,
            title: &title,
            content: &content,
        },
    )
    .await?;

    tracing::info!(note_id = %note.id, user_id = %user.id, "note created");
    Ok(note)
}

pub async fn list(conn: &DbConnection, user: &CurrentUser) -> Result<Vec<Note>, AppError> {
    Ok(db::list_notes(conn, user.id).await?)
}

pub async fn delete(conn: &DbConnection, user: &CurrentUser, id: Uuid) -> Result<(), AppError> {
    let note = db::get_note(conn, id).await?.ok_or(AppError::NotFound("Note"))?;
    if note.user_id != user.id {
        tracing::warn!(note_id = %id, user_id = %user.id, "access denied to note");
        return Err(AppError::AccessDenied);
    }

    if !db::delete_note(conn, id, user.id).await? {
        return Err(AppError::NotFound("Note"));
    }
    tracing::info!(note_id = %id, user_id = %user.id, "note deleted");
    Ok(())
}
