//! Extension allow-list, claimed-name checks and storage name generation.

use crate::error::AppError;
use chrono::Utc;
use image::ImageFormat;
use rand::Rng;
use std::fmt;
use uuid::Uuid;

const STORAGE_TOKEN_LEN: usize = 16;
const MAX_DISPLAY_NAME_BYTES: usize = 255;

/// The file types accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Pdf,
    Png,
    Jpg,
    Jpeg,
    Gif,
}

impl Extension {
    /// Takes the text after the last `.` of the claimed name, case-insensitively.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Extension::Pdf),
            "png" => Some(Extension::Png),
            "jpg" => Some(Extension::Jpg),
            "jpeg" => Some(Extension::Jpeg),
            "gif" => Some(Extension::Gif),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Extension::Pdf => "pdf",
            Extension::Png => "png",
            Extension::Jpg => "jpg",
            Extension::Jpeg => "jpeg",
            Extension::Gif => "gif",
        }
    }

    /// MIME type the content of such a file must sniff as.
    pub fn expected_mime(self) -> &'static str {
        match self {
            Extension::Pdf => "application/pdf",
            Extension::Png => "image/png",
            Extension::Jpg | Extension::Jpeg => "image/jpeg",
            Extension::Gif => "image/gif",
        }
    }

    /// Image formats go through the sanitizer; documents don't.
    pub fn image_format(self) -> Option<ImageFormat> {
        match self {
            Extension::Pdf => None,
            Extension::Png => Some(ImageFormat::Png),
            Extension::Jpg | Extension::Jpeg => Some(ImageFormat::Jpeg),
            Extension::Gif => Some(ImageFormat::Gif),
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejects claimed names that try to climb out of, or replace, the storage root.
///
/// Both `/` and `\` count as separators so Windows-style names are caught on
/// every platform.
pub fn check_claimed_path(claimed: &str) -> Result<(), AppError> {
    let normalized = claimed.replace('\\', "/");
    let bytes = normalized.as_bytes();

    let absolute = normalized.starts_with('/')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':');
    let traversal = normalized.split('/').any(|segment| segment == "..");

    if absolute || traversal || normalized.contains('\0') {
        return Err(AppError::UnsafePath);
    }
    Ok(())
}

/// Builds a collision-resistant on-disk name. Only the validated extension is
/// carried over from the client.
pub fn storage_name(owner_id: Uuid, extension: Extension) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(STORAGE_TOKEN_LEN)
        .map(char::from)
        .collect();

    format!(
        "{}_{}_{}.{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        owner_id.simple(),
        token,
        extension
    )
}

/// Human-facing name kept in the record and offered as the download name.
pub fn display_name(claimed: &str, extension: Extension) -> String {
    let last = claimed.rsplit(['/', '\\']).next().unwrap_or(claimed);

    let cleaned: String = last
        .chars()
        .filter(|&c| {
            !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();

    if cleaned.is_empty() || Extension::from_filename(cleaned).is_none() {
        return format!("unnamed.{extension}");
    }

    if cleaned.len() <= MAX_DISPLAY_NAME_BYTES {
        return cleaned.to_string();
    }

    // Too long: shorten the stem and keep the validated extension.
    let budget = MAX_DISPLAY_NAME_BYTES - extension.as_str().len() - 1;
    let mut stem = String::with_capacity(budget);
    for c in cleaned.chars() {
        if stem.len() + c.len_utf8() > budget {
            break;
        }
        stem.push(c);
    }
    format!("{stem}.{extension}")
}
