//! Content sniffing from magic bytes.

use std::io;
use std::path::Path;

/// Label used when the bytes match no known signature.
pub const UNKNOWN: &str = "unknown";

pub fn sniff_path(path: &Path) -> io::Result<Option<&'static str>> {
    Ok(infer::get_from_path(path)?.map(|kind| kind.mime_type()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sniff_bytes(data: &[u8]) -> Option<&'static str> {
        infer::get(data).map(|kind| kind.mime_type())
    }

    #[test]
    fn recognises_allowed_signatures() {
        assert_eq!(sniff_bytes(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n"), Some("application/pdf"));
        assert_eq!(sniff_bytes(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some("image/png"));
        assert_eq!(sniff_bytes(b"\xff\xd8\xff\xe0\0\x10JFIF\0"), Some("image/jpeg"));
        assert_eq!(sniff_bytes(b"GIF89a\x01\0\x01\0"), Some("image/gif"));
    }

    #[test]
    fn script_text_is_not_an_image() {
        let php = b"<?php echo shell_exec($_GET['cmd']); ?>";
        assert_ne!(sniff_bytes(php), Some("image/jpeg"));
    }

    #[test]
    fn sniffs_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, b"GIF87a\x01\0\x01\0").unwrap();
        assert_eq!(sniff_path(&path).unwrap(), Some("image/gif"));
    }
}
