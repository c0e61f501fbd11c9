use std::path::Path;

use crate::error::{RemoteError, Result};
use crate::types::FileKind;

/// Extensions the service accepts, with the MIME type sent for each.
const ACCEPTED: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("xls", "application/vnd.ms-excel"),
];

/// A document picked for upload but not yet sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, inferring its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RemoteError::Validation(format!("{} has no file name", path.display())))?
            .to_string();
        let mime_type = mime_for_name(&filename).unwrap_or("application/octet-stream");
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RemoteError::Validation(format!("cannot read {}: {e}", path.display())))?;

        Ok(Self::new(filename, mime_type, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mime(&self.mime_type)
    }
}

/// MIME type for an accepted file name, by extension.
pub fn mime_for_name(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    ACCEPTED
        .iter()
        .find(|(accepted, _)| *accepted == ext)
        .map(|(_, mime)| *mime)
}

/// Client-side bounds on one upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Reject a selection the service would refuse, before any network call.
pub fn validate_selection(files: &[UploadFile], limits: &UploadLimits) -> Result<()> {
    if files.is_empty() {
        return Err(RemoteError::Validation("no files selected".to_string()));
    }
    if files.len() > limits.max_files {
        return Err(RemoteError::Validation(format!(
            "too many files: {} selected, at most {} allowed",
            files.len(),
            limits.max_files
        )));
    }
    for file in files {
        if file.kind().is_none() {
            return Err(RemoteError::Validation(format!(
                "{} is not a PDF, image or spreadsheet",
                file.filename
            )));
        }
        if file.size() > limits.max_file_bytes {
            return Err(RemoteError::Validation(format!(
                "{} is {}, larger than the {} limit",
                file.filename,
                format_file_size(file.size()),
                format_file_size(limits.max_file_bytes)
            )));
        }
    }
    Ok(())
}

/// Human-readable size, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(size: usize) -> UploadFile {
        UploadFile::new("traveler.pdf", "application/pdf", vec![0; size])
    }

    #[test]
    fn empty_selection_is_rejected() {
        let err = validate_selection(&[], &UploadLimits::default()).unwrap_err();
        assert_eq!(err, RemoteError::Validation("no files selected".into()));
    }

    #[test]
    fn unsupported_kind_is_rejected() {
        let notes = UploadFile::new("notes.txt", "text/plain", b"hi".to_vec());
        let err = validate_selection(&[pdf(10), notes], &UploadLimits::default()).unwrap_err();
        assert!(err.server_message().unwrap().contains("notes.txt"));
    }

    #[test]
    fn oversize_and_overcount_are_rejected() {
        let limits = UploadLimits {
            max_files: 2,
            max_file_bytes: 100,
        };
        assert!(validate_selection(&[pdf(101)], &limits).is_err());
        assert!(validate_selection(&[pdf(1), pdf(1), pdf(1)], &limits).is_err());
        assert!(validate_selection(&[pdf(100), pdf(1)], &limits).is_ok());
    }

    #[test]
    fn mime_inferred_from_extension() {
        assert_eq!(mime_for_name("BOM.XLSX"), mime_for_name("bom.xlsx"));
        assert_eq!(mime_for_name("board.jpeg"), Some("image/jpeg"));
        assert_eq!(mime_for_name("readme"), None);
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(50 * 1024 * 1024), "50 MB");
    }
}
