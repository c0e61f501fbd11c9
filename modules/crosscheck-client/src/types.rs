use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Sessions ---

/// Server-side lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_in_progress(self) -> bool {
        matches!(self, SessionStatus::Uploading | SessionStatus::Processing)
    }
}

/// Verdict of a cross-check, either for one check or for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_result: Option<Verdict>,
    /// Denormalized copy, only present on listing responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<UploadedFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<Vec<ValidationResult>>,
}

impl Session {
    /// The overall verdict, withheld while the session is still uploading or processing.
    pub fn verdict(&self) -> Option<Verdict> {
        if self.status.is_in_progress() {
            None
        } else {
            self.overall_result
        }
    }
}

/// Paged response of `GET /sessions/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

// --- Files ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    TravelerPdf,
    ProductImage,
    BomExcel,
}

impl FileKind {
    pub fn label(self) -> &'static str {
        match self {
            FileKind::TravelerPdf => "Traveler PDF",
            FileKind::ProductImage => "Product Image",
            FileKind::BomExcel => "BOM Excel",
        }
    }

    /// Classify a MIME type the same way the service does on upload.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("pdf") {
            Some(FileKind::TravelerPdf)
        } else if mime.contains("image") {
            Some(FileKind::ProductImage)
        } else if mime.contains("sheet") || mime.contains("excel") {
            Some(FileKind::BomExcel)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub session_id: String,
    /// Name the service stored the file under.
    pub filename: String,
    pub original_filename: String,
    pub file_type: FileKind,
    pub file_size: u64,
    pub mime_type: String,
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<serde_json::Value>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl UploadedFile {
    pub fn is_failed(&self) -> bool {
        self.processing_status == ProcessingStatus::Failed
    }
}

/// One entry of the `POST /files/upload/{session}` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUploadResponse {
    pub file_id: String,
    pub filename: String,
    pub file_type: String,
    pub status: String,
    pub message: String,
}

// --- Validation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    JobNumber,
    PartNumber,
    Revision,
    BoardSerial,
    UnitSerial,
    FlightStatus,
    FileCompleteness,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub id: String,
    pub session_id: String,
    pub check_type: CheckType,
    pub status: Verdict,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_checks: u32,
    pub passed: u32,
    pub warnings: u32,
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_result: Option<String>,
}

// --- Workflow ---

/// Coarse, server-computed phase of a session's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Uploading,
    ProcessingFiles,
    Validating,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl WorkflowStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStage::Completed | WorkflowStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStage::Uploading => "uploading",
            WorkflowStage::ProcessingFiles => "processing_files",
            WorkflowStage::Validating => "validating",
            WorkflowStage::Completed => "completed",
            WorkflowStage::Failed => "failed",
            WorkflowStage::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact per-file entry of a processing summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatusEntry {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub processing_status: String,
    #[serde(default)]
    pub has_extracted_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_files: u32,
    #[serde(default)]
    pub by_status: BTreeMap<String, u32>,
    #[serde(default)]
    pub by_type: BTreeMap<String, u32>,
    #[serde(default)]
    pub files: Vec<FileStatusEntry>,
}

/// Point-in-time projection of a session's progress. Not a stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub session_id: String,
    pub session_status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_result: Option<Verdict>,
    pub workflow_stage: WorkflowStage,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub processing_summary: ProcessingSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_summary: Option<ValidationSummary>,
}

/// Acknowledgement returned by the analyze, analyze-now and retry endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Timestamps arrive either as RFC 3339 or as offset-less ISO-8601, which the
/// service writes in UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_json(stage: &str) -> String {
        format!(
            r#"{{
                "session_id": "s-1",
                "session_status": "PROCESSING",
                "workflow_stage": "{stage}",
                "created_at": "2024-05-01T10:00:00.123456",
                "updated_at": "2024-05-01T10:00:05Z",
                "processing_summary": {{
                    "total_files": 2,
                    "by_status": {{"PROCESSING": 1, "COMPLETED": 1}},
                    "by_type": {{"TRAVELER_PDF": 1, "PRODUCT_IMAGE": 1}},
                    "files": [
                        {{"id": "f-1", "filename": "t.pdf", "file_type": "TRAVELER_PDF",
                          "processing_status": "COMPLETED", "has_extracted_data": true}}
                    ]
                }}
            }}"#
        )
    }

    #[test]
    fn workflow_status_accepts_naive_and_offset_timestamps() {
        let status: WorkflowStatus = serde_json::from_str(&status_json("validating")).unwrap();
        assert_eq!(status.workflow_stage, WorkflowStage::Validating);
        assert_eq!(status.processing_summary.by_status.get("COMPLETED"), Some(&1));
        assert_eq!(status.created_at.timestamp(), 1714557600);
        assert!(status.validation_summary.is_none());
    }

    #[test]
    fn unrecognized_stage_decodes_as_unknown() {
        let status: WorkflowStatus = serde_json::from_str(&status_json("queued")).unwrap();
        assert_eq!(status.workflow_stage, WorkflowStage::Unknown);
        assert!(!status.workflow_stage.is_terminal());
    }

    #[test]
    fn verdict_is_withheld_while_in_progress() {
        let session: Session = serde_json::from_str(
            r#"{"id":"s-1","created_at":"2024-05-01T10:00:00","updated_at":"2024-05-01T10:00:00",
                "status":"PROCESSING","overall_result":"PASS"}"#,
        )
        .unwrap();
        assert_eq!(session.overall_result, Some(Verdict::Pass));
        assert_eq!(session.verdict(), None);
    }

    #[test]
    fn file_kind_from_mime() {
        assert_eq!(FileKind::from_mime("application/pdf"), Some(FileKind::TravelerPdf));
        assert_eq!(FileKind::from_mime("image/png"), Some(FileKind::ProductImage));
        assert_eq!(
            FileKind::from_mime("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
            Some(FileKind::BomExcel)
        );
        assert_eq!(FileKind::from_mime("application/vnd.ms-excel"), Some(FileKind::BomExcel));
        assert_eq!(FileKind::from_mime("text/plain"), None);
    }

    #[test]
    fn unknown_check_type_is_tolerated() {
        let result: ValidationResult = serde_json::from_str(
            r#"{"id":"v-1","session_id":"s-1","check_type":"CAGE_CODE","status":"WARNING",
                "description":"cage code mismatch","created_at":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(result.check_type, CheckType::Other);
        assert_eq!(result.status, Verdict::Warning);
    }
}
