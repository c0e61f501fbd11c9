//! Plain-text rendering of published snapshots.

use std::fmt::Write;

use crosscheck_client::{
    format_file_size, ProcessingStatus, Session, UploadedFile, ValidationResult, Verdict,
    WorkflowStage, WorkflowStatus,
};
use crosscheck_core::{SessionScope, SessionState};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

pub fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "PASS",
        Verdict::Warning => "WARNING",
        Verdict::Fail => "FAIL",
    }
}

pub fn stage_label(stage: WorkflowStage) -> &'static str {
    match stage {
        WorkflowStage::Uploading => "Waiting for files",
        WorkflowStage::ProcessingFiles => "Processing files",
        WorkflowStage::Validating => "Cross-checking",
        WorkflowStage::Completed => "Completed",
        WorkflowStage::Failed => "Failed",
        WorkflowStage::Unknown => "Unknown",
    }
}

fn processing_label(status: ProcessingStatus) -> &'static str {
    match status {
        ProcessingStatus::Pending => "pending",
        ProcessingStatus::Processing => "processing",
        ProcessingStatus::Completed => "processed",
        ProcessingStatus::Failed => "failed",
    }
}

pub fn history(state: &SessionState) -> String {
    if state.sessions.is_empty() {
        return "No sessions yet.\n".to_string();
    }
    let mut out = format!(
        "{} of {} sessions\n",
        state.sessions.len(),
        state.sessions_total
    );
    for session in &state.sessions {
        let _ = writeln!(out, "  {}", session_line(session));
    }
    out
}

fn session_line(session: &Session) -> String {
    let verdict = session.verdict().map(verdict_label).unwrap_or("-");
    format!(
        "{}  {:<10}  {:<7}  {}",
        session.id,
        format!("{:?}", session.status).to_uppercase(),
        verdict,
        session.created_at.format(TIME_FORMAT)
    )
}

pub fn files(files: &[UploadedFile]) -> String {
    if files.is_empty() {
        return "  (no files)\n".to_string();
    }
    let mut out = String::new();
    for file in files {
        let _ = writeln!(
            out,
            "  {}  {:<28} {:<14} {:>10}  {}",
            file.id,
            file.original_filename,
            file.file_type.label(),
            format_file_size(file.file_size),
            processing_label(file.processing_status)
        );
        if let Some(error) = &file.processing_error {
            let _ = writeln!(out, "      error: {error}");
        }
    }
    out
}

pub fn progress(status: &WorkflowStatus) -> String {
    let summary = &status.processing_summary;
    let done: u32 = ["COMPLETED", "FAILED"]
        .iter()
        .filter_map(|key| summary.by_status.get(*key))
        .sum();
    format!(
        "{} ({done}/{} files processed)",
        stage_label(status.workflow_stage),
        summary.total_files
    )
}

pub fn results(scope: &SessionScope) -> String {
    if scope.validation_results.is_empty() {
        return "  (no validation results)\n".to_string();
    }
    let counts = scope.result_counts();
    let mut out = format!(
        "  {} passed, {} warnings, {} failed\n",
        counts.pass, counts.warning, counts.fail
    );
    for result in &scope.validation_results {
        out.push_str(&result_line(result));
    }
    out
}

fn result_line(result: &ValidationResult) -> String {
    let mut line = format!(
        "  [{:<7}] {:?}: {}\n",
        verdict_label(result.status),
        result.check_type,
        result.description
    );
    if let (Some(expected), Some(actual)) = (&result.expected_value, &result.actual_value) {
        let _ = writeln!(line, "            expected {expected}, found {actual}");
    }
    line
}

/// Full view of one session scope.
pub fn session(state: &SessionState, session_id: &str) -> String {
    let Some(scope) = state.scope(session_id) else {
        return format!("Session {session_id} is not loaded.\n");
    };
    let mut out = match &scope.session {
        Some(session) => format!("Session {}\n", session_line(session)),
        None => format!("Session {session_id}\n"),
    };
    if let Some(status) = &scope.workflow_status {
        let _ = writeln!(out, "Stage: {}", progress(status));
    }
    if scope.analyzing {
        out.push_str("Analysis is running.\n");
    }
    out.push_str("Files:\n");
    out.push_str(&files(&scope.files));
    out.push_str("Validation:\n");
    out.push_str(&results(scope));
    if scope.can_retry() {
        out.push_str("Some steps failed; `crosscheck retry` will reprocess them.\n");
    }
    out
}
