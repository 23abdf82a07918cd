//! Cost schedule upload - command, validation and row parsing.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::domain::schedule::{CostScheduleEntry, ScheduleSource};

/// Command to load an uploaded cost schedule.
#[derive(Debug, Clone)]
pub struct UploadScheduleCommand {
    /// Expected to be a non-empty array of row objects.
    pub data: JsonValue,
    /// `false` merges into the current schedule instead of replacing it.
    pub replace_existing: bool,
    pub project: Option<String>,
    pub filename: Option<String>,
    /// RFC 3339 upload time reported by the client.
    pub timestamp: Option<String>,
}

impl UploadScheduleCommand {
    pub fn replacing(data: JsonValue) -> Self {
        Self {
            data,
            replace_existing: true,
            project: None,
            filename: None,
            timestamp: None,
        }
    }
}

/// Errors that reject an upload as a whole.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("cost data must be an array of rows")]
    NotAnArray,

    #[error("cost data is empty")]
    Empty,

    #[error("no usable rows in cost data ({rejected} rejected)")]
    NoUsableRows { rejected: usize },

    #[error(transparent)]
    Coordinator(#[from] DomainError),
}

impl UploadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UploadError::NotAnArray | UploadError::Empty => ErrorCode::MalformedPayload,
            UploadError::NoUsableRows { .. } => ErrorCode::EmptySchedule,
            UploadError::Coordinator(err) => err.code,
        }
    }
}

/// Rows accepted from an upload, plus how many were skipped.
#[derive(Debug, Clone)]
pub struct ParsedSchedule {
    pub entries: Vec<CostScheduleEntry>,
    pub rejected: usize,
}

impl UploadScheduleCommand {
    /// Validates the payload shape and converts each row.
    ///
    /// Individual bad rows are skipped and counted. The upload fails only
    /// when the payload is not a non-empty array or no row is usable.
    pub fn parse(&self, default_currency: &str) -> Result<ParsedSchedule, UploadError> {
        let rows = match &self.data {
            JsonValue::Array(rows) if rows.is_empty() => return Err(UploadError::Empty),
            JsonValue::Array(rows) => rows,
            _ => return Err(UploadError::NotAnArray),
        };

        let source = ScheduleSource {
            filename: self.filename.clone(),
            uploaded_at: self
                .timestamp
                .as_deref()
                .and_then(Timestamp::parse_rfc3339)
                .unwrap_or_else(Timestamp::now),
            default_currency: default_currency.to_string(),
        };

        let mut entries = Vec::with_capacity(rows.len());
        let mut rejected = 0;
        for (index, row) in rows.iter().enumerate() {
            match CostScheduleEntry::from_upload_row(row, &source) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::debug!(row = index, error = %e, "Skipping cost row");
                    rejected += 1;
                }
            }
        }

        if entries.is_empty() {
            return Err(UploadError::NoUsableRows { rejected });
        }
        Ok(ParsedSchedule { entries, rejected })
    }
}
