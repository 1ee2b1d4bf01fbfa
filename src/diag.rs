use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Share of failed rows above which an import is rejected wholesale.
pub const ROW_ERROR_RATE_LIMIT: f64 = 0.05;

/// Parsed rows kept in the audit record for inspection.
pub const PREVIEW_ROWS: usize = 20;

/// The stages every import passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FileIntake,
    EncodingHandling,
    CsvParse,
    HeaderValidation,
    RowNormalization,
    DbInsert,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileIntake => "file_intake",
            Self::EncodingHandling => "encoding_handling",
            Self::CsvParse => "csv_parse",
            Self::HeaderValidation => "header_validation",
            Self::RowNormalization => "row_normalization",
            Self::DbInsert => "db_insert",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A problem with a single CSV row.
///
/// Warnings describe rows that were kept with a fallback value; hard errors
/// describe rows that were dropped. Both count toward the error rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowError {
    pub row_number: usize,
    pub code: ErrorCode,
    pub message: String,
    pub warning: bool,
}

/// One normalized row, kept for eyeballing what the parser made of the file.
/// Bounded by [`PREVIEW_ROWS`]; on a wholesale rejection this is the only
/// view of the rows that did parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowPreview {
    pub row_number: usize,
    pub booking_date: NaiveDate,
    pub amount: f64,
    pub desc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    pub header_found: bool,
    pub required_missing: Vec<String>,
    pub rows_total: usize,
    pub rows_preview: Vec<RowPreview>,
    pub stages: Vec<StageReport>,
    pub row_errors: Vec<RowError>,
}

impl Diagnostics {
    pub fn stage_ok(&mut self, stage: Stage) {
        self.stages.push(StageReport { stage, ok: true, detail: None });
    }

    pub fn stage_failed(&mut self, stage: Stage, detail: impl Into<String>) {
        self.stages.push(StageReport { stage, ok: false, detail: Some(detail.into()) });
    }

    pub fn row_error(&mut self, row_number: usize, code: ErrorCode, message: impl Into<String>) {
        self.row_errors.push(RowError { row_number, code, message: message.into(), warning: false });
    }

    pub fn row_warning(&mut self, row_number: usize, code: ErrorCode, message: impl Into<String>) {
        self.row_errors.push(RowError { row_number, code, message: message.into(), warning: true });
    }

    pub fn preview_row(
        &mut self,
        row_number: usize,
        booking_date: NaiveDate,
        amount: f64,
        desc: &str,
    ) {
        if self.rows_preview.len() < PREVIEW_ROWS {
            self.rows_preview.push(RowPreview {
                row_number,
                booking_date,
                amount,
                desc: desc.to_string(),
            });
        }
    }

    pub fn dropped_rows(&self) -> usize {
        self.row_errors.iter().filter(|e| !e.warning).count()
    }

    pub fn error_rate(&self, rows_total: usize) -> f64 {
        if rows_total == 0 {
            return 0.0;
        }
        self.row_errors.len() as f64 / rows_total as f64
    }

    pub fn over_error_limit(&self, rows_total: usize) -> bool {
        self.error_rate(rows_total) > ROW_ERROR_RATE_LIMIT
    }

    /// Most frequent row error code, preferring specific parse codes over the
    /// generic `ROW_PARSE_FAILED` so the fatal error names the real problem.
    pub fn dominant_code(&self) -> ErrorCode {
        let mut counts: Vec<(ErrorCode, usize)> = Vec::new();
        for err in &self.row_errors {
            match counts.iter_mut().find(|(code, _)| *code == err.code) {
                Some((_, n)) => *n += 1,
                None => counts.push((err.code, 1)),
            }
        }
        let specific = counts
            .iter()
            .filter(|(code, _)| *code != ErrorCode::RowParseFailed)
            .max_by_key(|(_, n)| *n);
        match specific {
            Some((code, _)) => *code,
            None => ErrorCode::RowParseFailed,
        }
    }
}
