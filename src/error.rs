use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable codes for everything that can go wrong during an
/// import. Collaborators branch on these, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FileEmpty,
    FileTooLarge,
    EncodingDetectFailed,
    CsvParseFailed,
    DelimiterMismatch,
    HeaderMissingRequired,
    RowParseFailed,
    DateParseFailed,
    AmountParseFailed,
    DbInsertFailed,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileEmpty => "FILE_EMPTY",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::EncodingDetectFailed => "ENCODING_DETECT_FAILED",
            Self::CsvParseFailed => "CSV_PARSE_FAILED",
            Self::DelimiterMismatch => "DELIMITER_MISMATCH",
            Self::HeaderMissingRequired => "HEADER_MISSING_REQUIRED",
            Self::RowParseFailed => "ROW_PARSE_FAILED",
            Self::DateParseFailed => "DATE_PARSE_FAILED",
            Self::AmountParseFailed => "AMOUNT_PARSE_FAILED",
            Self::DbInsertFailed => "DB_INSERT_FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Short actionable hint shown next to every error of this code.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::FileEmpty => "The file has no content. Re-export it from your bank.",
            Self::FileTooLarge => "Split the export into smaller date ranges and retry.",
            Self::EncodingDetectFailed => {
                "Re-export the file as UTF-8 or Windows-1252; it appears corrupted."
            }
            Self::CsvParseFailed => {
                "The file is not well-formed CSV. Re-export it without manual edits."
            }
            Self::DelimiterMismatch => {
                "The file does not use the delimiter this bank format requires. \
                 Check your regional CSV export settings."
            }
            Self::HeaderMissingRequired => {
                "One or more required columns are missing. Export the full \
                 unmodified statement."
            }
            Self::RowParseFailed => "Some rows could not be read. Check the listed line numbers.",
            Self::DateParseFailed => {
                "Dates must use day.month.year. Check the listed line numbers."
            }
            Self::AmountParseFailed => {
                "Amounts must use the bank's decimal-comma format (e.g. -609,58)."
            }
            Self::DbInsertFailed => "Some rows could not be stored. Retry the import.",
            Self::Unknown => {
                "Unrecognized export format. Supported: Sparkasse, Amex, Miles & More."
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable error surface handed to collaborators (UI, logs) as part of
/// an import outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    pub hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("{message}")]
    Fatal {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl ImportError {
    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Fatal {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn fatal_with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::Fatal {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Fatal { code, .. } => *code,
            Self::Io(_) => ErrorCode::Unknown,
            Self::Csv(_) => ErrorCode::CsvParseFailed,
            Self::Settings(_) => ErrorCode::Unknown,
            Self::Db(_) => ErrorCode::DbInsertFailed,
            Self::Other(_) => ErrorCode::Unknown,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        let code = self.code();
        let details = match self {
            Self::Fatal { details, .. } => details.clone(),
            _ => None,
        };
        ErrorInfo {
            code,
            message: self.to_string(),
            hint: code.hint().to_string(),
            details,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DelimiterMismatch).unwrap();
        assert_eq!(json, "\"DELIMITER_MISMATCH\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::DelimiterMismatch);
    }

    #[test]
    fn test_fatal_carries_code_and_hint() {
        let err = ImportError::fatal(ErrorCode::FileEmpty, "empty upload");
        assert_eq!(err.code(), ErrorCode::FileEmpty);
        let info = err.to_info();
        assert_eq!(info.code, ErrorCode::FileEmpty);
        assert_eq!(info.message, "empty upload");
        assert!(!info.hint.is_empty());
    }

    #[test]
    fn test_every_code_has_a_hint() {
        let codes = [
            ErrorCode::FileEmpty,
            ErrorCode::FileTooLarge,
            ErrorCode::EncodingDetectFailed,
            ErrorCode::CsvParseFailed,
            ErrorCode::DelimiterMismatch,
            ErrorCode::HeaderMissingRequired,
            ErrorCode::RowParseFailed,
            ErrorCode::DateParseFailed,
            ErrorCode::AmountParseFailed,
            ErrorCode::DbInsertFailed,
            ErrorCode::Unknown,
        ];
        for code in codes {
            assert!(!code.hint().is_empty(), "{} lacks a hint", code.as_str());
        }
    }
}
