use std::collections::BTreeMap;

use csv::ReaderBuilder;
use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};

use crate::export;
use crate::importer::{delimiter_mismatch, MAX_FILE_BYTES};

/// One validated data row, keyed by template header.
pub type ContractRow = BTreeMap<String, String>;

pub const PREVIEW_ROWS: usize = 20;

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// The bulk CSV datasets exchanged with spreadsheet users. Header text and
/// order are part of the template contract and never localized or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Classification,
    AliasesKeyDesc,
    AliasesAssets,
}

pub const CLASSIFICATION_HEADERS: [&str; 9] = [
    "App classificação",
    "Nível_1_PT",
    "Nível_2_PT",
    "Nível_3_PT",
    "Key_words",
    "Key_words_negative",
    "Receita/Despesa",
    "Fixo/Variável",
    "Recorrente",
];

pub const ALIASES_KEY_DESC_HEADERS: [&str; 3] = ["key_desc", "simple_desc", "alias_desc"];

pub const ALIASES_ASSETS_HEADERS: [&str; 4] = [
    "Alias_Desc",
    "Key_words_alias",
    "URL_icon_internet",
    "Logo_local_path",
];

impl Dataset {
    pub const DELIMITER: char = ';';

    pub fn key(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::AliasesKeyDesc => "aliases_key_desc",
            Self::AliasesAssets => "aliases_assets",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classification" => Some(Self::Classification),
            "aliases_key_desc" => Some(Self::AliasesKeyDesc),
            "aliases_assets" => Some(Self::AliasesAssets),
            _ => None,
        }
    }

    pub fn expected_headers(&self) -> &'static [&'static str] {
        match self {
            Self::Classification => &CLASSIFICATION_HEADERS,
            Self::AliasesKeyDesc => &ALIASES_KEY_DESC_HEADERS,
            Self::AliasesAssets => &ALIASES_ASSETS_HEADERS,
        }
    }
}

// ---------------------------------------------------------------------------
// Reason codes
// ---------------------------------------------------------------------------

/// Machine-readable rejection reasons. Callers branch on these, never on the
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    FileNotCsv,
    FileTooLarge,
    EncodingUnsupported,
    DecodeCorruption,
    DelimiterInconsistent,
    HeaderMismatch,
    RowShapeInvalid,
    QuotingParseError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotCsv => "FILE_NOT_CSV",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::EncodingUnsupported => "ENCODING_UNSUPPORTED",
            Self::DecodeCorruption => "DECODE_CORRUPTION",
            Self::DelimiterInconsistent => "DELIMITER_INCONSISTENT",
            Self::HeaderMismatch => "HEADER_MISMATCH",
            Self::RowShapeInvalid => "ROW_SHAPE_INVALID",
            Self::QuotingParseError => "QUOTING_PARSE_ERROR",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::FileNotCsv => "Not a CSV file.",
            Self::FileTooLarge => "File is too large to import.",
            Self::EncodingUnsupported => "Unsupported encoding. Save the file as UTF-8.",
            Self::DecodeCorruption => "The file contains corrupted characters.",
            Self::DelimiterInconsistent => {
                "Inconsistent delimiter. The CSV must use a single separator."
            }
            Self::HeaderMismatch => "Template mismatch. The headers do not match.",
            Self::RowShapeInvalid => {
                "Some rows have a different column count than the header."
            }
            Self::QuotingParseError => "Could not read the CSV. Quotes or line breaks are invalid.",
        }
    }

    pub fn fixes(&self) -> &'static [&'static str] {
        match self {
            Self::FileNotCsv => &["Re-export the data as CSV.", "Do not upload Excel (.xlsx)."],
            Self::FileTooLarge => &[
                "Split the file into smaller parts.",
                "Remove unneeded rows.",
            ],
            Self::EncodingUnsupported => &[
                "In Excel: Save As, CSV UTF-8.",
                "Avoid copy-pasting from other sources.",
            ],
            Self::DecodeCorruption => &[
                "Re-export the original CSV.",
                "Avoid editing in unreliable editors.",
            ],
            Self::DelimiterInconsistent => &[
                "Use the template delimiter (;).",
                "Re-export without mixing separators.",
            ],
            Self::HeaderMismatch => &[
                "Download the template again.",
                "Do not rename or translate columns.",
            ],
            Self::RowShapeInvalid => &[
                "Check for extra or missing separators.",
                "Re-export the CSV from the template.",
            ],
            Self::QuotingParseError => &[
                "Avoid line breaks inside cells.",
                "Re-export the CSV from the template.",
            ],
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HeaderDiff {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub order_mismatch: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowErrorSample {
    pub row_number: usize,
    pub message: String,
    pub row: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ContractReport {
    pub success: bool,
    pub dataset: Dataset,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_delimiter: Option<char>,
    pub header_found: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_diff: Option<HeaderDiff>,
    pub rows_total: usize,
    pub rows_valid: usize,
    pub preview: Vec<ContractRow>,
    pub row_errors: Vec<RowErrorSample>,
    pub reason_codes: Vec<ReasonCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fixes: Vec<String>,
    /// Full validated row set, for callers that go on to apply the import.
    #[serde(skip)]
    pub rows: Vec<ContractRow>,
    /// Canonical re-export of the accepted rows.
    #[serde(skip)]
    pub canonical_csv: Option<String>,
}

impl ContractReport {
    fn new(dataset: Dataset) -> Self {
        Self {
            success: false,
            dataset,
            detected_encoding: None,
            detected_delimiter: None,
            header_found: Vec::new(),
            header_diff: None,
            rows_total: 0,
            rows_valid: 0,
            preview: Vec::new(),
            row_errors: Vec::new(),
            reason_codes: Vec::new(),
            message: None,
            fixes: Vec::new(),
            rows: Vec::new(),
            canonical_csv: None,
        }
    }

    fn finish(mut self) -> Self {
        self.success = self.reason_codes.is_empty();
        if let Some(primary) = self.reason_codes.first() {
            self.message = Some(primary.message().to_string());
            self.fixes = primary.fixes().iter().map(|f| f.to_string()).collect();
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Template decode is stricter than the statement pipeline: any replacement
/// character rejects the file instead of passing a corruption ratio.
fn decode_template(bytes: &[u8]) -> (String, &'static str) {
    let (body, bom) = match bytes {
        [0xef, 0xbb, 0xbf, rest @ ..] => (rest, true),
        _ => (bytes, false),
    };
    match std::str::from_utf8(body) {
        Ok(text) => (
            text.to_string(),
            if bom { "utf-8-bom" } else { "utf-8" },
        ),
        Err(_) => {
            let (cow, _, _) = WINDOWS_1252.decode(body);
            (cow.into_owned(), "windows-1252")
        }
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Quote state over the whole file; an unterminated quoted cell at EOF is
/// the one quoting failure the lenient csv reader would otherwise swallow.
fn has_unterminated_quote(text: &str) -> bool {
    let mut in_quotes = false;
    for ch in text.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        }
    }
    in_quotes
}

fn header_diff(expected: &[&str], found: &[String]) -> HeaderDiff {
    let missing = expected
        .iter()
        .filter(|h| !found.iter().any(|f| f == *h))
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let unexpected = found
        .iter()
        .filter(|f| !expected.contains(&f.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    let order_mismatch = missing.is_empty()
        && unexpected.is_empty()
        && found.iter().map(String::as_str).ne(expected.iter().copied());
    HeaderDiff {
        missing,
        unexpected,
        order_mismatch,
    }
}

/// Validate one uploaded template file against its dataset contract. Never
/// touches storage; the caller decides whether to apply the returned rows.
pub fn validate(dataset: Dataset, bytes: &[u8], filename: &str) -> ContractReport {
    let mut report = ContractReport::new(dataset);

    if !filename.to_lowercase().ends_with(".csv") {
        report.reason_codes.push(ReasonCode::FileNotCsv);
    }
    if bytes.len() > MAX_FILE_BYTES {
        report.reason_codes.push(ReasonCode::FileTooLarge);
    }
    if !report.reason_codes.is_empty() {
        return report.finish();
    }

    let (decoded, encoding) = decode_template(bytes);
    report.detected_encoding = Some(encoding.to_string());
    let text = normalize_newlines(&decoded);
    if text.contains('\u{fffd}') {
        report.reason_codes.push(ReasonCode::DecodeCorruption);
        return report.finish();
    }

    report.detected_delimiter = Some(Dataset::DELIMITER);
    if delimiter_mismatch(&text, Dataset::DELIMITER).is_some() {
        report.reason_codes.push(ReasonCode::DelimiterInconsistent);
        return report.finish();
    }

    if has_unterminated_quote(&text) {
        report.reason_codes.push(ReasonCode::QuotingParseError);
        return report.finish();
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(Dataset::DELIMITER as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let records: Vec<csv::StringRecord> = match reader.records().collect() {
        Ok(records) => records,
        Err(_) => {
            report.reason_codes.push(ReasonCode::QuotingParseError);
            return report.finish();
        }
    };

    if records.is_empty() {
        report.reason_codes.push(ReasonCode::RowShapeInvalid);
        return report.finish();
    }

    report.header_found = records[0].iter().map(|c| c.to_string()).collect();
    report.rows_total = records.len() - 1;

    let expected = dataset.expected_headers();
    let diff = header_diff(expected, &report.header_found);
    let mismatched =
        !diff.missing.is_empty() || !diff.unexpected.is_empty() || diff.order_mismatch;
    report.header_diff = Some(diff);
    if mismatched {
        report.reason_codes.push(ReasonCode::HeaderMismatch);
        return report.finish();
    }

    let mut rows: Vec<ContractRow> = Vec::new();
    for (idx, record) in records[1..].iter().enumerate() {
        if record.len() != report.header_found.len() {
            report.row_errors.push(RowErrorSample {
                row_number: idx + 2,
                message: format!(
                    "expected {} columns, found {}",
                    report.header_found.len(),
                    record.len()
                ),
                row: record.iter().map(|c| c.to_string()).collect(),
            });
            continue;
        }
        let row: ContractRow = report
            .header_found
            .iter()
            .cloned()
            .zip(record.iter().map(|c| c.to_string()))
            .collect();
        rows.push(row);
    }

    report.rows_valid = rows.len();
    if !report.row_errors.is_empty() {
        report.row_errors.truncate(PREVIEW_ROWS);
        report.reason_codes.push(ReasonCode::RowShapeInvalid);
        return report.finish();
    }

    report.preview = rows.iter().take(PREVIEW_ROWS).cloned().collect();
    report.canonical_csv = Some(export::build_csv(dataset, &rows));
    report.rows = rows;
    report.finish()
}
