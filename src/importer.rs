use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::NaiveDate;
use log::{debug, warn};

use crate::decode::{decode, Encoding, REPLACEMENT_RATIO_LIMIT};
use crate::detect::{detect_format, Format};
use crate::diag::{Diagnostics, Stage};
use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::key::{build_key, merchant_desc};
use crate::models::{ParsedTransaction, Source};
use crate::textnorm::{fold_header, last4, normalize_desc};

pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

const DELIMITER_SAMPLE_LINES: usize = 25;
const SINGLE_COLUMN_SHARE_LIMIT: f64 = 0.8;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Day-month-year with `.` or `/` separators, as the bank exports write
/// them. Two-digit years pivot at 50: `<50` becomes 20xx, otherwise 19xx.
pub fn parse_dialect_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parts: Vec<&str> = raw.split(['.', '/']).collect();
    if parts.len() != 3 {
        return None;
    }
    let day: u32 = parts[0].trim().parse().ok()?;
    let month: u32 = parts[1].trim().parse().ok()?;
    let mut year: i32 = parts[2].trim().parse().ok()?;
    if year < 100 {
        year += if year < 50 { 2000 } else { 1900 };
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// German locale amount: `.` is a thousands separator, `,` the decimal mark.
pub fn parse_german_amount(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.replace('.', "").replace(',', ".").parse::<f64>().ok()
}

fn join_desc(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" -- ")
}

/// First non-empty candidate that is not the SEPA placeholder.
fn pick_reference(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty() && !c.eq_ignore_ascii_case("NOTPROVIDED"))
        .map(str::to_string)
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of running the full parse pipeline over one file. Fatal stage
/// failures land in `error` with `success == false` and no transactions;
/// per-row problems below the rate limit leave `success == true` with the
/// surviving rows and the failures listed in `errors` and `diagnostics`.
#[derive(Debug)]
pub struct ParseOutcome {
    pub success: bool,
    pub transactions: Vec<ParsedTransaction>,
    pub errors: Vec<String>,
    pub rows_total: usize,
    pub rows_imported: usize,
    pub month_affected: Option<String>,
    pub format: Option<Format>,
    pub diagnostics: Diagnostics,
    pub error: Option<ErrorInfo>,
}

fn failed(
    diagnostics: Diagnostics,
    format: Option<Format>,
    code: ErrorCode,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> ParseOutcome {
    let message = message.into();
    warn!("import failed: {} ({})", message, code.as_str());
    ParseOutcome {
        success: false,
        transactions: Vec::new(),
        errors: vec![message.clone()],
        rows_total: 0,
        rows_imported: 0,
        month_affected: None,
        format,
        diagnostics,
        error: Some(ErrorInfo {
            code,
            message,
            hint: code.hint().to_string(),
            details,
        }),
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub fn parse_file(
    path: &Path,
    import_date: NaiveDate,
    encoding_hint: Option<Encoding>,
    format_override: Option<Format>,
) -> Result<ParseOutcome> {
    let bytes = std::fs::read(path)?;
    Ok(parse_bytes(&bytes, import_date, encoding_hint, format_override))
}

/// Pure pipeline: bytes in, canonical rows and diagnostics out. No I/O and
/// no shared state, so callers can run several files in parallel.
pub fn parse_bytes(
    bytes: &[u8],
    import_date: NaiveDate,
    encoding_hint: Option<Encoding>,
    format_override: Option<Format>,
) -> ParseOutcome {
    let mut diag = Diagnostics::default();

    if bytes.is_empty() {
        diag.stage_failed(Stage::FileIntake, "file is empty");
        return failed(diag, None, ErrorCode::FileEmpty, "file is empty", None);
    }
    if bytes.len() > MAX_FILE_BYTES {
        diag.stage_failed(Stage::FileIntake, "file exceeds size limit");
        return failed(
            diag,
            None,
            ErrorCode::FileTooLarge,
            format!("file is {} bytes, limit is {}", bytes.len(), MAX_FILE_BYTES),
            Some(serde_json::json!({ "size": bytes.len(), "limit": MAX_FILE_BYTES })),
        );
    }
    diag.stage_ok(Stage::FileIntake);

    let decoded = match decode(bytes, encoding_hint, REPLACEMENT_RATIO_LIMIT) {
        Ok(d) => d,
        Err(e) => {
            diag.stage_failed(Stage::EncodingHandling, e.to_string());
            let info = e.to_info();
            return failed(diag, None, info.code, info.message, info.details);
        }
    };
    diag.encoding = Some(decoded.encoding.as_str().to_string());
    diag.stage_ok(Stage::EncodingHandling);

    let format = match format_override.or_else(|| detect_format(&decoded.text)) {
        Some(f) => f,
        None => {
            diag.stage_failed(Stage::CsvParse, "no known format marker in the leading lines");
            return failed(
                diag,
                None,
                ErrorCode::Unknown,
                "unrecognized export format; expected Sparkasse, Amex, or Miles & More",
                None,
            );
        }
    };
    debug!(
        "detected format {} (delimiter {:?}, encoding {})",
        format.label(),
        format.delimiter() as char,
        decoded.encoding.as_str()
    );
    diag.format = Some(format.label().to_string());
    diag.delimiter = Some(format.delimiter() as char);

    parse_text(&decoded.text, format, import_date, diag)
}

// ---------------------------------------------------------------------------
// Delimiter sanity check
// ---------------------------------------------------------------------------

pub(crate) fn unquoted_delims(line: &str, delim: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == delim && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Catch files re-exported with the wrong regional CSV settings before the
/// real parse: sample the leading non-blank lines and compare unquoted
/// occurrences of the expected delimiter against the alternates.
pub(crate) fn delimiter_mismatch(text: &str, expected: char) -> Option<String> {
    let alternates: [char; 2] = match expected {
        ';' => [',', '\t'],
        _ => [';', '\t'],
    };
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SAMPLE_LINES)
        .collect();
    if sample.is_empty() {
        return None;
    }

    let mut single_column = 0usize;
    let mut expected_total = 0usize;
    let mut alternate_totals = [0usize; 2];
    for line in &sample {
        let n = unquoted_delims(line, expected);
        if n == 0 {
            single_column += 1;
        }
        expected_total += n;
        for (i, alt) in alternates.iter().enumerate() {
            alternate_totals[i] += unquoted_delims(line, *alt);
        }
    }

    let single_share = single_column as f64 / sample.len() as f64;
    if single_share >= SINGLE_COLUMN_SHARE_LIMIT {
        return Some(format!(
            "{} of {} sampled lines have a single column for delimiter {:?}",
            single_column,
            sample.len(),
            expected
        ));
    }
    for (i, alt_total) in alternate_totals.iter().enumerate() {
        if *alt_total > expected_total {
            return Some(format!(
                "delimiter {:?} appears {} times but {:?} appears {} times",
                expected, expected_total, alternates[i], alt_total
            ));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Stage machine
// ---------------------------------------------------------------------------

fn required_columns(format: Format) -> &'static [&'static str] {
    match format {
        Format::Sparkasse => &[
            "auftragskonto",
            "buchungstag",
            "buchungstext",
            "verwendungszweck",
            "beguenstigter/zahlungspflichtiger",
            "betrag",
        ],
        Format::Amex => &["datum", "beschreibung", "karteninhaber", "betrag"],
        Format::MilesAndMore => &[
            "authorised on",
            "amount",
            "currency",
            "description",
            "payment type",
            "status",
        ],
    }
}

struct RowView<'a> {
    record: &'a csv::StringRecord,
    columns: &'a HashMap<String, usize>,
}

impl RowView<'_> {
    fn get(&self, name: &str) -> &str {
        self.columns
            .get(name)
            .and_then(|&i| self.record.get(i))
            .unwrap_or("")
            .trim()
    }

    fn get_idx(&self, index: usize) -> &str {
        self.record.get(index).unwrap_or("").trim()
    }
}

fn parse_text(
    text: &str,
    format: Format,
    import_date: NaiveDate,
    mut diag: Diagnostics,
) -> ParseOutcome {
    let delim = format.delimiter();

    if let Some(detail) = delimiter_mismatch(text, delim as char) {
        diag.stage_failed(Stage::CsvParse, detail.clone());
        return failed(diag, Some(format), ErrorCode::DelimiterMismatch, detail, None);
    }

    // The header is not necessarily the first line: Sparkasse exports may
    // carry metadata above it and Miles & More puts a card info line first.
    let lines: Vec<&str> = text.lines().collect();
    let header_idx = lines
        .iter()
        .position(|l| l.to_lowercase().contains(format.token()));
    let Some(header_idx) = header_idx else {
        let missing = required_columns(format);
        diag.required_missing = missing.iter().map(|c| c.to_string()).collect();
        diag.stage_failed(Stage::HeaderValidation, "header row not found");
        return failed(
            diag,
            Some(format),
            ErrorCode::HeaderMissingRequired,
            format!("header row not found; required columns: {}", missing.join(", ")),
            Some(serde_json::json!({ "missing": missing })),
        );
    };
    diag.header_found = true;

    let card_info = lines[..header_idx]
        .iter()
        .map(|l| l.trim())
        .find(|l| {
            let lower = l.to_lowercase();
            lower.contains("miles") || lower.contains("credit card")
        })
        .unwrap_or("");

    let body = lines[header_idx..].join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut records: Vec<(usize, csv::StringRecord)> = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => {
                if record.iter().all(|f| f.trim().is_empty()) {
                    continue;
                }
                // position line is 1-based within the body, header_idx 0-based
                let line_in_body = record.position().map(|p| p.line()).unwrap_or(0) as usize;
                records.push((header_idx + line_in_body, record));
            }
            Err(e) => {
                diag.stage_failed(Stage::CsvParse, e.to_string());
                return failed(
                    diag,
                    Some(format),
                    ErrorCode::CsvParseFailed,
                    format!("CSV parse failed: {e}"),
                    None,
                );
            }
        }
    }
    diag.stage_ok(Stage::CsvParse);

    let Some(((_, header), data)) = records.split_first() else {
        diag.stage_failed(Stage::HeaderValidation, "no rows after parse");
        return failed(
            diag,
            Some(format),
            ErrorCode::CsvParseFailed,
            "no rows found after parsing",
            None,
        );
    };

    let mut columns: HashMap<String, usize> = HashMap::new();
    let mut currency_cols: Vec<usize> = Vec::new();
    for (i, name) in header.iter().enumerate() {
        let folded = fold_header(name);
        if folded == "currency" {
            currency_cols.push(i);
        }
        columns.entry(folded).or_insert(i);
    }
    let missing: Vec<&str> = required_columns(format)
        .iter()
        .filter(|c| !columns.contains_key(**c))
        .copied()
        .collect();
    if !missing.is_empty() {
        let found: Vec<String> = header.iter().map(fold_header).collect();
        diag.required_missing = missing.iter().map(|c| c.to_string()).collect();
        diag.stage_failed(
            Stage::HeaderValidation,
            format!("missing required columns: {}", missing.join(", ")),
        );
        return failed(
            diag,
            Some(format),
            ErrorCode::HeaderMissingRequired,
            format!("missing required columns: {}", missing.join(", ")),
            Some(serde_json::json!({ "missing": missing, "found": found })),
        );
    }
    diag.stage_ok(Stage::HeaderValidation);

    let mm = MmColumns {
        foreign_amount: columns.get("amount in foreign currency").copied(),
        foreign_currency: currency_cols.get(1).copied(),
        exchange_rate: columns.get("exchange rate").copied(),
        account_source: {
            let first_field = card_info.split(';').next().unwrap_or("").trim();
            if first_field.is_empty() {
                "M&M".to_string()
            } else {
                first_field.to_string()
            }
        },
    };

    let mut transactions = Vec::new();
    let mut months: BTreeSet<String> = BTreeSet::new();
    let rows_total = data.len();
    diag.rows_total = rows_total;

    for (file_line, record) in data {
        let row = RowView { record, columns: &columns };
        let parsed = match format {
            Format::Sparkasse => sparkasse_row(&row, import_date, *file_line, &mut diag),
            Format::Amex => amex_row(&row, import_date, *file_line, &mut diag),
            Format::MilesAndMore => mm_row(&row, &mm, import_date, *file_line, &mut diag),
        };
        if let Some(txn) = parsed {
            months.insert(txn.payment_date.format("%Y-%m").to_string());
            diag.preview_row(*file_line, txn.booking_date, txn.amount, &txn.desc_raw);
            transactions.push(txn);
        }
    }

    let errors: Vec<String> = diag
        .row_errors
        .iter()
        .filter(|e| !e.warning)
        .map(|e| format!("row {}: {}", e.row_number, e.message))
        .collect();

    if diag.over_error_limit(rows_total) {
        let code = diag.dominant_code();
        let rate = diag.error_rate(rows_total);
        let detail = format!(
            "{} of {} rows failed ({:.1}%), above the {:.0}% limit",
            diag.row_errors.len(),
            rows_total,
            rate * 100.0,
            crate::diag::ROW_ERROR_RATE_LIMIT * 100.0
        );
        diag.stage_failed(Stage::RowNormalization, detail.clone());
        let mut out = failed(
            diag,
            Some(format),
            code,
            detail,
            Some(serde_json::json!({ "rows_total": rows_total, "error_rate": rate })),
        );
        out.rows_total = rows_total;
        out.errors.extend(errors);
        return out;
    }
    diag.stage_ok(Stage::RowNormalization);

    let rows_imported = transactions.len();
    debug!(
        "parsed {} of {} rows as {} ({} row errors)",
        rows_imported,
        rows_total,
        format.label(),
        diag.row_errors.len()
    );

    ParseOutcome {
        success: true,
        transactions,
        errors,
        rows_total,
        rows_imported,
        month_affected: months.iter().next_back().cloned(),
        format: Some(format),
        diagnostics: diag,
        error: None,
    }
}

// ---------------------------------------------------------------------------
// Sparkasse rows
// ---------------------------------------------------------------------------

fn sparkasse_row(
    row: &RowView,
    import_date: NaiveDate,
    file_line: usize,
    diag: &mut Diagnostics,
) -> Option<ParsedTransaction> {
    let amount_raw = row.get("betrag");
    let Some(amount) = parse_german_amount(amount_raw) else {
        diag.row_error(
            file_line,
            ErrorCode::AmountParseFailed,
            format!("unparseable amount {amount_raw:?}"),
        );
        return None;
    };

    let booking_raw = row.get("buchungstag");
    let booking_date = match parse_dialect_date(booking_raw) {
        Some(d) => d,
        None => {
            diag.row_warning(
                file_line,
                ErrorCode::DateParseFailed,
                format!("unparseable booking date {booking_raw:?}, using import date"),
            );
            import_date
        }
    };
    let payment_date = parse_dialect_date(row.get("valutadatum")).unwrap_or(booking_date);

    let beneficiary = row.get("beguenstigter/zahlungspflichtiger");
    let purpose = row.get("verwendungszweck");
    let mut desc_raw = join_desc(&[purpose, beneficiary, "Sparkasse"]);
    let beneficiary_lower = beneficiary.to_lowercase();
    if beneficiary_lower.contains("american express") {
        desc_raw.push_str(" -- pagamento Amex");
    } else if beneficiary_lower.contains("deutsche kreditbank")
        || beneficiary_lower.contains("miles & more")
    {
        desc_raw.push_str(" -- pagamento M&M");
    }

    let desc_norm = normalize_desc(&desc_raw);
    let merchant = merchant_desc(Source::Sparkasse, &desc_raw);
    let bank_reference = pick_reference(&[
        row.get("kundenreferenz (end-to-end)"),
        row.get("mandatsreferenz"),
    ]);
    let account = row.get("auftragskonto");
    let account_source = if account.is_empty() {
        "Sparkasse".to_string()
    } else {
        format!("Sparkasse ({})", last4(account))
    };
    let key = build_key(&desc_norm, amount, booking_date, bank_reference.as_deref());

    Some(ParsedTransaction {
        source: Source::Sparkasse,
        payment_date,
        booking_date,
        account_source,
        desc_raw,
        desc_norm,
        key_desc: merchant.key_desc,
        simple_desc: merchant.simple_desc,
        amount,
        currency: non_empty_or(row.get("waehrung"), "EUR").to_string(),
        foreign_amount: None,
        foreign_currency: None,
        exchange_rate: None,
        bank_reference,
        key,
    })
}

// ---------------------------------------------------------------------------
// Amex rows
// ---------------------------------------------------------------------------

fn amex_row(
    row: &RowView,
    import_date: NaiveDate,
    file_line: usize,
    diag: &mut Diagnostics,
) -> Option<ParsedTransaction> {
    let amount_raw = row.get("betrag");
    let Some(reported) = parse_german_amount(amount_raw) else {
        diag.row_error(
            file_line,
            ErrorCode::AmountParseFailed,
            format!("unparseable amount {amount_raw:?}"),
        );
        return None;
    };
    // Amex reports charges positive and credits negative; flip so expenses
    // come out negative like every other source.
    let amount = -reported;

    let date_raw = row.get("datum");
    let booking_date = match parse_dialect_date(date_raw) {
        Some(d) => d,
        None => {
            diag.row_warning(
                file_line,
                ErrorCode::DateParseFailed,
                format!("unparseable date {date_raw:?}, using import date"),
            );
            import_date
        }
    };

    let description = row.get("beschreibung");
    let cardholder = row.get("karteninhaber");
    let amex_part = if cardholder.is_empty() {
        "Amex".to_string()
    } else {
        format!("Amex [{cardholder}]")
    };
    let mut desc_raw = join_desc(&[description, &amex_part]);
    if description.to_lowercase().contains("erhalten besten dank") {
        desc_raw.push_str(" -- pagamento Amex");
    } else if reported < 0.0 {
        desc_raw.push_str(" -- reembolso");
    }

    let desc_norm = normalize_desc(&desc_raw);
    let merchant = merchant_desc(Source::Amex, &desc_raw);
    let account_digits: String = row
        .get("konto #")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let account_source = if account_digits.is_empty() {
        "Amex".to_string()
    } else {
        format!("Amex ({})", last4(&account_digits))
    };
    let key = build_key(&desc_norm, amount, booking_date, None);

    Some(ParsedTransaction {
        source: Source::Amex,
        payment_date: booking_date,
        booking_date,
        account_source,
        desc_raw,
        desc_norm,
        key_desc: merchant.key_desc,
        simple_desc: merchant.simple_desc,
        amount,
        currency: "EUR".to_string(),
        foreign_amount: None,
        foreign_currency: None,
        exchange_rate: None,
        bank_reference: None,
        key,
    })
}

// ---------------------------------------------------------------------------
// Miles & More rows
// ---------------------------------------------------------------------------

struct MmColumns {
    foreign_amount: Option<usize>,
    foreign_currency: Option<usize>,
    exchange_rate: Option<usize>,
    account_source: String,
}

fn mm_row(
    row: &RowView,
    mm: &MmColumns,
    import_date: NaiveDate,
    file_line: usize,
    diag: &mut Diagnostics,
) -> Option<ParsedTransaction> {
    let description = row.get("description");
    if description.is_empty() {
        diag.row_error(file_line, ErrorCode::RowParseFailed, "empty description");
        return None;
    }

    let amount_raw = row.get("amount");
    let Some(amount) = parse_german_amount(amount_raw) else {
        diag.row_error(
            file_line,
            ErrorCode::AmountParseFailed,
            format!("unparseable amount {amount_raw:?}"),
        );
        return None;
    };

    let authorised = row.get("authorised on");
    let date = match parse_dialect_date(authorised)
        .or_else(|| parse_dialect_date(row.get("processed on")))
    {
        Some(d) => d,
        None => {
            diag.row_warning(
                file_line,
                ErrorCode::DateParseFailed,
                format!("unparseable date {authorised:?}, using import date"),
            );
            import_date
        }
    };

    let foreign_amount = mm
        .foreign_amount
        .and_then(|i| parse_german_amount(row.get_idx(i)));
    let foreign_currency = mm
        .foreign_currency
        .map(|i| row.get_idx(i).to_string())
        .filter(|c| !c.is_empty());
    let exchange_rate = mm
        .exchange_rate
        .and_then(|i| parse_german_amount(row.get_idx(i)));

    let mut desc_raw = join_desc(&[
        description,
        row.get("payment type"),
        row.get("status"),
        "M&M",
    ]);
    if let (Some(_), Some(fc)) = (&foreign_amount, &foreign_currency) {
        desc_raw.push_str(&format!(" [compra internacional em {fc}]"));
    }
    if description.to_lowercase().contains("lastschrift") {
        desc_raw.push_str(" -- pagamento M&M");
    }
    if amount > 0.0 {
        desc_raw.push_str(" -- reembolso");
    }

    let desc_norm = normalize_desc(&desc_raw);
    let merchant = merchant_desc(Source::MilesAndMore, &desc_raw);
    let key = build_key(&desc_norm, amount, date, None);

    Some(ParsedTransaction {
        source: Source::MilesAndMore,
        payment_date: date,
        booking_date: date,
        account_source: mm.account_source.clone(),
        desc_raw,
        desc_norm,
        key_desc: merchant.key_desc,
        simple_desc: merchant.simple_desc,
        amount,
        currency: non_empty_or(row.get("currency"), "EUR").to_string(),
        foreign_amount,
        foreign_currency,
        exchange_rate,
        bank_reference: None,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    fn parse(content: &str) -> ParseOutcome {
        parse_bytes(content.as_bytes(), import_date(), None, None)
    }

    const SPARKASSE_HEADER: &str = "\"Auftragskonto\";\"Buchungstag\";\"Valutadatum\";\"Buchungstext\";\"Verwendungszweck\";\"Beguenstigter/Zahlungspflichtiger\";\"Kontonummer/IBAN\";\"Betrag\";\"Waehrung\";\"Mandatsreferenz\";\"Kundenreferenz (End-to-End)\"";

    fn sparkasse_line(
        booking: &str,
        purpose: &str,
        beneficiary: &str,
        amount: &str,
        mandate: &str,
        customer_ref: &str,
    ) -> String {
        format!(
            "\"DE12345678901234567890\";\"{booking}\";\"{booking}\";\"LASTSCHRIFT\";\"{purpose}\";\"{beneficiary}\";\"DE99888877776666\";\"{amount}\";\"EUR\";\"{mandate}\";\"{customer_ref}\""
        )
    }

    #[test]
    fn test_parse_dialect_date() {
        assert_eq!(
            parse_dialect_date("14.03.25"),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(
            parse_dialect_date("01.02.49"),
            NaiveDate::from_ymd_opt(2049, 2, 1)
        );
        assert_eq!(
            parse_dialect_date("01.02.50"),
            NaiveDate::from_ymd_opt(1950, 2, 1)
        );
        assert_eq!(
            parse_dialect_date("15/03/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(parse_dialect_date("31.02.2024"), None);
        assert_eq!(parse_dialect_date("2024-03-15"), None);
        assert_eq!(parse_dialect_date(""), None);
    }

    #[test]
    fn test_parse_german_amount() {
        assert_eq!(parse_german_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_german_amount("-609,58"), Some(-609.58));
        assert_eq!(parse_german_amount("0,00"), Some(0.0));
        assert_eq!(parse_german_amount("abc"), None);
        assert_eq!(parse_german_amount(""), None);
    }

    #[test]
    fn test_empty_file_fails_intake() {
        let out = parse_bytes(b"", import_date(), None, None);
        assert!(!out.success);
        assert_eq!(out.error.as_ref().unwrap().code, ErrorCode::FileEmpty);
    }

    #[test]
    fn test_oversized_file_fails_intake() {
        let bytes = vec![b'a'; MAX_FILE_BYTES + 1];
        let out = parse_bytes(&bytes, import_date(), None, None);
        assert!(!out.success);
        assert_eq!(out.error.as_ref().unwrap().code, ErrorCode::FileTooLarge);
    }

    #[test]
    fn test_unknown_format() {
        let out = parse("Date,Payee,Amount\n01/02/2025,SOMETHING,12.00\n");
        assert!(!out.success);
        assert_eq!(out.error.as_ref().unwrap().code, ErrorCode::Unknown);
    }

    #[test]
    fn test_sparkasse_end_to_end() {
        let content = format!(
            "{SPARKASSE_HEADER}\n{}\n{}\n",
            sparkasse_line(
                "14.03.25",
                "2025-03-13T18.33 Debitk.1",
                "REWE Markt GmbH",
                "-23,45",
                "MREF-1",
                "NOTPROVIDED",
            ),
            sparkasse_line(
                "15.03.25",
                "ABRECHNUNG KREDITKARTE",
                "AMERICAN EXPRESS EUROPE S.A.",
                "-1.200,00",
                "",
                "E2E-42",
            ),
        );
        let out = parse(&content);
        assert!(out.success, "errors: {:?}", out.errors);
        assert_eq!(out.rows_total, 2);
        assert_eq!(out.rows_imported, 2);
        assert_eq!(out.format, Some(Format::Sparkasse));
        assert_eq!(out.month_affected.as_deref(), Some("2025-03"));

        let rewe = &out.transactions[0];
        assert_eq!(rewe.amount, -23.45);
        assert_eq!(
            rewe.booking_date,
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
        );
        assert_eq!(rewe.account_source, "Sparkasse (7890)");
        assert_eq!(rewe.key_desc, "rewe markt");
        // NOTPROVIDED customer reference falls back to the mandate reference
        assert_eq!(rewe.bank_reference.as_deref(), Some("MREF-1"));
        assert!(rewe.key.ends_with(" -- -23.45 -- 2025-03-14 -- MREF-1"));

        let amex_bill = &out.transactions[1];
        assert_eq!(amex_bill.amount, -1200.0);
        assert!(amex_bill.desc_norm.contains("pagamento amex"));
        assert_eq!(amex_bill.bank_reference.as_deref(), Some("E2E-42"));
    }

    #[test]
    fn test_sparkasse_missing_column_lists_names() {
        let content = "\"Auftragskonto\";\"Buchungstag\";\"Buchungstext\";\"Verwendungszweck\"\n\
                       \"DE1\";\"01.01.25\";\"TEXT\";\"ZWECK\"\n";
        let out = parse(content);
        assert!(!out.success);
        let info = out.error.unwrap();
        assert_eq!(info.code, ErrorCode::HeaderMissingRequired);
        let missing = info.details.unwrap()["missing"].clone();
        let names: Vec<String> = serde_json::from_value(missing).unwrap();
        assert!(names.contains(&"betrag".to_string()));
        assert!(names.contains(&"beguenstigter/zahlungspflichtiger".to_string()));
        assert!(out.diagnostics.header_found);
        assert_eq!(out.diagnostics.required_missing, names);
    }

    #[test]
    fn test_sparkasse_umlaut_header_folds() {
        let content = "\"Auftragskonto\";\"Buchungstag\";\"Buchungstext\";\"Verwendungszweck\";\"Begünstigter/Zahlungspflichtiger\";\"Betrag\";\"Währung\"\n\
             \"DE12345678901234567890\";\"02.01.25\";\"GUTSCHRIFT\";\"GEHALT Januar\";\"ARBEITGEBER AG\";\"2.500,00\";\"EUR\"\n";
        let out = parse(content);
        assert!(out.success, "errors: {:?}", out.errors);
        assert_eq!(out.transactions[0].amount, 2500.0);
        assert_eq!(out.transactions[0].currency, "EUR");
    }

    #[test]
    fn test_date_fallback_keeps_row_with_warning() {
        let content = format!(
            "{SPARKASSE_HEADER}\n{}\n",
            sparkasse_line("kaputt", "MIETE", "Hausverwaltung", "-900,00", "", ""),
        );
        let out = parse(&content);
        assert!(out.success);
        assert_eq!(out.rows_imported, 1);
        assert_eq!(out.transactions[0].booking_date, import_date());
        let warnings: Vec<_> = out
            .diagnostics
            .row_errors
            .iter()
            .filter(|e| e.warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, ErrorCode::DateParseFailed);
    }

    #[test]
    fn test_row_error_rate_gate_discards_all() {
        // 1 bad amount in 2 rows is 50%, far above the 5% limit
        let content = format!(
            "{SPARKASSE_HEADER}\n{}\n{}\n",
            sparkasse_line("01.03.25", "A", "Merchant One", "-10,00", "", ""),
            sparkasse_line("02.03.25", "B", "Merchant Two", "zehn", "", ""),
        );
        let out = parse(&content);
        assert!(!out.success);
        assert!(out.transactions.is_empty());
        assert_eq!(out.rows_total, 2);
        assert_eq!(
            out.error.as_ref().unwrap().code,
            ErrorCode::AmountParseFailed
        );
        // the discarded good row stays visible in the audit preview
        assert_eq!(out.diagnostics.rows_total, 2);
        assert_eq!(out.diagnostics.rows_preview.len(), 1);
        assert_eq!(out.diagnostics.rows_preview[0].amount, -10.0);
    }

    #[test]
    fn test_row_errors_below_rate_keep_partial_set() {
        let mut content = format!("{SPARKASSE_HEADER}\n");
        for day in 1..=20 {
            content.push_str(&sparkasse_line(
                &format!("{day:02}.03.25"),
                "EINKAUF",
                "EDEKA Center",
                "-12,34",
                "",
                "",
            ));
            content.push('\n');
        }
        content.push_str(&sparkasse_line("21.03.25", "X", "Broken", "kaputt", "", ""));
        content.push('\n');

        let out = parse(&content);
        assert!(out.success);
        assert_eq!(out.rows_total, 21);
        assert_eq!(out.rows_imported, 20);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("unparseable amount"));
    }

    #[test]
    fn test_delimiter_mismatch_comma_in_semicolon_format() {
        // Sparkasse content re-exported with commas; format forced
        let content = "Auftragskonto,Buchungstag,Betrag\nDE1,01.01.25,-5\nDE1,02.01.25,-6\n";
        let out = parse_bytes(
            content.as_bytes(),
            import_date(),
            None,
            Some(Format::Sparkasse),
        );
        assert!(!out.success);
        assert_eq!(
            out.error.as_ref().unwrap().code,
            ErrorCode::DelimiterMismatch
        );
    }

    #[test]
    fn test_delimiter_mismatch_unit() {
        assert!(delimiter_mismatch("a,b,c\nd,e,f\n", ';').is_some());
        assert!(delimiter_mismatch("a;b;c\nd;e;f\n", ';').is_none());
        // quoted delimiters do not count
        assert!(delimiter_mismatch("\"a;b\",c\n\"d;e\",f\n", ',').is_none());
    }

    #[test]
    fn test_amex_sign_flip_and_markers() {
        let content = "\
Datum,Beschreibung,Karteninhaber,Konto #,Betrag
15/03/2025,REWE MARKT KOELN,MAX MUSTERMANN,-42008,\"15,00\"
16/03/2025,ZAHLUNG ERHALTEN BESTEN DANK,MAX MUSTERMANN,-42008,\"-500,00\"
17/03/2025,GUTSCHRIFT RETOURE,MAX MUSTERMANN,-42008,\"-20,00\"
";
        let out = parse(content);
        assert!(out.success, "errors: {:?}", out.errors);
        assert_eq!(out.format, Some(Format::Amex));

        let charge = &out.transactions[0];
        assert_eq!(charge.amount, -15.0);
        assert_eq!(charge.account_source, "Amex (2008)");
        assert_eq!(charge.desc_raw, "REWE MARKT KOELN -- Amex [MAX MUSTERMANN]");

        let payment = &out.transactions[1];
        assert_eq!(payment.amount, 500.0);
        assert!(payment.desc_norm.contains("pagamento amex"));
        assert!(!payment.desc_norm.contains("reembolso"));

        let refund = &out.transactions[2];
        assert_eq!(refund.amount, 20.0);
        assert!(refund.desc_norm.contains("reembolso"));
    }

    #[test]
    fn test_miles_and_more_foreign_currency_and_card_info() {
        let content = "\
Miles & More Gold Credit Card 1234 56XX;;;;;;;;;
Authorised on;Processed on;Amount;Currency;Description;Payment type;Status;Amount in foreign currency;Currency;Exchange rate
12.02.25;13.02.25;-34,10;EUR;AIRBNB PAYMENTS LUX;purchase;settled;-37,50;USD;1,10
14.02.25;15.02.25;520,00;EUR;LASTSCHRIFT EINZUG;payment;settled;;;
";
        let out = parse(content);
        assert!(out.success, "errors: {:?}", out.errors);
        assert_eq!(out.format, Some(Format::MilesAndMore));

        let intl = &out.transactions[0];
        assert_eq!(
            intl.account_source,
            "Miles & More Gold Credit Card 1234 56XX"
        );
        assert_eq!(intl.amount, -34.1);
        assert_eq!(intl.foreign_amount, Some(-37.5));
        assert_eq!(intl.foreign_currency.as_deref(), Some("USD"));
        assert_eq!(intl.exchange_rate, Some(1.1));
        assert!(intl.desc_raw.contains("[compra internacional em USD]"));

        let settle = &out.transactions[1];
        assert_eq!(settle.amount, 520.0);
        assert!(settle.desc_norm.contains("pagamento m&m"));
        assert!(settle.desc_norm.contains("reembolso"));
    }

    #[test]
    fn test_miles_and_more_empty_description_is_row_error() {
        let content = "\
Authorised on;Amount;Currency;Description;Payment type;Status
12.02.25;-34,10;EUR;;purchase;settled
";
        let out = parse(content);
        assert!(!out.success);
        assert_eq!(out.error.as_ref().unwrap().code, ErrorCode::RowParseFailed);
    }

    #[test]
    fn test_reparse_yields_identical_keys() {
        let content = format!(
            "{SPARKASSE_HEADER}\n{}\n",
            sparkasse_line("14.03.25", "ZWECK", "REWE Markt GmbH", "-23,45", "M-1", ""),
        );
        let a = parse(&content);
        let b = parse(&content);
        assert_eq!(a.transactions[0].key, b.transactions[0].key);
    }
}
