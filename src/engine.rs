use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::alias;
use crate::classifier::{self, Classification};
use crate::decode::Encoding;
use crate::detect::Format;
use crate::diag::Diagnostics;
use crate::error::{ErrorInfo, Result};
use crate::importer;
use crate::models::{Transaction, Upload, UploadStatus};
use crate::recurrence;
use crate::settings::Settings;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub path: PathBuf,
    pub import_date: NaiveDate,
    pub encoding_hint: Option<Encoding>,
    pub format_override: Option<Format>,
}

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub upload_id: i64,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    pub rows_total: usize,
    pub rows_imported: usize,
    pub duplicates: usize,
    pub auto_classified: usize,
    pub open_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_affected: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub diagnostics: Diagnostics,
}

pub fn file_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Full import of one statement file: parse, deduplicate, classify, alias,
/// persist, then refresh recurrence for every key description the file
/// touched. All storage goes through the `Store` trait.
pub fn run_import(
    store: &mut dyn Store,
    settings: &Settings,
    request: &ImportRequest,
) -> Result<ImportReport> {
    let bytes = std::fs::read(&request.path)?;
    let checksum = file_checksum(&bytes);
    let filename = request
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.csv".to_string());

    // The same file imported twice is rejected up front. A previous failed
    // attempt does not count; those may be retried.
    if let Some(previous) = store.find_upload_by_checksum(&checksum)? {
        if previous.status != UploadStatus::Error {
            info!("{filename}: already imported as upload {}", previous.id);
            return Ok(ImportReport {
                upload_id: previous.id,
                status: UploadStatus::Duplicate,
                format: None,
                rows_total: previous.rows_total,
                rows_imported: 0,
                duplicates: previous.rows_total,
                auto_classified: 0,
                open_count: 0,
                month_affected: previous.month_affected.clone(),
                errors: vec![format!(
                    "file already imported as upload {} ({})",
                    previous.id, previous.filename
                )],
                error: None,
                diagnostics: Diagnostics::default(),
            });
        }
    }

    let mut upload = Upload {
        id: 0,
        filename,
        status: UploadStatus::Processing,
        rows_total: 0,
        rows_imported: 0,
        month_affected: None,
        error_message: None,
        checksum,
    };
    upload.id = store.insert_upload(&upload)?;

    let outcome = importer::parse_bytes(
        &bytes,
        request.import_date,
        request.encoding_hint,
        request.format_override,
    );

    if !outcome.success {
        upload.status = UploadStatus::Error;
        upload.rows_total = outcome.rows_total;
        upload.error_message = outcome
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .or_else(|| Some(outcome.errors.join("; ")));
        store.update_upload(&upload)?;
        warn!(
            "{}: import failed at parse ({})",
            upload.filename,
            upload.error_message.as_deref().unwrap_or("unknown")
        );
        return Ok(ImportReport {
            upload_id: upload.id,
            status: UploadStatus::Error,
            format: outcome.format,
            rows_total: outcome.rows_total,
            rows_imported: 0,
            duplicates: 0,
            auto_classified: 0,
            open_count: 0,
            month_affected: None,
            errors: outcome.errors,
            error: outcome.error,
            diagnostics: outcome.diagnostics,
        });
    }

    let rules = store.rules()?;
    let assets = store.alias_assets()?;

    let total_parsed = outcome.transactions.len();
    let mut imported = 0usize;
    let mut duplicates = 0usize;
    let mut auto_classified = 0usize;
    let mut open_count = 0usize;
    let mut touched_key_descs: BTreeSet<String> = BTreeSet::new();
    let mut storage_errors: Vec<String> = Vec::new();

    for parsed in outcome.transactions {
        if store.transaction_exists(&parsed.key)? {
            duplicates += 1;
            continue;
        }

        let mut txn = Transaction::from_parsed(parsed);
        txn.upload_id = Some(upload.id);

        let classification = classifier::classify(&txn.desc_norm, &rules);
        classifier::apply(&mut txn, &classification, settings.confidence_threshold);
        if matches!(classification, Classification::Applied { .. }) {
            auto_classified += 1;
        } else {
            open_count += 1;
        }
        txn.suggested_keyword = Some(classifier::suggest_keyword(&txn.key_desc));

        let existing = store.alias_mapping(&txn.key_desc)?;
        let resolution = alias::resolve(&txn.key_desc, &txn.simple_desc, existing.as_ref(), &assets);
        txn.alias_desc = resolution.alias_desc.clone();
        store.upsert_alias_mapping(&resolution.mapping)?;
        if resolution.propagate {
            if let Some(alias_desc) = &resolution.alias_desc {
                store.update_alias_by_key_desc(&txn.key_desc, alias_desc)?;
            }
        }

        match store.insert_transaction(&txn) {
            Ok(_) => {
                imported += 1;
                touched_key_descs.insert(txn.key_desc.clone());
            }
            Err(err) => {
                storage_errors.push(format!(
                    "failed to import: {}",
                    truncate_chars(&txn.desc_raw, 50)
                ));
                warn!("{}: insert failed: {err}", upload.filename);
            }
        }
    }

    upload.status = if total_parsed > 0 && duplicates == total_parsed {
        UploadStatus::Duplicate
    } else {
        UploadStatus::Ready
    };
    upload.rows_total = outcome.rows_total;
    upload.rows_imported = imported;
    upload.month_affected = outcome.month_affected.clone();
    upload.error_message = if storage_errors.is_empty() {
        None
    } else {
        Some(storage_errors.join("; "))
    };
    store.update_upload(&upload)?;

    if !touched_key_descs.is_empty() {
        recurrence::update_groups(store, &touched_key_descs)?;
    }

    info!(
        "{}: {:?} with {imported} imported, {duplicates} duplicates, {auto_classified} classified, {open_count} open",
        upload.filename, upload.status
    );

    let mut errors = outcome.errors;
    errors.extend(storage_errors);
    Ok(ImportReport {
        upload_id: upload.id,
        status: upload.status,
        format: outcome.format,
        rows_total: outcome.rows_total,
        rows_imported: imported,
        duplicates,
        auto_classified,
        open_count,
        month_affected: outcome.month_affected,
        errors,
        error: None,
        diagnostics: outcome.diagnostics,
    })
}
