use std::collections::BTreeSet;

use chrono::Datelike;
use log::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Transaction;
use crate::store::Store;

const MIN_GROUP_SIZE: usize = 3;
const MIN_VALID_DELTAS: usize = 2;
const MONTHLY_DELTA_DAYS: std::ops::RangeInclusive<i64> = 26..=34;

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Recurrence fields to stamp onto every transaction of a key-description
/// group.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceUpdate {
    pub group_id: Uuid,
    pub confidence: f64,
    pub day_of_month: u32,
    pub day_window: u32,
}

fn median(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

fn amount_similar(base: f64, value: f64) -> bool {
    let tolerance = (base.abs() * 0.02).max(2.0);
    (base - value).abs() <= tolerance
}

/// Decide whether one key-description group recurs monthly. All
/// transactions passed in share a key description; `None` means the group
/// shows no monthly cadence and any previously persisted recurrence fields
/// are left untouched.
pub fn detect(txns: &[Transaction]) -> Option<RecurrenceUpdate> {
    if txns.len() < MIN_GROUP_SIZE {
        return None;
    }

    let mut sorted: Vec<&Transaction> = txns.iter().collect();
    sorted.sort_by_key(|t| t.booking_date);
    let base = sorted[0].amount;

    // A delta only counts when the later transaction's amount is still
    // within tolerance of the base; price drift breaks the chain there.
    let mut deltas: Vec<i64> = Vec::new();
    for pair in sorted.windows(2) {
        if amount_similar(base, pair[1].amount) {
            deltas.push((pair[1].booking_date - pair[0].booking_date).num_days().abs());
        }
    }

    let valid = deltas
        .iter()
        .filter(|d| MONTHLY_DELTA_DAYS.contains(d))
        .count();
    if valid < MIN_VALID_DELTAS {
        return None;
    }

    // Reuse the group id once minted so regrouping never churns the UI.
    let group_id = sorted
        .iter()
        .find_map(|t| t.recurring_group_id)
        .unwrap_or_else(Uuid::new_v4);

    let days: Vec<i64> = sorted.iter().map(|t| t.booking_date.day() as i64).collect();
    let day_median = median(&days).round() as i64;
    let day_window = days
        .iter()
        .map(|d| (d - day_median).abs())
        .max()
        .unwrap_or(0)
        .max(1);

    Some(RecurrenceUpdate {
        group_id,
        confidence: valid as f64 / deltas.len() as f64,
        day_of_month: day_median as u32,
        day_window: day_window as u32,
    })
}

// ---------------------------------------------------------------------------
// Group refresh
// ---------------------------------------------------------------------------

/// Re-run recurrence detection for the given key descriptions, typically the
/// set touched by one import. Returns how many groups were flagged.
pub fn update_groups(store: &mut dyn Store, key_descs: &BTreeSet<String>) -> Result<usize> {
    let mut flagged = 0;
    for key_desc in key_descs {
        let txns = store.transactions_by_key_desc(key_desc)?;
        if let Some(update) = detect(&txns) {
            store.update_recurrence_by_key_desc(key_desc, &update)?;
            flagged += 1;
            debug!(
                "recurring group {} ({} txns, confidence {:.2})",
                key_desc,
                txns.len(),
                update.confidence
            );
        }
    }
    Ok(flagged)
}
