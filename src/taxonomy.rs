use std::collections::HashMap;

use log::info;

use crate::contract::ContractRow;
use crate::error::Result;
use crate::models::{AliasAsset, AliasMapping, FixVar, Rule, TxnType};
use crate::store::Store;

/// Priority given to rules created through the bulk template. Seeded system
/// rules sit above this, so a template import never shadows them silently.
const IMPORTED_RULE_PRIORITY: i64 = 500;

fn value<'a>(row: &'a ContractRow, header: &str) -> &'a str {
    row.get(header).map(String::as_str).unwrap_or("").trim()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Classification dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClassificationImport {
    pub rows_applied: usize,
    pub rows_skipped: usize,
    pub rules_upserted: usize,
}

/// Resolves taxonomy nodes once per run so a thousand-row template does not
/// hit the store with a thousand lookups per level.
#[derive(Default)]
struct TaxonomyCache {
    level1: HashMap<String, i64>,
    level2: HashMap<String, i64>,
    leaf: HashMap<String, i64>,
}

impl TaxonomyCache {
    fn resolve(
        &mut self,
        store: &mut dyn Store,
        level1: &str,
        level2: &str,
        level3: &str,
    ) -> Result<i64> {
        let l1_id = match self.level1.get(level1) {
            Some(id) => *id,
            None => {
                let id = store.ensure_level1(level1)?;
                self.level1.insert(level1.to_string(), id);
                id
            }
        };

        let l2_key = format!("{level1}::{level2}");
        let l2_id = match self.level2.get(&l2_key) {
            Some(id) => *id,
            None => {
                let id = store.ensure_level2(l1_id, level2)?;
                self.level2.insert(l2_key.clone(), id);
                id
            }
        };

        let leaf_key = format!("{l2_key}::{level3}");
        let leaf_id = match self.leaf.get(&leaf_key) {
            Some(id) => *id,
            None => {
                let id = store.ensure_leaf(l2_id, level3)?;
                self.leaf.insert(leaf_key, id);
                id
            }
        };
        Ok(leaf_id)
    }
}

/// Apply a validated classification template: create the taxonomy path for
/// each complete row and upsert a keyword rule bound to its leaf. Rows
/// missing any level are skipped; rows without keywords build taxonomy only.
pub fn import_classification(
    store: &mut dyn Store,
    rows: &[ContractRow],
) -> Result<ClassificationImport> {
    let mut cache = TaxonomyCache::default();
    let mut result = ClassificationImport::default();

    for row in rows {
        let level1 = value(row, "Nível_1_PT");
        let level2 = value(row, "Nível_2_PT");
        let level3 = value(row, "Nível_3_PT");
        if level1.is_empty() || level2.is_empty() || level3.is_empty() {
            result.rows_skipped += 1;
            continue;
        }

        let leaf_id = cache.resolve(store, level1, level2, level3)?;
        result.rows_applied += 1;

        let keywords = value(row, "Key_words");
        if keywords.is_empty() {
            continue;
        }

        let name = non_empty(value(row, "App classificação")).unwrap_or_else(|| level3.to_string());
        let rule = Rule {
            id: 0,
            name,
            keywords: keywords.to_string(),
            keywords_negative: non_empty(value(row, "Key_words_negative")),
            leaf_id: Some(leaf_id),
            level1: level1.to_string(),
            level2: Some(level2.to_string()),
            txn_type: TxnType::parse_pt(value(row, "Receita/Despesa")).unwrap_or(TxnType::Expense),
            fix_var: FixVar::parse_pt(value(row, "Fixo/Variável")).unwrap_or(FixVar::Variable),
            priority: IMPORTED_RULE_PRIORITY,
            strict: false,
            is_system: false,
            recurrent: value(row, "Recorrente").eq_ignore_ascii_case("sim"),
        };
        store.upsert_rule(&rule)?;
        result.rules_upserted += 1;
    }

    info!(
        "classification import: {} applied, {} skipped, {} rules",
        result.rows_applied, result.rows_skipped, result.rules_upserted
    );
    Ok(result)
}

// ---------------------------------------------------------------------------
// Alias datasets
// ---------------------------------------------------------------------------

/// Upsert alias dictionary rows in file order. Rows without a key
/// description are skipped.
pub fn import_alias_mappings(store: &mut dyn Store, rows: &[ContractRow]) -> Result<usize> {
    let mut applied = 0;
    for row in rows {
        let key_desc = value(row, "key_desc");
        if key_desc.is_empty() {
            continue;
        }
        store.upsert_alias_mapping(&AliasMapping {
            key_desc: key_desc.to_string(),
            simple_desc: value(row, "simple_desc").to_string(),
            alias_desc: non_empty(value(row, "alias_desc")),
        })?;
        applied += 1;
    }
    info!("alias mapping import: {applied} rows");
    Ok(applied)
}

pub fn import_alias_assets(store: &mut dyn Store, rows: &[ContractRow]) -> Result<usize> {
    let mut applied = 0;
    for row in rows {
        let alias_desc = value(row, "Alias_Desc");
        if alias_desc.is_empty() {
            continue;
        }
        store.upsert_alias_asset(&AliasAsset {
            alias_desc: alias_desc.to_string(),
            keywords: value(row, "Key_words_alias").to_string(),
            icon_url: non_empty(value(row, "URL_icon_internet")),
            logo_path: non_empty(value(row, "Logo_local_path")),
        })?;
        applied += 1;
    }
    info!("alias asset import: {applied} rows");
    Ok(applied)
}
