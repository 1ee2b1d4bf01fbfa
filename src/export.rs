use std::collections::HashMap;

use crate::contract::{ContractRow, Dataset};
use crate::error::Result;
use crate::store::Store;

const BOM: char = '\u{feff}';
const CRLF: &str = "\r\n";

fn needs_quoting(value: &str, delimiter: char) -> bool {
    value.contains(delimiter) || value.contains('"') || value.contains('\n') || value.contains('\r')
}

/// Spreadsheets execute cells starting with `=`, `+`, `-` or `@`; a leading
/// apostrophe demotes them to text.
fn escape_formula(value: &str) -> String {
    match value.chars().next() {
        Some('=') | Some('+') | Some('-') | Some('@') => format!("'{value}"),
        _ => value.to_string(),
    }
}

fn escape_value(raw: &str, delimiter: char) -> String {
    let value = escape_formula(raw);
    if needs_quoting(&value, delimiter) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value
    }
}

/// Render rows in the dataset's template shape: BOM, CRLF line endings,
/// RFC 4180 quoting, formula escaping. Cells are looked up by header name;
/// missing cells render empty.
pub fn build_csv(dataset: Dataset, rows: &[ContractRow]) -> String {
    let delimiter = Dataset::DELIMITER;
    let headers = dataset.expected_headers();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        headers
            .iter()
            .map(|h| escape_value(h, delimiter))
            .collect::<Vec<_>>()
            .join(&delimiter.to_string()),
    );
    for row in rows {
        lines.push(
            headers
                .iter()
                .map(|h| escape_value(row.get(*h).map(String::as_str).unwrap_or(""), delimiter))
                .collect::<Vec<_>>()
                .join(&delimiter.to_string()),
        );
    }

    format!("{BOM}{}", lines.join(CRLF))
}

// ---------------------------------------------------------------------------
// Dataset assembly from the store
// ---------------------------------------------------------------------------

fn cell(row: &mut ContractRow, header: &str, value: impl Into<String>) {
    row.insert(header.to_string(), value.into());
}

/// One row per rule, carrying its taxonomy path. Rules without a leaf
/// binding export with an empty level-3 column.
pub fn classification_rows(store: &dyn Store) -> Result<Vec<ContractRow>> {
    let leaves: HashMap<i64, String> = store
        .leaves()?
        .into_iter()
        .map(|l| (l.id, l.name))
        .collect();

    let mut rows = Vec::new();
    for rule in store.rules()? {
        let leaf_name = rule
            .leaf_id
            .and_then(|id| leaves.get(&id).cloned())
            .unwrap_or_default();
        let mut row = ContractRow::new();
        cell(&mut row, "App classificação", &rule.name);
        cell(&mut row, "Nível_1_PT", &rule.level1);
        cell(&mut row, "Nível_2_PT", rule.level2.clone().unwrap_or_default());
        cell(&mut row, "Nível_3_PT", leaf_name);
        cell(&mut row, "Key_words", &rule.keywords);
        cell(
            &mut row,
            "Key_words_negative",
            rule.keywords_negative.clone().unwrap_or_default(),
        );
        cell(&mut row, "Receita/Despesa", rule.txn_type.as_pt());
        cell(&mut row, "Fixo/Variável", rule.fix_var.as_pt());
        cell(&mut row, "Recorrente", if rule.recurrent { "Sim" } else { "" });
        rows.push(row);
    }
    Ok(rows)
}

pub fn alias_mapping_rows(store: &dyn Store) -> Result<Vec<ContractRow>> {
    let mut rows = Vec::new();
    for mapping in store.alias_mappings()? {
        let mut row = ContractRow::new();
        cell(&mut row, "key_desc", mapping.key_desc);
        cell(&mut row, "simple_desc", mapping.simple_desc);
        cell(&mut row, "alias_desc", mapping.alias_desc.unwrap_or_default());
        rows.push(row);
    }
    Ok(rows)
}

pub fn alias_asset_rows(store: &dyn Store) -> Result<Vec<ContractRow>> {
    let mut rows = Vec::new();
    for asset in store.alias_assets()? {
        let mut row = ContractRow::new();
        cell(&mut row, "Alias_Desc", asset.alias_desc);
        cell(&mut row, "Key_words_alias", asset.keywords);
        cell(&mut row, "URL_icon_internet", asset.icon_url.unwrap_or_default());
        cell(&mut row, "Logo_local_path", asset.logo_path.unwrap_or_default());
        rows.push(row);
    }
    Ok(rows)
}

pub fn export_dataset(store: &dyn Store, dataset: Dataset) -> Result<String> {
    let rows = match dataset {
        Dataset::Classification => classification_rows(store)?,
        Dataset::AliasesKeyDesc => alias_mapping_rows(store)?,
        Dataset::AliasesAssets => alias_asset_rows(store)?,
    };
    Ok(build_csv(dataset, &rows))
}
