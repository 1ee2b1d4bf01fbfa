use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db;
use crate::error::Result;
use crate::models::{
    AliasAsset, AliasMapping, ClassifiedBy, FixVar, Leaf, Level1, Level2, Rule, Source,
    Transaction, TxnStatus, TxnType, Upload, UploadStatus,
};
use crate::recurrence::RecurrenceUpdate;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Persistence seam between the pure pipeline and the ledger. The engine
/// only talks to this trait; `SqliteStore` is the shipped implementation.
pub trait Store {
    fn transaction_exists(&self, key: &str) -> Result<bool>;
    fn insert_transaction(&mut self, txn: &Transaction) -> Result<i64>;
    fn transactions(&self) -> Result<Vec<Transaction>>;
    fn transactions_by_key_desc(&self, key_desc: &str) -> Result<Vec<Transaction>>;
    fn update_alias_by_key_desc(&mut self, key_desc: &str, alias_desc: &str) -> Result<usize>;
    fn update_recurrence_by_key_desc(
        &mut self,
        key_desc: &str,
        update: &RecurrenceUpdate,
    ) -> Result<usize>;

    fn rules(&self) -> Result<Vec<Rule>>;
    fn upsert_rule(&mut self, rule: &Rule) -> Result<i64>;

    fn alias_mapping(&self, key_desc: &str) -> Result<Option<AliasMapping>>;
    fn alias_mappings(&self) -> Result<Vec<AliasMapping>>;
    fn upsert_alias_mapping(&mut self, mapping: &AliasMapping) -> Result<()>;
    fn alias_assets(&self) -> Result<Vec<AliasAsset>>;
    fn upsert_alias_asset(&mut self, asset: &AliasAsset) -> Result<()>;

    fn ensure_level1(&mut self, name: &str) -> Result<i64>;
    fn ensure_level2(&mut self, level1_id: i64, name: &str) -> Result<i64>;
    fn ensure_leaf(&mut self, level2_id: i64, name: &str) -> Result<i64>;
    fn level1s(&self) -> Result<Vec<Level1>>;
    fn level2s(&self) -> Result<Vec<Level2>>;
    fn leaves(&self) -> Result<Vec<Leaf>>;

    fn find_upload_by_checksum(&self, checksum: &str) -> Result<Option<Upload>>;
    fn insert_upload(&mut self, upload: &Upload) -> Result<i64>;
    fn update_upload(&mut self, upload: &Upload) -> Result<()>;
    fn uploads(&self) -> Result<Vec<Upload>>;
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn txn_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let source: String = row.get("source")?;
    let txn_type: Option<String> = row.get("txn_type")?;
    let fix_var: Option<String> = row.get("fix_var")?;
    let status: String = row.get("status")?;
    let classified_by: Option<String> = row.get("classified_by")?;
    let review_reason: Option<String> = row.get("review_reason")?;
    let group_id: Option<String> = row.get("recurring_group_id")?;
    Ok(Transaction {
        id: row.get("id")?,
        source: Source::parse_label(&source).unwrap_or(Source::Sparkasse),
        payment_date: row.get("payment_date")?,
        booking_date: row.get("booking_date")?,
        account_source: row.get("account_source")?,
        desc_raw: row.get("desc_raw")?,
        desc_norm: row.get("desc_norm")?,
        key_desc: row.get("key_desc")?,
        simple_desc: row.get("simple_desc")?,
        alias_desc: row.get("alias_desc")?,
        amount: row.get("amount")?,
        currency: row.get("currency")?,
        foreign_amount: row.get("foreign_amount")?,
        foreign_currency: row.get("foreign_currency")?,
        exchange_rate: row.get("exchange_rate")?,
        bank_reference: row.get("bank_reference")?,
        key: row.get("key")?,
        leaf_id: row.get("leaf_id")?,
        txn_type: txn_type.as_deref().and_then(TxnType::parse_pt),
        fix_var: fix_var.as_deref().and_then(FixVar::parse_pt),
        status: TxnStatus::parse(&status).unwrap_or(TxnStatus::Open),
        classified_by: classified_by.as_deref().and_then(ClassifiedBy::parse),
        needs_review: row.get("needs_review")?,
        review_reason: review_reason
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        rule_id_applied: row.get("rule_id_applied")?,
        suggested_keyword: row.get("suggested_keyword")?,
        manual_override: row.get("manual_override")?,
        internal_transfer: row.get("internal_transfer")?,
        exclude_from_budget: row.get("exclude_from_budget")?,
        recurring_flag: row.get("recurring_flag")?,
        recurring_group_id: group_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
        recurring_confidence: row.get("recurring_confidence")?,
        recurring_day_of_month: row.get("recurring_day_of_month")?,
        recurring_day_window: row.get("recurring_day_window")?,
        upload_id: row.get("upload_id")?,
    })
}

fn rule_from_row(row: &Row) -> rusqlite::Result<Rule> {
    let txn_type: String = row.get("txn_type")?;
    let fix_var: String = row.get("fix_var")?;
    Ok(Rule {
        id: row.get("id")?,
        name: row.get("name")?,
        keywords: row.get("keywords")?,
        keywords_negative: row.get("keywords_negative")?,
        leaf_id: row.get("leaf_id")?,
        level1: row.get("level1")?,
        level2: row.get("level2")?,
        txn_type: TxnType::parse_pt(&txn_type).unwrap_or(TxnType::Expense),
        fix_var: FixVar::parse_pt(&fix_var).unwrap_or(FixVar::Variable),
        priority: row.get("priority")?,
        strict: row.get("strict")?,
        is_system: row.get("is_system")?,
        recurrent: row.get("recurrent")?,
    })
}

fn upload_from_row(row: &Row) -> rusqlite::Result<Upload> {
    let status: String = row.get("status")?;
    let rows_total: i64 = row.get("rows_total")?;
    let rows_imported: i64 = row.get("rows_imported")?;
    Ok(Upload {
        id: row.get("id")?,
        filename: row.get("filename")?,
        status: UploadStatus::parse(&status).unwrap_or(UploadStatus::Error),
        rows_total: rows_total as usize,
        rows_imported: rows_imported as usize,
        month_affected: row.get("month_affected")?,
        error_message: row.get("error_message")?,
        checksum: row.get("checksum")?,
    })
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = db::get_connection(db_path)?;
        db::init_db(&conn)?;
        Ok(Self { conn })
    }

    /// Private throwaway database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        db::init_db(&conn)?;
        Ok(Self { conn })
    }

    fn collect<T, F>(&self, sql: &str, map: F) -> Result<Vec<T>>
    where
        F: Fn(&Row) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], &map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl Store for SqliteStore {
    fn transaction_exists(&self, key: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM transactions WHERE key = ?1")?;
        Ok(stmt.exists(params![key])?)
    }

    fn insert_transaction(&mut self, txn: &Transaction) -> Result<i64> {
        let review_reason = txn
            .review_reason
            .as_ref()
            .and_then(|r| serde_json::to_string(r).ok());
        self.conn.execute(
            "INSERT INTO transactions (
                source, payment_date, booking_date, account_source, desc_raw,
                desc_norm, key_desc, simple_desc, alias_desc, amount, currency,
                foreign_amount, foreign_currency, exchange_rate, bank_reference,
                key, leaf_id, txn_type, fix_var, status, classified_by,
                needs_review, review_reason, rule_id_applied, suggested_keyword,
                manual_override, internal_transfer, exclude_from_budget,
                recurring_flag, recurring_group_id, recurring_confidence,
                recurring_day_of_month, recurring_day_window, upload_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24,
                      ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34)",
            params![
                txn.source.label(),
                txn.payment_date,
                txn.booking_date,
                txn.account_source,
                txn.desc_raw,
                txn.desc_norm,
                txn.key_desc,
                txn.simple_desc,
                txn.alias_desc,
                txn.amount,
                txn.currency,
                txn.foreign_amount,
                txn.foreign_currency,
                txn.exchange_rate,
                txn.bank_reference,
                txn.key,
                txn.leaf_id,
                txn.txn_type.map(|t| t.as_pt()),
                txn.fix_var.map(|f| f.as_pt()),
                txn.status.as_str(),
                txn.classified_by.map(|c| c.as_str()),
                txn.needs_review,
                review_reason,
                txn.rule_id_applied,
                txn.suggested_keyword,
                txn.manual_override,
                txn.internal_transfer,
                txn.exclude_from_budget,
                txn.recurring_flag,
                txn.recurring_group_id.map(|u| u.to_string()),
                txn.recurring_confidence,
                txn.recurring_day_of_month,
                txn.recurring_day_window,
                txn.upload_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn transactions(&self) -> Result<Vec<Transaction>> {
        self.collect(
            "SELECT * FROM transactions ORDER BY booking_date, id",
            txn_from_row,
        )
    }

    fn transactions_by_key_desc(&self, key_desc: &str) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT * FROM transactions WHERE key_desc = ?1 ORDER BY booking_date, id",
        )?;
        let rows = stmt
            .query_map(params![key_desc], txn_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn update_alias_by_key_desc(&mut self, key_desc: &str, alias_desc: &str) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE transactions SET alias_desc = ?2 WHERE key_desc = ?1",
            params![key_desc, alias_desc],
        )?;
        Ok(changed)
    }

    fn update_recurrence_by_key_desc(
        &mut self,
        key_desc: &str,
        update: &RecurrenceUpdate,
    ) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE transactions SET recurring_flag = 1, recurring_group_id = ?2,
             recurring_confidence = ?3, recurring_day_of_month = ?4,
             recurring_day_window = ?5 WHERE key_desc = ?1",
            params![
                key_desc,
                update.group_id.to_string(),
                update.confidence,
                update.day_of_month,
                update.day_window,
            ],
        )?;
        Ok(changed)
    }

    fn rules(&self) -> Result<Vec<Rule>> {
        self.collect("SELECT * FROM rules ORDER BY priority DESC, id", rule_from_row)
    }

    fn upsert_rule(&mut self, rule: &Rule) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO rules (name, keywords, keywords_negative, leaf_id, level1,
                level2, txn_type, fix_var, priority, strict, is_system, recurrent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(name) DO UPDATE SET
                keywords = excluded.keywords,
                keywords_negative = excluded.keywords_negative,
                leaf_id = excluded.leaf_id,
                level1 = excluded.level1,
                level2 = excluded.level2,
                txn_type = excluded.txn_type,
                fix_var = excluded.fix_var,
                priority = excluded.priority,
                strict = excluded.strict,
                is_system = excluded.is_system,
                recurrent = excluded.recurrent",
            params![
                rule.name,
                rule.keywords,
                rule.keywords_negative,
                rule.leaf_id,
                rule.level1,
                rule.level2,
                rule.txn_type.as_pt(),
                rule.fix_var.as_pt(),
                rule.priority,
                rule.strict,
                rule.is_system,
                rule.recurrent,
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM rules WHERE name = ?1",
            params![rule.name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn alias_mapping(&self, key_desc: &str) -> Result<Option<AliasMapping>> {
        let mapping = self
            .conn
            .query_row(
                "SELECT key_desc, simple_desc, alias_desc FROM alias_mappings WHERE key_desc = ?1",
                params![key_desc],
                |row| {
                    Ok(AliasMapping {
                        key_desc: row.get(0)?,
                        simple_desc: row.get(1)?,
                        alias_desc: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(mapping)
    }

    fn alias_mappings(&self) -> Result<Vec<AliasMapping>> {
        self.collect(
            "SELECT key_desc, simple_desc, alias_desc FROM alias_mappings ORDER BY key_desc",
            |row| {
                Ok(AliasMapping {
                    key_desc: row.get(0)?,
                    simple_desc: row.get(1)?,
                    alias_desc: row.get(2)?,
                })
            },
        )
    }

    fn upsert_alias_mapping(&mut self, mapping: &AliasMapping) -> Result<()> {
        self.conn.execute(
            "INSERT INTO alias_mappings (key_desc, simple_desc, alias_desc)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key_desc) DO UPDATE SET
                simple_desc = excluded.simple_desc,
                alias_desc = excluded.alias_desc",
            params![mapping.key_desc, mapping.simple_desc, mapping.alias_desc],
        )?;
        Ok(())
    }

    fn alias_assets(&self) -> Result<Vec<AliasAsset>> {
        self.collect(
            "SELECT alias_desc, keywords, icon_url, logo_path FROM alias_assets ORDER BY id",
            |row| {
                Ok(AliasAsset {
                    alias_desc: row.get(0)?,
                    keywords: row.get(1)?,
                    icon_url: row.get(2)?,
                    logo_path: row.get(3)?,
                })
            },
        )
    }

    fn upsert_alias_asset(&mut self, asset: &AliasAsset) -> Result<()> {
        self.conn.execute(
            "INSERT INTO alias_assets (alias_desc, keywords, icon_url, logo_path)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(alias_desc) DO UPDATE SET
                keywords = excluded.keywords,
                icon_url = excluded.icon_url,
                logo_path = excluded.logo_path",
            params![asset.alias_desc, asset.keywords, asset.icon_url, asset.logo_path],
        )?;
        Ok(())
    }

    fn ensure_level1(&mut self, name: &str) -> Result<i64> {
        let existing = self
            .conn
            .query_row(
                "SELECT id FROM level1 WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn
            .execute("INSERT INTO level1 (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn ensure_level2(&mut self, level1_id: i64, name: &str) -> Result<i64> {
        let existing = self
            .conn
            .query_row(
                "SELECT id FROM level2 WHERE level1_id = ?1 AND name = ?2",
                params![level1_id, name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO level2 (level1_id, name) VALUES (?1, ?2)",
            params![level1_id, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn ensure_leaf(&mut self, level2_id: i64, name: &str) -> Result<i64> {
        let existing = self
            .conn
            .query_row(
                "SELECT id FROM leaves WHERE level2_id = ?1 AND name = ?2",
                params![level2_id, name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO leaves (level2_id, name) VALUES (?1, ?2)",
            params![level2_id, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn level1s(&self) -> Result<Vec<Level1>> {
        self.collect("SELECT id, name FROM level1 ORDER BY id", |row| {
            Ok(Level1 {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
    }

    fn level2s(&self) -> Result<Vec<Level2>> {
        self.collect("SELECT id, level1_id, name FROM level2 ORDER BY id", |row| {
            Ok(Level2 {
                id: row.get(0)?,
                level1_id: row.get(1)?,
                name: row.get(2)?,
            })
        })
    }

    fn leaves(&self) -> Result<Vec<Leaf>> {
        self.collect("SELECT id, level2_id, name FROM leaves ORDER BY id", |row| {
            Ok(Leaf {
                id: row.get(0)?,
                level2_id: row.get(1)?,
                name: row.get(2)?,
            })
        })
    }

    fn find_upload_by_checksum(&self, checksum: &str) -> Result<Option<Upload>> {
        let upload = self
            .conn
            .query_row(
                "SELECT * FROM uploads WHERE checksum = ?1 ORDER BY id DESC LIMIT 1",
                params![checksum],
                upload_from_row,
            )
            .optional()?;
        Ok(upload)
    }

    fn insert_upload(&mut self, upload: &Upload) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO uploads (filename, status, rows_total, rows_imported,
                month_affected, error_message, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                upload.filename,
                upload.status.as_str(),
                upload.rows_total as i64,
                upload.rows_imported as i64,
                upload.month_affected,
                upload.error_message,
                upload.checksum,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_upload(&mut self, upload: &Upload) -> Result<()> {
        self.conn.execute(
            "UPDATE uploads SET status = ?2, rows_total = ?3, rows_imported = ?4,
                month_affected = ?5, error_message = ?6 WHERE id = ?1",
            params![
                upload.id,
                upload.status.as_str(),
                upload.rows_total as i64,
                upload.rows_imported as i64,
                upload.month_affected,
                upload.error_message,
            ],
        )?;
        Ok(())
    }

    fn uploads(&self) -> Result<Vec<Upload>> {
        self.collect("SELECT * FROM uploads ORDER BY id", upload_from_row)
    }
}
