use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS uploads (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    status TEXT NOT NULL,
    rows_total INTEGER DEFAULT 0,
    rows_imported INTEGER DEFAULT 0,
    month_affected TEXT,
    error_message TEXT,
    checksum TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS level1 (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS level2 (
    id INTEGER PRIMARY KEY,
    level1_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (level1_id, name),
    FOREIGN KEY (level1_id) REFERENCES level1(id)
);

CREATE TABLE IF NOT EXISTS leaves (
    id INTEGER PRIMARY KEY,
    level2_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (level2_id, name),
    FOREIGN KEY (level2_id) REFERENCES level2(id)
);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    keywords TEXT NOT NULL,
    keywords_negative TEXT,
    leaf_id INTEGER,
    level1 TEXT NOT NULL,
    level2 TEXT,
    txn_type TEXT NOT NULL,
    fix_var TEXT NOT NULL,
    priority INTEGER DEFAULT 500,
    strict INTEGER DEFAULT 0,
    is_system INTEGER DEFAULT 0,
    recurrent INTEGER DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (leaf_id) REFERENCES leaves(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL,
    payment_date TEXT NOT NULL,
    booking_date TEXT NOT NULL,
    account_source TEXT NOT NULL,
    desc_raw TEXT NOT NULL,
    desc_norm TEXT NOT NULL,
    key_desc TEXT NOT NULL,
    simple_desc TEXT NOT NULL,
    alias_desc TEXT,
    amount REAL NOT NULL,
    currency TEXT NOT NULL,
    foreign_amount REAL,
    foreign_currency TEXT,
    exchange_rate REAL,
    bank_reference TEXT,
    key TEXT NOT NULL UNIQUE,
    leaf_id INTEGER,
    txn_type TEXT,
    fix_var TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    classified_by TEXT,
    needs_review INTEGER DEFAULT 1,
    review_reason TEXT,
    rule_id_applied INTEGER,
    suggested_keyword TEXT,
    manual_override INTEGER DEFAULT 0,
    internal_transfer INTEGER DEFAULT 0,
    exclude_from_budget INTEGER DEFAULT 0,
    recurring_flag INTEGER DEFAULT 0,
    recurring_group_id TEXT,
    recurring_confidence REAL,
    recurring_day_of_month INTEGER,
    recurring_day_window INTEGER,
    upload_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (leaf_id) REFERENCES leaves(id),
    FOREIGN KEY (upload_id) REFERENCES uploads(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_key_desc ON transactions(key_desc);
CREATE INDEX IF NOT EXISTS idx_transactions_booking_date ON transactions(booking_date);

CREATE TABLE IF NOT EXISTS alias_mappings (
    key_desc TEXT PRIMARY KEY,
    simple_desc TEXT NOT NULL,
    alias_desc TEXT
);

CREATE TABLE IF NOT EXISTS alias_assets (
    id INTEGER PRIMARY KEY,
    alias_desc TEXT NOT NULL UNIQUE,
    keywords TEXT NOT NULL,
    icon_url TEXT,
    logo_path TEXT
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "uploads",
            "transactions",
            "rules",
            "level1",
            "level2",
            "leaves",
            "alias_mappings",
            "alias_assets",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_transaction_key_is_unique() {
        let (_dir, conn) = test_db();
        let insert = "INSERT INTO transactions (source, payment_date, booking_date, account_source, \
                      desc_raw, desc_norm, key_desc, simple_desc, amount, currency, key) \
                      VALUES ('Sparkasse', '2025-03-14', '2025-03-14', 'Sparkasse (1234)', \
                      'X', 'x', 'x', 'X', -1.0, 'EUR', 'x -- -1.00 -- 2025-03-14')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
