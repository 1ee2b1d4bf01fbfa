//! Bank statement import pipeline: decodes and parses Sparkasse, Amex, and
//! Miles & More CSV exports into one deduplicated ledger, classifies
//! transactions by keyword rules, resolves merchant aliases, and tags
//! monthly recurring payments.

pub mod alias;
pub mod classifier;
pub mod contract;
pub mod db;
pub mod decode;
pub mod detect;
pub mod diag;
pub mod engine;
pub mod error;
pub mod export;
pub mod importer;
pub mod key;
pub mod models;
pub mod recurrence;
pub mod seed;
pub mod settings;
pub mod store;
pub mod taxonomy;
pub mod textnorm;

pub use contract::{ContractReport, Dataset};
pub use decode::Encoding;
pub use detect::{detect_format, Format};
pub use engine::{run_import, ImportReport, ImportRequest};
pub use error::{ErrorCode, ImportError, Result};
pub use importer::{parse_bytes, parse_file, ParseOutcome};
pub use models::{Transaction, TxnStatus, UploadStatus};
pub use settings::Settings;
pub use store::{SqliteStore, Store};
