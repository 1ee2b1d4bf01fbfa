use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::textnorm::normalize_desc;

// ---------------------------------------------------------------------------
// Enums — closed variants for what the source data models as strings
// ---------------------------------------------------------------------------

/// Which bank export a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Sparkasse,
    Amex,
    MilesAndMore,
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sparkasse => "Sparkasse",
            Self::Amex => "Amex",
            Self::MilesAndMore => "M&M",
        }
    }

    pub fn parse_label(value: &str) -> Option<Self> {
        match value {
            "Sparkasse" => Some(Self::Sparkasse),
            "Amex" => Some(Self::Amex),
            "M&M" => Some(Self::MilesAndMore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnType {
    Expense,
    Income,
}

impl TxnType {
    /// Dataset label used by the bulk CSV contract.
    pub fn as_pt(&self) -> &'static str {
        match self {
            Self::Expense => "Despesa",
            Self::Income => "Receita",
        }
    }

    pub fn parse_pt(value: &str) -> Option<Self> {
        match normalize_desc(value).as_str() {
            "despesa" => Some(Self::Expense),
            "receita" => Some(Self::Income),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixVar {
    Fixed,
    Variable,
}

impl FixVar {
    pub fn as_pt(&self) -> &'static str {
        match self {
            Self::Fixed => "Fixo",
            Self::Variable => "Variável",
        }
    }

    pub fn parse_pt(value: &str) -> Option<Self> {
        match normalize_desc(value).as_str() {
            "fixo" => Some(Self::Fixed),
            "variavel" => Some(Self::Variable),
            _ => None,
        }
    }
}

/// Classification state machine: `Open` until a human or a rule confirms,
/// then `Final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Open,
    Final,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Final => "final",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "final" => Some(Self::Final),
            _ => None,
        }
    }
}

/// How a transaction entered the `Final` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifiedBy {
    AutoKeywords,
    Manual,
    AiSuggestion,
}

impl ClassifiedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoKeywords => "auto_keywords",
            Self::Manual => "manual",
            Self::AiSuggestion => "ai_suggestion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto_keywords" => Some(Self::AutoKeywords),
            "manual" => Some(Self::Manual),
            "ai_suggestion" => Some(Self::AiSuggestion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Processing,
    Ready,
    Duplicate,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "duplicate" => Some(Self::Duplicate),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Why a transaction is waiting for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReviewReason {
    /// No rule matched the key description.
    NoRule,
    /// Several rules matched; ambiguity is surfaced, never silently resolved.
    Conflict { rule_ids: Vec<i64> },
}

// ---------------------------------------------------------------------------
// Pipeline output
// ---------------------------------------------------------------------------

/// Canonical transaction emitted by the row normalizer, before persistence
/// and classification. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub source: Source,
    pub payment_date: NaiveDate,
    pub booking_date: NaiveDate,
    pub account_source: String,
    pub desc_raw: String,
    pub desc_norm: String,
    pub key_desc: String,
    pub simple_desc: String,
    pub amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_reference: Option<String>,
    /// Dedup identity, unique per user.
    pub key: String,
}

/// Ledger transaction as persisted by a [`crate::store::Store`], carrying the
/// classification, alias, and recurrence fields attached downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub source: Source,
    pub payment_date: NaiveDate,
    pub booking_date: NaiveDate,
    pub account_source: String,
    pub desc_raw: String,
    pub desc_norm: String,
    pub key_desc: String,
    pub simple_desc: String,
    pub alias_desc: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub foreign_amount: Option<f64>,
    pub foreign_currency: Option<String>,
    pub exchange_rate: Option<f64>,
    pub bank_reference: Option<String>,
    pub key: String,
    pub leaf_id: Option<i64>,
    pub txn_type: Option<TxnType>,
    pub fix_var: Option<FixVar>,
    pub status: TxnStatus,
    pub classified_by: Option<ClassifiedBy>,
    pub needs_review: bool,
    pub review_reason: Option<ReviewReason>,
    pub rule_id_applied: Option<i64>,
    pub suggested_keyword: Option<String>,
    pub manual_override: bool,
    pub internal_transfer: bool,
    pub exclude_from_budget: bool,
    pub recurring_flag: bool,
    pub recurring_group_id: Option<Uuid>,
    pub recurring_confidence: Option<f64>,
    pub recurring_day_of_month: Option<u32>,
    pub recurring_day_window: Option<u32>,
    pub upload_id: Option<i64>,
}

impl Transaction {
    /// Wrap a parsed transaction with unset downstream fields. Classification
    /// and alias resolution fill the rest in during the import run.
    pub fn from_parsed(parsed: ParsedTransaction) -> Self {
        Self {
            id: 0,
            source: parsed.source,
            payment_date: parsed.payment_date,
            booking_date: parsed.booking_date,
            account_source: parsed.account_source,
            desc_raw: parsed.desc_raw,
            desc_norm: parsed.desc_norm,
            key_desc: parsed.key_desc,
            simple_desc: parsed.simple_desc,
            alias_desc: None,
            amount: parsed.amount,
            currency: parsed.currency,
            foreign_amount: parsed.foreign_amount,
            foreign_currency: parsed.foreign_currency,
            exchange_rate: parsed.exchange_rate,
            bank_reference: parsed.bank_reference,
            key: parsed.key,
            leaf_id: None,
            txn_type: None,
            fix_var: None,
            status: TxnStatus::Open,
            classified_by: None,
            needs_review: true,
            review_reason: None,
            rule_id_applied: None,
            suggested_keyword: None,
            manual_override: false,
            internal_transfer: false,
            exclude_from_budget: false,
            recurring_flag: false,
            recurring_group_id: None,
            recurring_confidence: None,
            recurring_day_of_month: None,
            recurring_day_window: None,
            upload_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rules and taxonomy
// ---------------------------------------------------------------------------

/// Keyword classification rule targeting a leaf of the 3-level taxonomy.
/// `level1`/`level2` are denormalized from the leaf for cheap checks like the
/// internal-transfer flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    /// Semicolon-separated positive keyword expressions.
    pub keywords: String,
    /// Semicolon-separated negative keyword expressions; any hit vetoes.
    pub keywords_negative: Option<String>,
    pub leaf_id: Option<i64>,
    pub level1: String,
    pub level2: Option<String>,
    pub txn_type: TxnType,
    pub fix_var: FixVar,
    pub priority: i64,
    pub strict: bool,
    pub is_system: bool,
    pub recurrent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level1 {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level2 {
    pub id: i64,
    pub level1_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub id: i64,
    pub level2_id: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Merchant dictionary
// ---------------------------------------------------------------------------

/// One entry of the merchant dictionary: a normalized key description and the
/// display strings resolved for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasMapping {
    pub key_desc: String,
    pub simple_desc: String,
    pub alias_desc: Option<String>,
}

/// Alias-match rule: assigns `alias_desc` to any key description matching one
/// of its keywords. Evaluated in insertion order, first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasAsset {
    pub alias_desc: String,
    /// Semicolon-separated positive keyword expressions.
    pub keywords: String,
    pub icon_url: Option<String>,
    pub logo_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Upload bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub filename: String,
    pub status: UploadStatus,
    pub rows_total: usize,
    pub rows_imported: usize,
    pub month_affected: Option<String>,
    pub error_message: Option<String>,
    pub checksum: String,
}
