use crate::models::{ClassifiedBy, ReviewReason, Rule, Transaction, TxnStatus};
use crate::textnorm::normalize_desc;

// ---------------------------------------------------------------------------
// Keyword matching
// ---------------------------------------------------------------------------

/// Split a `;`-separated keyword list into normalized, non-empty expressions.
pub fn split_expressions(input: &str) -> Vec<String> {
    input
        .split(';')
        .map(normalize_desc)
        .filter(|e| !e.is_empty())
        .collect()
}

fn matched_expression(haystack: &str, expressions: &[String]) -> Option<String> {
    expressions
        .iter()
        .find(|e| haystack.contains(e.as_str()))
        .cloned()
}

/// Substring match of one rule against a normalized description: any positive
/// keyword must hit and no negative keyword may.
pub fn rule_matches(desc_norm: &str, rule: &Rule) -> Option<String> {
    let positives = split_expressions(&rule.keywords);
    let positive = matched_expression(desc_norm, &positives)?;
    if let Some(negatives) = &rule.keywords_negative {
        if matched_expression(desc_norm, &split_expressions(negatives)).is_some() {
            return None;
        }
    }
    Some(positive)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Classification<'a> {
    /// A single rule (or a strict one) matched and was applied.
    Applied {
        rule: &'a Rule,
        matched_keyword: String,
        confidence: f64,
    },
    NoRule,
    /// Several non-strict rules matched. The ambiguity is surfaced for
    /// review instead of picking one by priority.
    Conflict { rule_ids: Vec<i64> },
}

/// Score an applied rule on a 0-100 scale. Strict rules are always certain;
/// the rest start at 70 and gain for system provenance and priority tier.
pub fn confidence(rule: &Rule) -> f64 {
    if rule.strict {
        return 100.0;
    }
    let mut score: f64 = 70.0;
    if rule.is_system {
        score += 10.0;
    }
    if rule.priority >= 800 {
        score += 15.0;
    } else if rule.priority >= 600 {
        score += 10.0;
    } else if rule.priority >= 500 {
        score += 5.0;
    }
    score.min(100.0)
}

/// Match the active rule set against a normalized description. Rules are
/// evaluated by priority, newest first within a tier, so user rules shadow
/// the seeded defaults. A strict rule that matches wins outright; otherwise
/// exactly one match applies, zero leaves the transaction unclassified, and
/// two or more are reported as a conflict.
pub fn classify<'a>(desc_norm: &str, rules: &'a [Rule]) -> Classification<'a> {
    let mut ordered: Vec<&Rule> = rules.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.id.cmp(&a.id)));

    let mut matches: Vec<(&Rule, String)> = Vec::new();
    for rule in ordered {
        let Some(keyword) = rule_matches(desc_norm, rule) else {
            continue;
        };
        if rule.strict {
            return Classification::Applied {
                rule,
                matched_keyword: keyword,
                confidence: confidence(rule),
            };
        }
        matches.push((rule, keyword));
    }

    match matches.len() {
        0 => Classification::NoRule,
        1 => {
            let (rule, matched_keyword) = matches.remove(0);
            Classification::Applied {
                rule,
                matched_keyword,
                confidence: confidence(rule),
            }
        }
        _ => Classification::Conflict {
            rule_ids: matches.iter().map(|(r, _)| r.id).collect(),
        },
    }
}

/// Write a classification outcome into a transaction. A configured
/// confidence threshold gates the `Open -> Final` transition only; the
/// category fields are applied either way.
pub fn apply(txn: &mut Transaction, outcome: &Classification, confidence_threshold: Option<f64>) {
    match outcome {
        Classification::Applied {
            rule, confidence, ..
        } => {
            txn.leaf_id = rule.leaf_id;
            txn.txn_type = Some(rule.txn_type);
            txn.fix_var = Some(rule.fix_var);
            txn.needs_review = false;
            txn.review_reason = None;
            txn.classified_by = Some(ClassifiedBy::AutoKeywords);
            txn.rule_id_applied = Some(rule.id);
            let internal = rule.level1.eq_ignore_ascii_case("interno");
            txn.internal_transfer = internal;
            txn.exclude_from_budget = internal;
            txn.status = if confidence_threshold.map_or(true, |t| *confidence >= t) {
                TxnStatus::Final
            } else {
                TxnStatus::Open
            };
        }
        Classification::NoRule => {
            txn.needs_review = true;
            txn.review_reason = Some(ReviewReason::NoRule);
            txn.status = TxnStatus::Open;
        }
        Classification::Conflict { rule_ids } => {
            txn.needs_review = true;
            txn.review_reason = Some(ReviewReason::Conflict {
                rule_ids: rule_ids.clone(),
            });
            txn.status = TxnStatus::Open;
        }
    }
}

/// Seed text for a new rule covering an unclassified description: the first
/// three words of the leading `--` segment.
pub fn suggest_keyword(desc: &str) -> String {
    let first = desc.split("--").next().unwrap_or("").trim();
    if first.is_empty() {
        return desc.chars().take(30).collect();
    }
    first.split_whitespace().take(3).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FixVar, Source, TxnType};
    use chrono::NaiveDate;

    fn rule(id: i64, name: &str, keywords: &str, priority: i64, strict: bool) -> Rule {
        Rule {
            id,
            name: name.into(),
            keywords: keywords.into(),
            keywords_negative: None,
            leaf_id: Some(id * 10),
            level1: name.into(),
            level2: None,
            txn_type: TxnType::Expense,
            fix_var: FixVar::Variable,
            priority,
            strict,
            is_system: false,
            recurrent: false,
        }
    }

    fn txn(desc_norm: &str) -> Transaction {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        Transaction::from_parsed(crate::models::ParsedTransaction {
            source: Source::Sparkasse,
            payment_date: date,
            booking_date: date,
            account_source: "Sparkasse (1234)".into(),
            desc_raw: desc_norm.to_uppercase(),
            desc_norm: desc_norm.into(),
            key_desc: desc_norm.into(),
            simple_desc: desc_norm.into(),
            amount: -10.0,
            currency: "EUR".into(),
            foreign_amount: None,
            foreign_currency: None,
            exchange_rate: None,
            bank_reference: None,
            key: format!("{desc_norm} -- -10.00 -- 2025-03-14"),
        })
    }

    #[test]
    fn test_single_match_is_applied() {
        let rules = vec![
            rule(1, "Mercado", "REWE;EDEKA", 900, false),
            rule(2, "Transporte", "TANKSTELLE;MVV", 600, false),
        ];
        match classify("rewe markt koeln -- sparkasse", &rules) {
            Classification::Applied { rule, matched_keyword, .. } => {
                assert_eq!(rule.id, 1);
                assert_eq!(matched_keyword, "rewe");
            }
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[test]
    fn test_no_match_yields_no_rule() {
        let rules = vec![rule(1, "Mercado", "REWE", 900, false)];
        assert!(matches!(
            classify("unbekannter haendler", &rules),
            Classification::NoRule
        ));
    }

    #[test]
    fn test_two_matches_conflict_with_ids_in_order() {
        let rules = vec![
            rule(1, "Lazer", "NETFLIX", 580, false),
            rule(2, "Assinaturas", "NETFLIX", 570, false),
        ];
        match classify("netflix.com -- m&m", &rules) {
            Classification::Conflict { rule_ids } => assert_eq!(rule_ids, vec![1, 2]),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_strict_rule_short_circuits_over_other_matches() {
        let rules = vec![
            rule(9, "Receitas", "REEMBOLSO;ZAHLUNG", 800, false),
            rule(1, "Interno", "PAGAMENTO AMEX;PAGAMENTO M&M", 1000, true),
        ];
        match classify("zahlung erhalten besten dank -- amex [x] -- pagamento amex", &rules) {
            Classification::Applied { rule, .. } => assert_eq!(rule.id, 1),
            other => panic!("expected strict Applied, got {other:?}"),
        }
    }

    #[test]
    fn test_negative_keyword_vetoes_rule() {
        let mut grocery = rule(1, "Mercado", "REWE", 900, false);
        grocery.keywords_negative = Some("TANKSTELLE".into());
        let rules = vec![grocery];
        assert!(matches!(
            classify("rewe tankstelle shop", &rules),
            Classification::NoRule
        ));
        assert!(matches!(
            classify("rewe markt", &rules),
            Classification::Applied { .. }
        ));
    }

    #[test]
    fn test_keywords_are_diacritic_folded() {
        let rules = vec![rule(1, "Mercado", "MÜLLER", 900, false)];
        let desc_norm = normalize_desc("MÜLLER Filiale 22 -- Sparkasse");
        assert_eq!(desc_norm, "muller filiale 22 -- sparkasse");
        assert!(matches!(
            classify(&desc_norm, &rules),
            Classification::Applied { .. }
        ));
    }

    #[test]
    fn test_newer_rule_wins_the_strict_race_within_a_tier() {
        let mut old = rule(1, "Interno", "LASTSCHRIFT", 1000, true);
        old.is_system = true;
        let newer = rule(7, "Interno", "LASTSCHRIFT EINZUG", 1000, true);
        let rules = vec![old, newer];
        match classify("lastschrift einzug -- m&m", &rules) {
            Classification::Applied { rule, .. } => assert_eq!(rule.id, 7),
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[test]
    fn test_confidence_tiers() {
        let strict = rule(1, "Interno", "X", 1000, true);
        assert_eq!(confidence(&strict), 100.0);

        let mut system_high = rule(2, "Receitas", "X", 800, false);
        system_high.is_system = true;
        assert_eq!(confidence(&system_high), 95.0);

        let low = rule(3, "Outros", "X", 500, false);
        assert_eq!(confidence(&low), 75.0);
    }

    #[test]
    fn test_apply_sets_classification_fields() {
        let mut grocery = rule(1, "Mercado", "REWE", 900, false);
        grocery.is_system = true;
        let rules = vec![grocery];
        let mut t = txn("rewe markt -- sparkasse");
        let outcome = classify(&t.desc_norm, &rules);
        apply(&mut t, &outcome, None);

        assert!(!t.needs_review);
        assert_eq!(t.status, TxnStatus::Final);
        assert_eq!(t.classified_by, Some(ClassifiedBy::AutoKeywords));
        assert_eq!(t.rule_id_applied, Some(1));
        assert_eq!(t.leaf_id, Some(10));
        assert_eq!(t.txn_type, Some(TxnType::Expense));
        assert!(!t.internal_transfer);
    }

    #[test]
    fn test_apply_interno_flags_internal_transfer() {
        let interno = rule(1, "Interno", "PAGAMENTO AMEX", 1000, true);
        let rules = vec![interno];
        let mut t = txn("zahlung -- pagamento amex");
        let outcome = classify(&t.desc_norm, &rules);
        apply(&mut t, &outcome, None);

        assert!(t.internal_transfer);
        assert!(t.exclude_from_budget);
    }

    #[test]
    fn test_apply_below_threshold_stays_open() {
        let rules = vec![rule(1, "Outros", "WISE", 500, false)];
        let mut t = txn("wise transfer");
        let outcome = classify(&t.desc_norm, &rules);
        apply(&mut t, &outcome, Some(90.0));

        // fields applied, review cleared, but not confirmed
        assert!(!t.needs_review);
        assert_eq!(t.rule_id_applied, Some(1));
        assert_eq!(t.status, TxnStatus::Open);
    }

    #[test]
    fn test_apply_conflict_records_reason() {
        let rules = vec![
            rule(1, "Lazer", "SPOTIFY", 580, false),
            rule(2, "Assinaturas", "SPOTIFY", 570, false),
        ];
        let mut t = txn("spotify ab 123");
        let outcome = classify(&t.desc_norm, &rules);
        apply(&mut t, &outcome, None);

        assert!(t.needs_review);
        assert_eq!(
            t.review_reason,
            Some(ReviewReason::Conflict { rule_ids: vec![1, 2] })
        );
        assert!(t.rule_id_applied.is_none());
    }

    #[test]
    fn test_suggest_keyword_takes_three_words() {
        assert_eq!(
            suggest_keyword("rewe markt koeln sued -- sparkasse"),
            "rewe markt koeln"
        );
        assert_eq!(suggest_keyword("netflix.com"), "netflix.com");
        assert_eq!(suggest_keyword(""), "");
    }
}
