use log::info;

use crate::error::Result;
use crate::models::{FixVar, Rule, TxnType};
use crate::store::Store;

/// Canonical level-1 budget categories. Bulk imports may add level-2 and
/// leaf nodes under these, but the top level is fixed.
pub const LEVEL1_NAMES: [&str; 9] = [
    "Receitas",
    "Moradia",
    "Mercado",
    "Compras Online",
    "Transporte",
    "Saúde",
    "Lazer",
    "Outros",
    "Interno",
];

// name, keywords, type, fix/var, level1, level2, priority, strict
const SYSTEM_RULES: [(
    &str,
    &str,
    TxnType,
    FixVar,
    &str,
    Option<&str>,
    i64,
    bool,
); 10] = [
    (
        "Interno",
        "AMEX - ZAHLUNG;ZAHLUNG ERHALTEN;PAGAMENTO AMEX;PAGAMENTO M&M;AMERICAN EXPRESS ZAHLUNG;DEUTSCHE KREDITBANK;LASTSCHRIFT",
        TxnType::Expense,
        FixVar::Fixed,
        "Interno",
        Some("Transferencias"),
        1000,
        true,
    ),
    (
        "Mercado",
        "REWE;EDEKA;ALDI;LIDL;NETTO;NORMA;DM;DM-DROGERIE;ROSSMANN;MUELLER;MÜLLER;ASIA MARKT;BACKSTUBE;BAECKEREI;IHLE;WUENSCHE;FRUCHTWERK",
        TxnType::Expense,
        FixVar::Variable,
        "Mercado",
        Some("Supermercado"),
        900,
        true,
    ),
    (
        "Receitas",
        "ENTGELT;SALARIO;BONUS;KINDERGELD;ARBEIT;BUNDESAGENTUR;FINANZAMT;STEUER;REEMBOLSO",
        TxnType::Income,
        FixVar::Fixed,
        "Receitas",
        Some("Salario"),
        800,
        false,
    ),
    (
        "Moradia",
        "DARLEHEN;FINANCIAMENTO;GRUNDSTEUER;FERNWARME;STROM;LICHTBLICK;VATTENFALL;WASSER;MONATSMIETE;RUNDFUNK ARD;BAYERISCHER RUNDFUNK",
        TxnType::Expense,
        FixVar::Fixed,
        "Moradia",
        Some("Casa"),
        700,
        false,
    ),
    (
        "Compras Online",
        "AMAZON;AMZN;AMZ*;TEMU;ZALANDO;ABOUT YOU;HM.COM;DECATHLON;MEDIAMARKT;SATURN;KLEINANZEIGEN;JYSK;HOLLISTER",
        TxnType::Expense,
        FixVar::Variable,
        "Compras Online",
        Some("E-commerce"),
        650,
        false,
    ),
    (
        "Saude",
        "APOTHEKE;ZAHNARZT;PRAXIS;ARZT;HAUTARZT;LABOR;APOLLO OPTIK;BOTOX;COLAGENO",
        TxnType::Expense,
        FixVar::Variable,
        "Saúde",
        Some("Medico"),
        620,
        false,
    ),
    (
        "Transporte",
        "TANKSTELLE;ALLGUTH;KFZ-STEUER;KFZ-VERSICHERUNG;PARKHAUS;HANDYPARKEN;MVV;TICKETSHOP;LOGPAY;VOI;UBER;99APP;LIME;TFL TRAVEL",
        TxnType::Expense,
        FixVar::Variable,
        "Transporte",
        Some("Taxi/Apps"),
        600,
        false,
    ),
    (
        "Lazer",
        "RESTAURANT;MCDONALDS;PIZZA HUT;RISTORANTE;EISCAFE;FIVE GUYS;BURGER KING;CAFE;COFFEE;PRIME VIDEO;CINEMA;ROBLOX;NETFLIX;DISNEY;SPOTIFY;YOUTUBE;APPLE.COM/BILL;GOOGLE*GOOGLE ONE",
        TxnType::Expense,
        FixVar::Variable,
        "Lazer",
        Some("Entretenimento"),
        580,
        false,
    ),
    (
        "Assinaturas",
        "NETFLIX;SPOTIFY;APPLE TV;DISNEY;PARAMOUNT;AMAZON PRIM;AUDIBLE;OPENAI;CHATGPT;CLAUDE.AI;FIGMA;CANVA;CAPCUT;GOOGLE*GOOGLE ONE;YOUTUBE PREMIU",
        TxnType::Expense,
        FixVar::Fixed,
        "Lazer",
        Some("Streaming"),
        570,
        false,
    ),
    (
        "Outros",
        "DEVK;AOK;VERSICHERUNG;ZINSBELASTUNG;ENTGELTABSCHLUSS;KARTENPREIS;1,95%;ING-DIBA;RAHMENKREDIT;FRESSNAPF;FUTALIS;WISE;WESTERN UNION;WAHRUNGSUMRECHN",
        TxnType::Expense,
        FixVar::Variable,
        "Outros",
        None,
        500,
        false,
    ),
];

fn system_rules() -> Vec<Rule> {
    SYSTEM_RULES
        .iter()
        .map(
            |&(name, keywords, txn_type, fix_var, level1, level2, priority, strict)| Rule {
                id: 0,
                name: name.to_string(),
                keywords: keywords.to_string(),
                keywords_negative: None,
                leaf_id: None,
                level1: level1.to_string(),
                level2: level2.map(str::to_string),
                txn_type,
                fix_var,
                priority,
                strict,
                is_system: true,
                recurrent: false,
            },
        )
        .collect()
}

/// Installs the level-1 taxonomy and the system keyword rules on first run.
/// Does nothing once system rules are present, so user edits survive.
pub fn ensure_installed(store: &mut dyn Store) -> Result<usize> {
    if store.rules()?.iter().any(|r| r.is_system) {
        return Ok(0);
    }

    for name in LEVEL1_NAMES {
        store.ensure_level1(name)?;
    }

    let mut installed = 0;
    for rule in system_rules() {
        let level1_id = store.ensure_level1(&rule.level1)?;
        if let Some(level2) = &rule.level2 {
            store.ensure_level2(level1_id, level2)?;
        }
        store.upsert_rule(&rule)?;
        installed += 1;
    }
    info!("installed {installed} system rules");
    Ok(installed)
}
