use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SPARKASSE_HEADER: &str = "Auftragskonto;Buchungstag;Valutadatum;Buchungstext;Verwendungszweck;Glaeubiger ID;Mandatsreferenz;Kundenreferenz (End-to-End);Sammlerreferenz;Lastschrift Ursprungsbetrag;Auslagenersatz Ruecklastschrift;Beguenstigter/Zahlungspflichtiger;Kontonummer/IBAN;BIC (SWIFT-Code);Betrag;Waehrung;Info";

const CLASSIFICATION_HEADER: &str = "App classificação;Nível_1_PT;Nível_2_PT;Nível_3_PT;Key_words;Key_words_negative;Receita/Despesa;Fixo/Variável;Recorrente";

fn sparkasse_row(date: &str, beneficiary: &str, purpose: &str, amount: &str) -> String {
    format!(
        "DE11;{date};{date};KARTENZAHLUNG;{purpose};;MREF-1;NOTPROVIDED;;;;{beneficiary};DE02120300000000202051;BYLADEM1001;{amount};EUR;"
    )
}

fn write_sparkasse(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut content = String::from(SPARKASSE_HEADER);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    fs::write(&path, content).unwrap();
    path
}

/// Every test gets its own HOME so settings and the database land in a
/// throwaway directory.
fn umsatz(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("umsatz").unwrap();
    cmd.env("HOME", home.path());
    cmd
}

#[test]
fn import_reports_ready_with_counts() {
    let home = TempDir::new().unwrap();
    let row = sparkasse_row("15.03.2025", "REWE Markt GmbH", "Einkauf Filiale 22", "-42,50");
    let file = write_sparkasse(home.path(), "statement.csv", &[&row]);

    umsatz(&home)
        .args(["import", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ready")
                .and(predicate::str::contains("Format: Sparkasse"))
                .and(predicate::str::contains("Month:  2025-03")),
        );
}

#[test]
fn import_json_emits_report() {
    let home = TempDir::new().unwrap();
    let row = sparkasse_row("02.01.2025", "Stadtwerke", "Abschlag Strom", "-89,00");
    let file = write_sparkasse(home.path(), "statement.csv", &[&row]);

    umsatz(&home)
        .args(["import", file.to_str().unwrap(), "--json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"rows_imported\": 1")
                .and(predicate::str::contains("\"status\"")),
        );
}

#[test]
fn reimporting_the_same_file_is_a_duplicate() {
    let home = TempDir::new().unwrap();
    let row = sparkasse_row("15.03.2025", "REWE Markt GmbH", "Einkauf", "-42,50");
    let file = write_sparkasse(home.path(), "statement.csv", &[&row]);

    umsatz(&home)
        .args(["import", file.to_str().unwrap()])
        .assert()
        .success();

    umsatz(&home)
        .args(["import", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("duplicate"));
}

#[test]
fn import_of_missing_file_fails() {
    let home = TempDir::new().unwrap();
    umsatz(&home)
        .args(["import", "/no/such/statement.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn import_rejects_unknown_format_key() {
    let home = TempDir::new().unwrap();
    let row = sparkasse_row("15.03.2025", "REWE", "Einkauf", "-1,00");
    let file = write_sparkasse(home.path(), "statement.csv", &[&row]);

    umsatz(&home)
        .args(["import", file.to_str().unwrap(), "--format", "qif"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format"));
}

#[test]
fn import_rejects_malformed_import_date() {
    let home = TempDir::new().unwrap();
    let row = sparkasse_row("15.03.2025", "REWE", "Einkauf", "-1,00");
    let file = write_sparkasse(home.path(), "statement.csv", &[&row]);

    umsatz(&home)
        .args(["import", file.to_str().unwrap(), "--import-date", "03/15/2025"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --import-date"));
}

#[test]
fn detect_prints_encoding_and_dialect() {
    let home = TempDir::new().unwrap();
    let row = sparkasse_row("15.03.2025", "REWE", "Einkauf", "-1,00");
    let file = write_sparkasse(home.path(), "statement.csv", &[&row]);

    umsatz(&home)
        .args(["detect", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("utf-8").and(predicate::str::contains("Sparkasse")));
}

#[test]
fn import_data_then_export_round_trips_a_rule() {
    let home = TempDir::new().unwrap();
    let template = home.path().join("classification.csv");
    fs::write(
        &template,
        format!("{CLASSIFICATION_HEADER}\nPadaria;Mercado;Padaria;Pão diário;PADARIA;;Despesa;Variável;\n"),
    )
    .unwrap();

    umsatz(&home)
        .args(["import-data", "classification", template.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 rows applied").and(predicate::str::contains("1 rules")));

    let out = home.path().join("export.csv");
    umsatz(&home)
        .args(["export", "classification", "--out", out.to_str().unwrap()])
        .assert()
        .success();

    let exported = fs::read(&out).unwrap();
    assert_eq!(&exported[..3], [0xef, 0xbb, 0xbf]);
    let text = String::from_utf8(exported).unwrap();
    assert!(text.contains("App classificação"));
    assert!(text.contains("Padaria"));
}

#[test]
fn import_data_rejects_renamed_header() {
    let home = TempDir::new().unwrap();
    let template = home.path().join("classification.csv");
    let broken = CLASSIFICATION_HEADER.replace("Key_words;", "Keywords;");
    fs::write(&template, format!("{broken}\n")).unwrap();

    umsatz(&home)
        .args(["import-data", "classification", template.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(
            predicate::str::contains("HEADER_MISMATCH")
                .and(predicate::str::contains("missing columns")),
        );
}

#[test]
fn export_rejects_unknown_dataset() {
    let home = TempDir::new().unwrap();
    let out = home.path().join("out.csv");
    umsatz(&home)
        .args(["export", "everything", "--out", out.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown dataset"));
}

#[test]
fn config_set_then_show_round_trips() {
    let home = TempDir::new().unwrap();
    umsatz(&home)
        .args(["config", "--user-name", "Alice", "--threshold", "90"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("user_name: Alice")
                .and(predicate::str::contains("threshold: 90")),
        );

    umsatz(&home)
        .args(["config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("threshold: 90"));
}

#[test]
fn config_rejects_out_of_range_threshold() {
    let home = TempDir::new().unwrap();
    umsatz(&home)
        .args(["config", "--threshold", "150"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("between 0 and 100"));
}

#[test]
fn completions_prints_a_script() {
    let home = TempDir::new().unwrap();
    umsatz(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("umsatz"));
}
