use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use chrono::{Local, NaiveDate};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use comfy_table::Table;

use umsatz::contract::{self, ContractReport, Dataset};
use umsatz::decode::{self, REPLACEMENT_RATIO_LIMIT};
use umsatz::detect::{detect_format, Format};
use umsatz::engine::{run_import, ImportReport, ImportRequest};
use umsatz::export;
use umsatz::models::UploadStatus;
use umsatz::seed;
use umsatz::settings::{
    get_data_dir, load_settings, save_settings, settings_file_exists, shellexpand_path,
};
use umsatz::store::SqliteStore;
use umsatz::taxonomy;

#[derive(Parser)]
#[command(
    name = "umsatz",
    about = "Bank statement import: Sparkasse, Amex, and Miles & More CSVs into one classified ledger."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a bank CSV export and classify its transactions.
    Import {
        /// Path to the CSV file to import
        file: String,
        /// Force a dialect instead of detecting it: sparkasse, amex, mm
        #[arg(long)]
        format: Option<String>,
        /// Print the import report as JSON
        #[arg(long)]
        json: bool,
        /// Statement date used when rows omit one: YYYY-MM-DD (default: today)
        #[arg(long = "import-date")]
        import_date: Option<String>,
    },
    /// Show the detected encoding and dialect of a file without importing.
    Detect {
        /// Path to the CSV file to inspect
        file: String,
    },
    /// Export a dataset as a template CSV: classification, aliases, assets.
    Export {
        /// Dataset name
        dataset: String,
        /// Output file path
        #[arg(long)]
        out: String,
    },
    /// Validate and apply a bulk template CSV: classification, aliases, assets.
    ImportData {
        /// Dataset name
        dataset: String,
        /// Path to the template CSV file
        file: String,
    },
    /// Show the configuration, or update it when flags are given.
    Config {
        /// Directory holding the ledger database (`~` expands)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Name recorded with manual edits
        #[arg(long = "user-name")]
        user_name: Option<String>,
        /// Auto-finalize threshold in percent, or `off` to finalize every match
        #[arg(long)]
        threshold: Option<String>,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import {
            file,
            format,
            json,
            import_date,
        } => import_cmd(&file, format.as_deref(), json, import_date.as_deref()),
        Commands::Detect { file } => detect_cmd(&file),
        Commands::Export { dataset, out } => export_cmd(&dataset, &out),
        Commands::ImportData { dataset, file } => import_data_cmd(&dataset, &file),
        Commands::Config {
            data_dir,
            user_name,
            threshold,
        } => config_cmd(data_dir.as_deref(), user_name.as_deref(), threshold.as_deref()),
        Commands::Completions { shell } => completions_cmd(shell),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Open the SQLite ledger under the configured data dir, installing the
/// system rule set on first use.
fn open_store() -> Result<SqliteStore> {
    let data_dir = get_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let mut store = SqliteStore::open(&data_dir.join("umsatz.db"))?;
    seed::ensure_installed(&mut store)?;
    Ok(store)
}

fn parse_dataset(key: &str) -> Result<Dataset> {
    match key.to_lowercase().as_str() {
        "classification" => Ok(Dataset::Classification),
        "aliases" | "aliases_key_desc" => Ok(Dataset::AliasesKeyDesc),
        "assets" | "aliases_assets" => Ok(Dataset::AliasesAssets),
        _ => bail!("unknown dataset '{key}' (supported: classification, aliases, assets)"),
    }
}

fn import_cmd(file: &str, format: Option<&str>, json: bool, import_date: Option<&str>) -> Result<()> {
    let format_override = match format {
        Some(key) => Some(Format::from_key(key).ok_or_else(|| {
            anyhow!("unknown format '{key}' (supported: sparkasse, amex, mm)")
        })?),
        None => None,
    };
    let import_date = match import_date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| anyhow!("invalid --import-date '{raw}', expected YYYY-MM-DD"))?,
        None => Local::now().date_naive(),
    };

    let settings = load_settings();
    let mut store = open_store()?;
    let request = ImportRequest {
        path: PathBuf::from(file),
        import_date,
        encoding_hint: None,
        format_override,
    };
    let report = run_import(&mut store, &settings, &request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&request.path, &report);
    }

    if report.status == UploadStatus::Error {
        bail!("import failed");
    }
    Ok(())
}

fn print_report(path: &Path, report: &ImportReport) {
    let status = match report.status {
        UploadStatus::Ready => "ready".green(),
        UploadStatus::Duplicate => "duplicate".yellow(),
        UploadStatus::Error => "error".red(),
        UploadStatus::Processing => "processing".normal(),
    };
    println!("{}: {status}", path.display());
    if let Some(format) = report.format {
        println!("Format: {}", format.label());
    }
    if let Some(month) = &report.month_affected {
        println!("Month:  {month}");
    }

    let mut table = Table::new();
    table.set_header(vec!["Rows", "Imported", "Duplicates", "Auto-classified", "Open"]);
    table.add_row(vec![
        report.rows_total.to_string(),
        report.rows_imported.to_string(),
        report.duplicates.to_string(),
        report.auto_classified.to_string(),
        report.open_count.to_string(),
    ]);
    println!("{table}");

    for message in &report.errors {
        println!("  {} {message}", "!".yellow());
    }
    if let Some(error) = &report.error {
        println!("{} {}", error.code.as_str().red(), error.message);
        println!("  {}", error.hint);
    }
}

fn detect_cmd(file: &str) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let decoded = decode::decode(&bytes, None, REPLACEMENT_RATIO_LIMIT)?;
    println!("Encoding: {}", decoded.encoding.as_str());
    match detect_format(&decoded.text) {
        Some(format) => println!("Format:   {}", format.label()),
        None => {
            println!("Format:   not recognized (supported: Sparkasse, Amex, Miles & More)")
        }
    }
    Ok(())
}

fn export_cmd(dataset_key: &str, out: &str) -> Result<()> {
    let dataset = parse_dataset(dataset_key)?;
    let store = open_store()?;
    let csv = export::export_dataset(&store, dataset)?;
    std::fs::write(out, csv)?;
    println!("Wrote {} to {out}", dataset.key());
    Ok(())
}

fn import_data_cmd(dataset_key: &str, file: &str) -> Result<()> {
    let dataset = parse_dataset(dataset_key)?;
    let bytes = std::fs::read(file)?;
    let filename = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());

    let report = contract::validate(dataset, &bytes, &filename);
    if !report.success {
        print_rejection(&report);
        bail!("{filename} rejected");
    }

    let mut store = open_store()?;
    match dataset {
        Dataset::Classification => {
            let result = taxonomy::import_classification(&mut store, &report.rows)?;
            println!(
                "{} rows applied, {} skipped, {} rules",
                result.rows_applied, result.rows_skipped, result.rules_upserted
            );
        }
        Dataset::AliasesKeyDesc => {
            let applied = taxonomy::import_alias_mappings(&mut store, &report.rows)?;
            println!("{applied} alias mappings applied");
        }
        Dataset::AliasesAssets => {
            let applied = taxonomy::import_alias_assets(&mut store, &report.rows)?;
            println!("{applied} alias assets applied");
        }
    }
    Ok(())
}

fn print_rejection(report: &ContractReport) {
    if let Some(message) = &report.message {
        println!("{} {message}", "Rejected:".red());
    }
    for code in &report.reason_codes {
        println!("  [{code}]");
    }
    if let Some(diff) = &report.header_diff {
        if !diff.missing.is_empty() {
            println!("  missing columns: {}", diff.missing.join(", "));
        }
        if !diff.unexpected.is_empty() {
            println!("  unexpected columns: {}", diff.unexpected.join(", "));
        }
        if diff.order_mismatch {
            println!("  columns are out of order");
        }
    }
    for sample in &report.row_errors {
        println!("  line {}: {}", sample.row_number, sample.message);
    }
    for fix in &report.fixes {
        println!("  fix: {fix}");
    }
}

fn config_cmd(data_dir: Option<&str>, user_name: Option<&str>, threshold: Option<&str>) -> Result<()> {
    let mut settings = load_settings();
    let mut changed = false;

    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(dir);
        changed = true;
    }
    if let Some(name) = user_name {
        settings.user_name = name.to_string();
        changed = true;
    }
    if let Some(raw) = threshold {
        settings.confidence_threshold = if raw.eq_ignore_ascii_case("off") {
            None
        } else {
            let value: f64 = raw
                .parse()
                .map_err(|_| anyhow!("invalid --threshold '{raw}', expected a number or 'off'"))?;
            if !(0.0..=100.0).contains(&value) {
                bail!("--threshold must be between 0 and 100");
            }
            Some(value)
        };
        changed = true;
    }

    if changed {
        save_settings(&settings)?;
    } else if !settings_file_exists() {
        println!("(no settings file yet; defaults shown)");
    }

    println!("data_dir:  {}", settings.data_dir);
    if !settings.user_name.is_empty() {
        println!("user_name: {}", settings.user_name);
    }
    match settings.confidence_threshold {
        Some(t) => println!("threshold: {t}"),
        None => println!("threshold: off"),
    }
    Ok(())
}

fn completions_cmd(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}
