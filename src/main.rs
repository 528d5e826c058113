// src/main.rs

use clap::{Parser, Subcommand};
use po_invoicer::catalog::Tables;
use po_invoicer::config::Config;
use po_invoicer::dialect::{Dialect, SourceDocument, documents_from_archive};
use po_invoicer::pdf_extract::{PdfContent, extract_text_from_pdf};
use po_invoicer::{BatchRequest, run_batch};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Turns client purchase orders into numbered branch invoices.")]
struct Cli {
    #[arg(short, long, global = true, default_value = "config/po_invoicer.toml", help = "Runtime configuration file.")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one batch of purchase orders for a client.
    Run {
        #[arg(short, long, help = "Client dialect, e.g. breadfast-alexandria, talabat, halan.")]
        dialect: Dialect,
        #[arg(long, help = "Delivery date, YYYY-MM-DD.")]
        date: String,
        #[arg(long, help = "PO reference for clients whose documents carry none.")]
        po: Option<String>,
        #[arg(long, help = "Starting invoice number; defaults to the counter file.")]
        seed: Option<u64>,
        #[arg(required = true, help = "PDF, text, .xlsx or .zip inputs.")]
        inputs: Vec<PathBuf>,
    },
    /// Print the text extracted from one PDF.
    Inspect { pdf: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            dialect,
            date,
            po,
            seed,
            inputs,
        } => run(&cli.config, dialect, date, po, seed, &inputs),
        Command::Inspect { pdf } => inspect(&pdf),
    }
}

fn run(
    config_path: &Path,
    dialect: Dialect,
    date: String,
    po: Option<String>,
    seed: Option<u64>,
    inputs: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = if config_path.exists() {
        Config::load(config_path)?
    } else {
        warn!(path = %config_path.display(), "Config file not found, using defaults");
        Config::default()
    };

    let tables = if Path::new(&cfg.tables_path).exists() {
        Tables::load(&cfg.tables_path)?
    } else {
        warn!(path = %cfg.tables_path, "Tables file not found, using built-in catalogs only");
        Tables::default()
    };

    let seed = match seed {
        Some(seed) => seed,
        None => Config::load_next_invoice_number(&cfg.counter_path)?,
    };

    let mut documents = Vec::new();
    for input in inputs {
        let bytes = fs::read(input)?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        if name.to_lowercase().ends_with(".zip") {
            documents.extend(documents_from_archive(&bytes)?);
            continue;
        }
        match SourceDocument::from_file(name, bytes) {
            Some(doc) => documents.push(doc),
            None => warn!(path = %input.display(), "Unsupported input skipped"),
        }
    }

    let request = BatchRequest {
        dialect,
        delivery_date: date,
        seed,
        po_reference: po,
        documents,
    };
    let outcome = run_batch(&request, &tables, &cfg.issuer)?;

    for failure in &outcome.failures {
        error!(document = %failure.document, reason = %failure.reason, "FAILED");
    }

    let out_dir = Path::new(&cfg.output_dir);
    fs::create_dir_all(out_dir)?;
    let stem = format!("{}_{}", outcome.dialect, outcome.delivery_date);
    let archive_path = out_dir.join(format!("{stem}.zip"));
    fs::write(&archive_path, &outcome.archive)?;
    fs::write(
        out_dir.join(format!("{stem}.json")),
        serde_json::to_string_pretty(&outcome)?,
    )?;

    // Persist only after the archive is on disk.
    Config::store_next_invoice_number(&cfg.counter_path, outcome.next_invoice_number)?;

    info!(
        archive = %archive_path.display(),
        invoices = outcome.drafts.len(),
        failures = outcome.failures.len(),
        numbers_consumed = outcome.numbers_consumed,
        next_invoice_number = outcome.next_invoice_number,
        "DONE"
    );
    Ok(())
}

fn inspect(pdf: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(pdf)?;
    match extract_text_from_pdf(&bytes) {
        PdfContent::Text(text) => println!("{text}"),
        PdfContent::ScannedImage => warn!(path = %pdf.display(), "Scanned PDF, no text layer"),
        PdfContent::Error(e) => return Err(e.into()),
    }
    Ok(())
}
