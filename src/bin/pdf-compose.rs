//! PDF Compose CLI tool
//!
//! Runs a JSON job that extracts, rotates, redacts and watermarks pages from
//! several documents and concatenates them into one PDF.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use pdf_compose::{run_job_file, EntryOutcome, LopdfEngine};

/// PDF Compose - Assemble one PDF from a JSON job description
#[derive(Parser)]
#[command(name = "pdf-compose")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Run the config.json in (or below) a directory
    pdf-compose handouts/

    # Run a specific job file, overriding its output
    pdf-compose jobs/week1.json -o week1.pdf

    # Show per-page details
    pdf-compose handouts/ -vv")]
struct Cli {
    /// Job file, or a directory containing config.json
    path: PathBuf,

    /// Output PDF file path (overrides the job's \"output\")
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        tracing::error!("{:#}", e);
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise the level follows -v/-q
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let engine = LopdfEngine::new();

    let report = run_job_file(&engine, &cli.path, cli.output.as_deref())
        .with_context(|| format!("Job {} failed", cli.path.display()))?;

    for (index, entry) in report.entries.iter().enumerate() {
        match &entry.outcome {
            EntryOutcome::Processed(r) => eprintln!(
                "  #{} {}: {} page(s), {} redaction(s), {} watermarked",
                index + 1,
                entry.source_path.display(),
                r.pages_appended,
                r.redactions,
                r.watermarked_pages.len()
            ),
            EntryOutcome::Skipped(error) => {
                eprintln!("  #{} {}: skipped ({})", index + 1, entry.source_path.display(), error)
            }
        }
    }

    eprintln!(
        "Wrote {} page(s) to {}{}",
        report.page_count,
        report.output_path.display(),
        if report.encrypted { " (encrypted)" } else { "" }
    );

    Ok(())
}
