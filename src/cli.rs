use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(name = "civic-ingest", version, about = "Incremental importer for scraped legislative records")]
pub struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load, route and link one input batch into the store
    Ingest {
        /// Jurisdiction code, `usa` for Congress or a state abbreviation
        #[arg(long)]
        jurisdiction: String,
        /// Flat folder of scraped *.json records
        #[arg(long)]
        input: PathBuf,
        /// Store root (default: CIVIC_STORE_DIR, then the working directory)
        #[arg(long)]
        store: Option<PathBuf>,
        /// Prompt on stdin for sessions the resolver does not know
        #[arg(long)]
        allow_session_fix: bool,
    },
    /// Attach archived events to bills already in the store
    LinkEvents {
        #[arg(long)]
        jurisdiction: String,
        #[arg(long)]
        store: Option<PathBuf>,
        /// Rebuild the bill index before the first pass
        #[arg(long)]
        force_rebuild: bool,
    },
    /// Clear resolved placeholders and refresh orphan tracking
    Reconcile {
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Show store, ledger and configuration state
    Status {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        jurisdiction: Option<String>,
    },
}

fn render_text(report: &CommandReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for line in &report.details {
        out.push_str(&format!("  {line}\n"));
    }
    for line in &report.issues {
        out.push_str(&format!("  issue: {line}\n"));
    }
    out
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", render_text(report));
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let report = match cli.command {
        Command::Ingest {
            jurisdiction,
            input,
            store,
            allow_session_fix,
        } => commands::ingest::run(&commands::ingest::IngestCommandOptions {
            jurisdiction,
            input,
            store,
            allow_session_fix,
        })?,
        Command::LinkEvents {
            jurisdiction,
            store,
            force_rebuild,
        } => commands::link_events::run(&commands::link_events::LinkEventsOptions {
            jurisdiction,
            store,
            force_rebuild,
        })?,
        Command::Reconcile { store } => {
            commands::reconcile::run(&commands::reconcile::ReconcileOptions { store })?
        }
        Command::Status {
            store,
            jurisdiction,
        } => commands::status::run(&commands::status::StatusOptions {
            store,
            jurisdiction,
        })?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!(
            "{} reported {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
