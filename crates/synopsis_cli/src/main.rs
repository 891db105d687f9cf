//! Command-line entry point.
//!
//! # Responsibility
//! - Import interchange files into a database as one batch.
//! - List unresolved duplicate clusters.
//! - Print core linkage and version for quick sanity checks.

use clap::{Parser, Subcommand};
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use synopsis_core::model::batch::BatchDescriptor;
use synopsis_core::model::cluster::ClusterStatus;
use synopsis_core::{
    init_from_config, load_config, open_db, Actor, CancellationToken, ClusterService, CoreConfig,
    CoreError, ImportService, OperationControl, WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "synopsis", version, about = "Evidence synopsis pipeline")]
struct Cli {
    /// TOML configuration; built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a tagged interchange file as one batch.
    Import {
        file: PathBuf,
        #[arg(long)]
        db: PathBuf,
        /// Batch label; defaults to the file name.
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value = "cli")]
        actor: String,
        /// Pretty-print the per-record report.
        #[arg(long)]
        pretty: bool,
    },
    /// List unresolved duplicate clusters.
    Clusters {
        #[arg(long)]
        db: PathBuf,
    },
    /// Print core linkage and version.
    Ping,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error [{}]: {err}", err.reason_code());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CoreError> {
    let config = match cli.config.as_ref() {
        Some(path) => load_config(path)?,
        None => CoreConfig::default(),
    };
    if let Err(err) = init_from_config(&config.logging) {
        eprintln!("logging disabled: {err}");
    }

    match cli.command {
        Command::Import {
            file,
            db,
            label,
            source,
            actor,
            pretty,
        } => {
            let conn = open_db(&db)?;
            let engine = WorkflowEngine::with_defaults(&config);
            let service = ImportService::new(&config, &engine);
            let control =
                OperationControl::from_budget_ms(CancellationToken::new(), service.timeout_ms());
            let descriptor = BatchDescriptor {
                label: label.unwrap_or_else(|| file_label(&file)),
                source_label: source,
                ..BatchDescriptor::default()
            };
            let reader = BufReader::new(File::open(&file)?);
            let actor = Actor::new(actor, Vec::<String>::new());
            let report = service.import_stream(&conn, descriptor, reader, &actor, &control)?;
            let rendered = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{rendered}");
            info!(
                "event=cli_import module=cli status=ok batch_id={} processed={}",
                report.batch_id(),
                report.batch.processed
            );
            if let Some(interruption) = report.interruption() {
                return Err(interruption);
            }
        }
        Command::Clusters { db } => {
            let conn = open_db(&db)?;
            let engine = WorkflowEngine::with_defaults(&config);
            let clusters = ClusterService::new(&config, &engine).list(&conn, ClusterStatus::Unresolved)?;
            for cluster in &clusters {
                let best = cluster
                    .pairs
                    .iter()
                    .map(|pair| pair.score)
                    .fold(0.0_f64, f64::max);
                println!(
                    "{} members={} certain={} best_score={:.3}",
                    cluster.id,
                    cluster.members.len(),
                    cluster.pairs.iter().any(|pair| pair.certain),
                    best
                );
            }
            println!("{} unresolved cluster(s)", clusters.len());
        }
        Command::Ping => {
            println!("synopsis_core ping={}", synopsis_core::ping());
            println!("synopsis_core version={}", synopsis_core::core_version());
        }
    }
    Ok(())
}

fn file_label(file: &std::path::Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string())
}
