use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use gallery_sync::backend::{HttpBackend, ReorderService};
use gallery_sync::config;
use gallery_sync::model::SourceFile;
use gallery_sync::ordered_list::sequential_assignments;
use gallery_sync::upload::BatchUploadOrchestrator;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload files concurrently and print the batch result as JSON
    Upload {
        /// Logical target container, e.g. dishes/42
        #[arg(long)]
        container: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Persist the given item ids as order 0..n
    Reorder {
        /// List path, e.g. lists/7
        #[arg(long)]
        list: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print an example configuration
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let backend = Arc::new(HttpBackend::from_config(&cfg.backend)?);

    match args.command {
        Command::Upload { container, files } => {
            let mut sources = Vec::with_capacity(files.len());
            for path in &files {
                let file = SourceFile::from_path(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                sources.push(file);
            }

            let orchestrator = BatchUploadOrchestrator::new(backend)
                .with_max_concurrency(cfg.upload.max_concurrency)
                .with_policy(cfg.upload_policy());
            let result = orchestrator
                .upload_batch(&sources, &container, |done, total| {
                    info!(done, total, "upload progress");
                })
                .await?;

            for failure in &result.failed {
                warn!(file = %files[failure.key].display(), error = %failure.error, "upload failed");
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.all_succeeded() {
                std::process::exit(2);
            }
        }
        Command::Reorder { list, ids } => {
            let assignments = sequential_assignments(ids);
            backend
                .persist_order(&list, assignments.as_slice())
                .await
                .with_context(|| format!("failed to persist order of {}", list))?;
            info!(%list, items = assignments.len(), "order persisted");
        }
        Command::ExampleConfig => {}
    }

    Ok(())
}
