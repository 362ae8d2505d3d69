//! Offline runner: reconcile local export files through the scoring service and
//! write the export next to the first input.
//!
//! Usage: `reconcile_files [--format csv|excel] [pos=]<file> [alle=]<file> [aspire=]<file>`
//!
//! Files without a `source=` prefix are classified from their header row.

use rust_recon_api::config::Config;
use rust_recon_api::core::export::ExportFormat;
use rust_recon_api::core::ingestion::{sniff_source, UploadedFile};
use rust_recon_api::core::models::SourceSystem;
use rust_recon_api::core::pipeline::ReconciliationService;
use rust_recon_api::core::review::ReviewQueue;
use rust_recon_api::integrations::circuit_breaker::ResilienceGuard;
use rust_recon_api::orchestrator::ScoringOrchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_recon_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut format = ExportFormat::Csv;
    let mut inputs: Vec<(Option<SourceSystem>, PathBuf)> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--format" {
            let raw = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("--format needs a value (csv or excel)"))?;
            format = raw.parse()?;
            continue;
        }
        match arg.split_once('=') {
            Some((source, path)) => {
                let source = source.parse::<SourceSystem>().map_err(|e| anyhow::anyhow!(e))?;
                inputs.push((Some(source), PathBuf::from(path)));
            }
            None => inputs.push((None, PathBuf::from(arg))),
        }
    }

    if inputs.is_empty() {
        anyhow::bail!(
            "Usage: reconcile_files [--format csv|excel] [pos=]<file> [alle=]<file> [aspire=]<file>"
        );
    }

    let mut files = Vec::new();
    for (declared, path) in &inputs {
        let source = match declared {
            Some(source) => *source,
            None => detect(path).await?,
        };
        println!("{} -> {}", path.display(), source);
        files.push(UploadedFile::from_path(path, source).await?);
    }

    let config = Config::from_env()?;
    let guard = Arc::new(ResilienceGuard::new(
        config.circuit_failure_threshold,
        config.circuit_cooldown(),
    ));
    let orchestrator = ScoringOrchestrator::from_config(&config, guard)?;
    let service = ReconciliationService::new(config, orchestrator, Arc::new(ReviewQueue::new()));

    let job_id = service.create_job(files)?;
    let job = service.run_job(job_id).await?;

    for error in &job.errors {
        eprintln!("error: {}", error);
    }
    for warning in &job.warnings {
        eprintln!("warning: {}", warning);
    }
    println!("Job {} finished: {:?}", job.job_id, job.status);
    if let Some(summary) = &job.summary {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }

    let export = service.export(&job_id, format)?;
    let out_dir = inputs
        .first()
        .and_then(|(_, path)| path.parent())
        .unwrap_or_else(|| Path::new("."));
    let out_path = out_dir.join(export.file_name);
    tokio::fs::write(&out_path, &export.bytes).await?;
    println!("Wrote {}", out_path.display());

    Ok(())
}

async fn detect(path: &Path) -> anyhow::Result<SourceSystem> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path.display().to_string();
    sniff_source(&file_name, &bytes)?.ok_or_else(|| {
        anyhow::anyhow!(
            "Could not detect the source of {}; prefix it with pos=, alle= or aspire=",
            file_name
        )
    })
}
