use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use booksync::config;
use booksync::db;
use booksync::model::Verdict;
use booksync::reconcile;
use booksync::source::HttpDocumentSource;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Compare source and sink record counts for every configured entity"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.sink.database_url.clone());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let source = HttpDocumentSource::from_config(&cfg.source)?;

    info!("starting reconciliation");
    let report = reconcile::reconcile_entities(&pool, &source, &cfg.entities).await;
    let mut mismatched = 0usize;
    for item in &report {
        info!(
            entity = %item.entity,
            source_count = item.source_count,
            sink_count = item.sink_count,
            verdict = item.verdict.as_str(),
            "reconciliation result"
        );
        if item.verdict == Verdict::Mismatched {
            mismatched += 1;
        }
    }
    if mismatched > 0 {
        warn!(mismatched, "reconciliation found count mismatches");
    }
    info!("reconciliation complete");

    Ok(())
}
