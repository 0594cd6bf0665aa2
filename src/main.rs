use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use booksync::config;
use booksync::db;
use booksync::loader;
use booksync::model::Verdict;
use booksync::reconcile;
use booksync::source::HttpDocumentSource;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sync the document store into the relational sink and verify the result"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Rebuild the flattened staging tables from a full extract instead of
    /// running an incremental cycle
    #[arg(long)]
    full: bool,

    /// Skip the post-load reconciliation pass
    #[arg(long)]
    skip_reconcile: bool,
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
    cfg.ensure_dirs()?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.sink.database_url.clone());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let source = HttpDocumentSource::from_config(&cfg.source)?;

    if args.full {
        info!("starting full load");
        loader::run_full_load(&pool, &source, &cfg.entities).await?;
        info!("full load complete");
    } else {
        // Incremental sync applies to keyed entities; the rest are
        // reconcile-only.
        for entity in cfg.entities.iter().filter(|e| e.natural_key.is_some()) {
            let summary = loader::run_incremental(&pool, &source, entity).await?;
            if summary.failed() > 0 {
                warn!(
                    entity = %entity.name,
                    failed = summary.failed(),
                    "some records failed to sync; see per-record logs"
                );
            }
        }
    }

    if !args.skip_reconcile {
        info!("starting reconciliation");
        let report = reconcile::reconcile_entities(&pool, &source, &cfg.entities).await;
        for item in &report {
            info!(
                entity = %item.entity,
                source_count = item.source_count,
                sink_count = item.sink_count,
                verdict = item.verdict.as_str(),
                "reconciliation result"
            );
        }
        let mismatched = report
            .iter()
            .filter(|r| r.verdict == Verdict::Mismatched)
            .count();
        if mismatched > 0 {
            warn!(mismatched, "reconciliation found count mismatches");
        }
    }

    Ok(())
}
