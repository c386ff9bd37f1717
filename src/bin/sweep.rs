//! Operator sweeps: clean invalid webhook blobs and diff the archive
//! against the warehouse. Report-only unless `--fix` is passed.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tiny_sales_pipeline::config::PipelineConfig;
use tiny_sales_pipeline::store::FsObjectStore;
use tiny_sales_pipeline::sweep::{diff_archive_warehouse, sweep_webhook_blobs};
use tiny_sales_pipeline::util::env::{env_parse, env_req, init_env, warehouse_db_url};
use tiny_sales_pipeline::warehouse::PgWarehouse;

#[derive(Parser, Debug)]
#[command(about = "Validate the raw archive against the warehouse")]
struct Args {
    /// Delete invalid webhook blobs instead of only reporting them.
    #[arg(long)]
    fix: bool,

    /// Skip the archive-vs-warehouse id diff.
    #[arg(long)]
    no_diff: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    tiny_sales_pipeline::tracing::init_tracing("info")?;
    let args = Args::parse();

    let cfg = PipelineConfig::from_env()?;
    let store = FsObjectStore::new(env_req("ARCHIVE_ROOT")?);

    let prefix = format!("{}/", cfg.webhook_prefix);
    let report = sweep_webhook_blobs(&store, &prefix, !args.fix).await?;
    info!(
        target: "sweep",
        scanned = report.scanned,
        invalid = report.invalid.len(),
        deleted = report.deleted,
        dry_run = !args.fix,
        "webhook sweep complete"
    );

    if !args.no_diff {
        let warehouse = PgWarehouse::connect(
            &warehouse_db_url()?,
            env_parse("WAREHOUSE_MAX_CONNECTIONS", 2u32),
            &cfg.pedidos_table,
            &cfg.itens_table,
        )
        .await?;
        let diff = diff_archive_warehouse(&store, &warehouse).await?;
        info!(
            target: "sweep",
            clean = diff.is_clean(),
            archived_not_loaded = diff.archived_not_loaded.len(),
            loaded_not_archived = diff.loaded_not_archived.len(),
            "archive diff complete"
        );
    }
    Ok(())
}
