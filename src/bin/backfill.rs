//! Backfill: re-ingest a list of order ids through the same fetch +
//! archive + enqueue path the webhook events use, with pacing to stay
//! under the ERP's rate limit.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use uuid::Uuid;

use tiny_sales_pipeline::config::PipelineConfig;
use tiny_sales_pipeline::erp::{ErpClient, ErpConfig};
use tiny_sales_pipeline::ingest::{ingest_order, RunDetails};
use tiny_sales_pipeline::queue::PgQueue;
use tiny_sales_pipeline::store::FsObjectStore;
use tiny_sales_pipeline::util::env::{env_parse, env_req, init_env, warehouse_db_url};
use tiny_sales_pipeline::warehouse::PgWarehouse;

#[derive(Parser, Debug)]
#[command(about = "Re-ingest orders by ERP id")]
struct Args {
    /// Order ids (dados.id) to backfill.
    #[arg(required = true)]
    ids: Vec<String>,

    /// Pause between orders, in milliseconds.
    #[arg(long, default_value_t = 3_000)]
    pacing_ms: u64,

    /// Stop at the first failed order instead of continuing.
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    tiny_sales_pipeline::tracing::init_tracing("info")?;
    let args = Args::parse();

    let cfg = PipelineConfig::from_env()?;
    let erp = ErpClient::new(ErpConfig::from_env()?)?;
    let store = FsObjectStore::new(env_req("ARCHIVE_ROOT")?);

    let db_url = warehouse_db_url()?;
    let warehouse = PgWarehouse::connect(
        &db_url,
        env_parse("WAREHOUSE_MAX_CONNECTIONS", 5u32),
        &cfg.pedidos_table,
        &cfg.itens_table,
    )
    .await?;
    let queue = PgQueue::new(
        warehouse.pool.clone(),
        &env_parse("QUEUE_TABLE", "reconcile_queue".to_string()),
    )
    .await?;

    let mut failures = 0usize;
    for (idx, dados_id) in args.ids.iter().enumerate() {
        if idx > 0 {
            tokio::time::sleep(Duration::from_millis(args.pacing_ms)).await;
        }
        let run = RunDetails {
            dados_id: dados_id.clone(),
            timestamp: Utc::now().format("%Y%m%dT%H%M%S").to_string(),
            trace_id: Uuid::new_v4().to_string(),
        };
        info!(target: "backfill", dados_id = %dados_id, uuid = %run.trace_id, "backfilling order");
        match ingest_order(&erp, &store, &queue, &cfg, &run).await {
            Ok(_) => {}
            Err(e) if args.fail_fast => {
                return Err(e).with_context(|| format!("backfill of {dados_id} failed"));
            }
            Err(e) => {
                failures += 1;
                error!(target: "backfill", dados_id = %dados_id, error = ?e, "order failed, continuing");
            }
        }
    }

    info!(
        target: "backfill",
        total = args.ids.len(),
        failures,
        "backfill finished"
    );
    Ok(())
}
