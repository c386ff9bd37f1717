//! Transform worker: drains the reconcile queue, runs the core and
//! loads fact rows into the warehouse. Run as many instances as needed;
//! the queue claim is contention-safe.

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use tiny_sales_pipeline::config::PipelineConfig;
use tiny_sales_pipeline::ingest::process_message;
use tiny_sales_pipeline::queue::PgQueue;
use tiny_sales_pipeline::util::env::{env_parse, init_env, warehouse_db_url};
use tiny_sales_pipeline::warehouse::PgWarehouse;

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    tiny_sales_pipeline::tracing::init_tracing("info")?;

    let cfg = PipelineConfig::from_env()?;
    let db_url = warehouse_db_url()?;
    let max_connections = env_parse("WAREHOUSE_MAX_CONNECTIONS", 5u32);
    let queue_table = env_parse("QUEUE_TABLE", "reconcile_queue".to_string());
    let idle_sleep = Duration::from_millis(env_parse("WORKER_IDLE_SLEEP_MS", 2_000u64));

    let warehouse = PgWarehouse::connect(
        &db_url,
        max_connections,
        &cfg.pedidos_table,
        &cfg.itens_table,
    )
    .await?;
    let queue = PgQueue::new(warehouse.pool.clone(), &queue_table).await?;

    info!(target: "worker", queue = %queue_table, "transform worker started");
    loop {
        match queue.claim().await? {
            None => tokio::time::sleep(idle_sleep).await,
            Some(job) => {
                match process_message(&warehouse, &cfg, &job.message).await {
                    Ok(()) => queue.complete(job.id).await?,
                    Err(e) => {
                        error!(
                            target: "worker",
                            job = job.id,
                            uuid = %job.message.uuid,
                            error = ?e,
                            "order pass failed, parking job"
                        );
                        queue.fail(job.id, &format!("{e:#}")).await?;
                    }
                }
            }
        }
    }
}
