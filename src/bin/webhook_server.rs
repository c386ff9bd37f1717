//! Webhook ingestion server: receives ERP order-created notifications
//! and archives the raw bodies for the ingest path to pick up.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing::info;

use tiny_sales_pipeline::config::PipelineConfig;
use tiny_sales_pipeline::store::FsObjectStore;
use tiny_sales_pipeline::util::env::{env_parse, env_req, init_env};
use tiny_sales_pipeline::webhook::{configure_routes, WebhookState};

#[actix_web::main]
async fn main() -> Result<()> {
    init_env();
    tiny_sales_pipeline::tracing::init_tracing("info")?;

    let cfg = PipelineConfig::from_env()?;
    let archive_root = env_req("ARCHIVE_ROOT")?;
    let host = env_parse("WEBHOOK_HOST", "0.0.0.0".to_string());
    let port: u16 = env_parse("WEBHOOK_PORT", 8080u16);

    let store = Arc::new(FsObjectStore::new(archive_root));
    let state = web::Data::new(WebhookState { store, cfg });

    info!(target: "webhook", host = %host, port, "starting webhook server");
    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure_routes))
        .bind((host.as_str(), port))?
        .run()
        .await?;
    Ok(())
}
