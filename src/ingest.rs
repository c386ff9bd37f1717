//! Ingestion orchestration: webhook blob -> ERP fetches -> archive ->
//! queue, and queue message -> reconcile -> warehouse.
//!
//! Collaborators (ERP client, object store, queue, warehouse) are passed
//! in as handles so the whole path runs against in-memory fakes in tests.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::erp::ErpApi;
use crate::queue::{Notifier, ReconcileMessage};
use crate::reconcile::{reconcile_order, IngestContext};
use crate::store::{Archiver, ObjectStore};
use crate::warehouse::Warehouse;

/// Identity of one ingestion run, recovered from the webhook blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDetails {
    pub dados_id: String,
    pub timestamp: String,
    pub trace_id: String,
}

/// Recover run identity from a webhook blob name and its payload.
///
/// Blob names end in `...-{dados_id}-{timestamp}-{uuid}.json` where the
/// uuid contributes five `-`-separated groups; the order id comes from
/// the payload's `dados.id`.
pub fn run_details(blob_name: &str, payload: &Value) -> Option<RunDetails> {
    let dados_id = match payload.pointer("/dados/id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let stem = blob_name.strip_suffix(".json").unwrap_or(blob_name);
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() < 6 {
        return None;
    }
    let timestamp = parts[parts.len() - 6].to_string();
    let trace_id = parts[parts.len() - 5..].join("-");
    Some(RunDetails {
        dados_id,
        timestamp,
        trace_id,
    })
}

fn item_product_ids(pdv: &Value) -> Vec<String> {
    pdv.pointer("/retorno/pedido/itens")
        .and_then(Value::as_array)
        .map(|itens| {
            itens
                .iter()
                .filter_map(|item| match item.get("idProduto") {
                    Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn order_numero(pdv: &Value) -> Result<String> {
    match pdv.pointer("/retorno/pedido/numero") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => anyhow::bail!("order detail has no retorno.pedido.numero"),
    }
}

/// Fetch, archive and enqueue one order.
///
/// Every raw payload is archived before the reconcile message is
/// published, so the queue never references data the archive lacks.
pub async fn ingest_order(
    erp: &dyn ErpApi,
    store: &dyn ObjectStore,
    notifier: &dyn Notifier,
    cfg: &PipelineConfig,
    run: &RunDetails,
) -> Result<ReconcileMessage> {
    let archiver = Archiver::new(store, cfg);

    let pdv = erp
        .fetch_order_detail(&run.dados_id)
        .await
        .context("fetching order detail")?;
    let numero = order_numero(&pdv)?;
    archiver
        .store_order_detail(&pdv, &run.dados_id, &numero, &run.timestamp, &run.trace_id)
        .await?;

    let mut produto_data = Vec::new();
    for produto_id in item_product_ids(&pdv) {
        let produto = erp
            .fetch_product(&produto_id)
            .await
            .with_context(|| format!("fetching product {produto_id}"))?;
        archiver
            .store_product(
                &produto,
                &run.dados_id,
                &numero,
                &produto_id,
                &run.timestamp,
                &run.trace_id,
            )
            .await?;
        produto_data.push(produto);
    }

    let pesquisa = erp
        .fetch_order_search(&numero)
        .await
        .context("fetching order search")?;
    archiver
        .store_order_search(&pesquisa, &run.dados_id, &numero, &run.timestamp, &run.trace_id)
        .await?;

    let message = ReconcileMessage {
        uuid: run.trace_id.clone(),
        timestamp: run.timestamp.clone(),
        pdv_pedido_data: pdv,
        produto_data,
        pedidos_pesquisa_data: pesquisa,
    };
    notifier.publish(&message).await?;
    info!(
        target: "ingest",
        pedido = %numero,
        uuid = %run.trace_id,
        produtos = message.produto_data.len(),
        "order archived and enqueued"
    );
    Ok(message)
}

/// Entry point for storage-object-created events: read the webhook blob,
/// recover the run identity, then ingest. Blobs without a `dados.id` are
/// skipped with a warning (the webhook sweep cleans them up later).
pub async fn process_webhook_blob(
    erp: &dyn ErpApi,
    store: &dyn ObjectStore,
    notifier: &dyn Notifier,
    cfg: &PipelineConfig,
    blob_name: &str,
) -> Result<Option<ReconcileMessage>> {
    let body = store.get(blob_name).await?;
    let payload: Value =
        serde_json::from_slice(&body).with_context(|| format!("decoding blob {blob_name}"))?;
    let Some(run) = run_details(blob_name, &payload) else {
        warn!(target: "ingest", blob = blob_name, "webhook blob missing dados.id, skipping");
        return Ok(None);
    };
    ingest_order(erp, store, notifier, cfg, &run)
        .await
        .map(Some)
}

/// Consume one reconcile message: transform and insert atomically.
pub async fn process_message(
    warehouse: &dyn Warehouse,
    cfg: &PipelineConfig,
    msg: &ReconcileMessage,
) -> Result<()> {
    let ctx = IngestContext {
        trace_id: msg.uuid.clone(),
        ingested_at: msg.timestamp.clone(),
        source_id: cfg.source_id.clone(),
    };
    let reconciled = reconcile_order(
        &ctx,
        &msg.pdv_pedido_data,
        &msg.pedidos_pesquisa_data,
        &msg.produto_data,
        cfg.missing_product_policy,
    )
    .with_context(|| format!("reconciling order run {}", msg.uuid))?;
    warehouse.insert_order(&reconciled).await?;
    Ok(())
}
