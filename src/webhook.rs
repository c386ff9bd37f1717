//! Webhook ingestion endpoint.
//!
//! The ERP posts an order-created notification here; the handler
//! validates the envelope, archives the raw body under a unique blob
//! name and answers 200. Fetching and transformation happen later,
//! off the request path, when the blob-created event is processed.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::store::{Metadata, ObjectStore};

const UPLOAD_ATTEMPTS: u32 = 3;

/// Shared handler state; the store is injected so tests run in memory.
pub struct WebhookState {
    pub store: Arc<dyn ObjectStore>,
    pub cfg: PipelineConfig,
}

/// What to do with an incoming webhook body.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    /// A new order; archive it keyed by its `dados.id`.
    Accept { dados_id: String },
    /// Well-formed but not an order-created event; acknowledge and drop.
    Ignore(String),
}

/// Validate the webhook envelope: all of `versao`, `cnpj`, `tipo` and
/// `dados` must be present, and only `inclusao_pedido` events are
/// ingested.
pub fn validate_webhook_payload(payload: &Value) -> Result<Disposition, String> {
    for field in ["versao", "cnpj", "tipo", "dados"] {
        if payload.get(field).is_none() {
            return Err(format!("payload missing required field '{field}'"));
        }
    }
    let tipo = payload.get("tipo").and_then(Value::as_str).unwrap_or("");
    if tipo != "inclusao_pedido" {
        return Ok(Disposition::Ignore(format!(
            "payload 'tipo' is '{tipo}', not 'inclusao_pedido'"
        )));
    }
    let dados_id = match payload.pointer("/dados/id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "unknown".to_string(),
    };
    Ok(Disposition::Accept { dados_id })
}

/// Blob name for one webhook delivery:
/// `vendas/{prefix}vendas-{dados_id}-{timestamp}-{uuid}.json`.
pub fn webhook_blob_name(cfg: &PipelineConfig, dados_id: &str, timestamp: &str, id: &str) -> String {
    format!(
        "{}/{}vendas-{dados_id}-{timestamp}-{id}.json",
        cfg.webhook_prefix, cfg.webhook_file_prefix
    )
}

async fn upload_with_retry(store: &dyn ObjectStore, name: &str, data: &[u8]) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match store.put(name, data, &Metadata::new()).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < UPLOAD_ATTEMPTS => {
                warn!(target: "webhook", blob = name, attempt, error = %e, "upload failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(200 * 2u64.pow(attempt)))
                    .await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn handle_vendas(
    state: web::Data<WebhookState>,
    body: web::Bytes,
) -> HttpResponse {
    if body.is_empty() {
        return HttpResponse::BadRequest().body("No payload found");
    }
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "webhook", error = %e, "rejected non-JSON webhook body");
            return HttpResponse::BadRequest().body(format!("Invalid payload: {e}"));
        }
    };

    let dados_id = match validate_webhook_payload(&payload) {
        Ok(Disposition::Accept { dados_id }) => dados_id,
        Ok(Disposition::Ignore(reason)) => {
            info!(target: "webhook", reason = %reason, "ignored payload");
            return HttpResponse::Ok().json(json!({"message": format!("Ignored payload: {reason}")}));
        }
        Err(reason) => {
            warn!(target: "webhook", reason = %reason, "invalid payload");
            return HttpResponse::BadRequest().body(format!("Invalid payload: {reason}"));
        }
    };

    let timestamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
    let trace_id = Uuid::new_v4().to_string();
    let name = webhook_blob_name(&state.cfg, &dados_id, &timestamp, &trace_id);

    match upload_with_retry(state.store.as_ref(), &name, &body).await {
        Ok(()) => {
            info!(target: "webhook", blob = %name, dados_id = %dados_id, "webhook payload stored");
            HttpResponse::Ok().json(json!({
                "message": format!("Payload stored in {name}"),
                "filename": name
            }))
        }
        Err(e) => {
            error!(target: "webhook", blob = %name, error = %e, "failed to store webhook payload");
            HttpResponse::InternalServerError()
                .body(format!("Failed to store {name} after retries"))
        }
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"status": "healthy"}))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/webhook/vendas", web::post().to(handle_vendas));
}
