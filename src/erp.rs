//! Tiny ERP REST client: order detail, order search and product lookups
//! with envelope validation and exponential-backoff retry.
//!
//! The token travels as a query parameter and must never reach the logs;
//! requests are logged by endpoint name only.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::util::env::{env_parse, env_req};

/// API-level failures surfaced by the response envelope.
#[derive(Debug, Error)]
pub enum ErpError {
    #[error("invalid query parameter: {0}")]
    InvalidQuery(String),
    #[error("token is not valid: {0}")]
    InvalidToken(String),
    /// Transient API-side error; eligible for retry.
    #[error("retryable API error: {0}")]
    Retryable(String),
}

#[derive(Debug, Clone)]
pub struct ErpConfig {
    pub base_url: String,
    pub token: String,
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Optional pause before every call; backfill uses this to stay under
    /// the API's rate limit.
    pub pacing: Duration,
}

impl ErpConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: env_req("ERP_BASE_URL")?,
            token: env_req("ERP_API_TOKEN")?,
            max_attempts: env_parse("ERP_MAX_ATTEMPTS", 4u32),
            base_delay: Duration::from_millis(env_parse("ERP_RETRY_BASE_MS", 2_000u64)),
            pacing: Duration::from_millis(env_parse("ERP_PACING_MS", 0u64)),
        })
    }
}

/// Fetch surface the ingest path depends on; mocked in tests.
#[async_trait]
pub trait ErpApi: Send + Sync {
    async fn fetch_order_detail(&self, dados_id: &str) -> Result<Value>;
    async fn fetch_product(&self, produto_id: &str) -> Result<Value>;
    async fn fetch_order_search(&self, pedido_numero: &str) -> Result<Value>;
}

pub struct ErpClient {
    http: Client,
    cfg: ErpConfig,
}

impl ErpClient {
    pub fn new(cfg: ErpConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building http client")?;
        Ok(Self { http, cfg })
    }

    async fn call(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.cfg.base_url, endpoint);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if !self.cfg.pacing.is_zero() {
                tokio::time::sleep(self.cfg.pacing).await;
            }
            debug!(target: "erp", endpoint, attempt, "calling ERP API");

            let outcome = self.call_once(&url, params).await;
            match outcome {
                Ok(body) => return Ok(body),
                Err(e) if attempt >= self.cfg.max_attempts => {
                    return Err(e).with_context(|| {
                        format!("ERP call {endpoint} failed after {attempt} attempts")
                    });
                }
                Err(e) if is_retryable(&e) => {
                    let delay = backoff_delay(self.cfg.base_delay, attempt);
                    warn!(
                        target: "erp",
                        endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable ERP failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, url: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut query: Vec<(&str, &str)> = vec![
            ("token", self.cfg.token.as_str()),
            ("formato", "JSON"),
        ];
        query.extend_from_slice(params);

        let response = self.http.get(url).query(&query).send().await?;
        let response = response.error_for_status()?;
        let body: Value = response.json().await?;
        validate_envelope(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl ErpApi for ErpClient {
    async fn fetch_order_detail(&self, dados_id: &str) -> Result<Value> {
        self.call("pdv.pedido.obter.php", &[("id", dados_id)]).await
    }

    async fn fetch_product(&self, produto_id: &str) -> Result<Value> {
        self.call("produto.obter.php", &[("id", produto_id)]).await
    }

    async fn fetch_order_search(&self, pedido_numero: &str) -> Result<Value> {
        self.call("pedidos.pesquisa.php", &[("numero", pedido_numero)])
            .await
    }
}

/// Check the `retorno.status_processamento` discriminator every endpoint
/// shares: "3" is success, "2" a bad query, "1" an error whose
/// `codigo_erro` distinguishes a dead token from a transient failure.
pub fn validate_envelope(body: &Value) -> Result<(), ErpError> {
    let status = body
        .pointer("/retorno/status_processamento")
        .and_then(Value::as_str)
        .unwrap_or("3");
    match status {
        "3" => Ok(()),
        "2" => Err(ErpError::InvalidQuery(first_error(body))),
        "1" => {
            let codigo = body
                .pointer("/retorno/codigo_erro")
                .and_then(Value::as_str)
                .unwrap_or("");
            if codigo == "1" {
                Err(ErpError::InvalidToken(first_error(body)))
            } else {
                Err(ErpError::Retryable(first_error(body)))
            }
        }
        other => Err(ErpError::Retryable(format!(
            "unknown status_processamento {other}"
        ))),
    }
}

fn first_error(body: &Value) -> String {
    body.pointer("/retorno/erros/0/erro")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(erp) = err.downcast_ref::<ErpError>() {
        return matches!(erp, ErpError::Retryable(_));
    }
    // Network-level failures (timeouts, connection resets, 5xx) retry too.
    err.downcast_ref::<reqwest::Error>().is_some()
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(6));
    let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis().max(1) as u64 / 4);
    exp + Duration::from_millis(jitter_ms)
}
