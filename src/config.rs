//! Pipeline configuration assembled from the environment.
//!
//! Every knob the original deployment exposed as a function env var lives
//! here, resolved once at startup and passed into the collaborators that
//! need it (no module-level singletons).

use crate::reconcile::MissingProductPolicy;
use crate::util::env::{env_opt, env_parse, env_req};

/// Static identity and naming conventions shared by the whole pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tag stamped into every fact row and archive blob (`source_id`).
    pub source_id: String,
    /// Deploy/version marker recorded in archive metadata.
    pub version_tag: String,
    /// Prefix prepended to every archived API payload file.
    pub file_prefix: String,
    /// Folder prefix for raw webhook bodies ("vendas/").
    pub webhook_prefix: String,
    /// Prefix prepended to archived webhook body files.
    pub webhook_file_prefix: String,
    /// Warehouse table receiving order facts.
    pub pedidos_table: String,
    /// Warehouse table receiving line-item facts.
    pub itens_table: String,
    /// What to do when a line item's product lookup fails.
    pub missing_product_policy: MissingProductPolicy,
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let missing_product_policy = match env_opt("MISSING_PRODUCT_POLICY")
            .unwrap_or_else(|| "skip".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "fail" | "strict" => MissingProductPolicy::Fail,
            _ => MissingProductPolicy::Skip,
        };

        Ok(Self {
            source_id: env_req("SOURCE_ID")?,
            version_tag: env_parse("VERSION_TAG", "dev".to_string()),
            file_prefix: env_parse("FILE_PREFIX", "tiny-api-".to_string()),
            webhook_prefix: env_parse("WEBHOOK_PREFIX", "vendas".to_string()),
            webhook_file_prefix: env_parse("WEBHOOK_FILE_PREFIX", "tiny-webhook-".to_string()),
            pedidos_table: env_parse("PEDIDOS_TABLE", "pedidos".to_string()),
            itens_table: env_parse("ITENS_PEDIDO_TABLE", "itens_pedido".to_string()),
            missing_product_policy,
        })
    }
}
