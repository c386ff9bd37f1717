//! Data-validation sweeps over the archive and the warehouse.
//!
//! Two periodic checks the original operators ran by hand: deleting
//! webhook blobs that never should have been stored, and diffing the
//! archived run folders against the warehouse's order ids to spot holes
//! in either direction. Both default to report-only.

use std::collections::BTreeSet;

use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::store::ObjectStore;
use crate::warehouse::Warehouse;
use crate::webhook::{validate_webhook_payload, Disposition};

/// Parse an archive run folder name `{timestamp}-{dados_id}-{uuid}` out
/// of a blob path. Returns the order id when the name conforms.
pub fn archive_folder_order_id(blob_name: &str) -> Option<String> {
    // Compiled per call; sweeps run on a timer, not a hot path.
    let re = Regex::new(r"^(\d+T\d+)-(\d+)-([0-9a-fA-F]{8}(?:-[0-9a-fA-F]{4}){3}-[0-9a-fA-F]{12})/")
        .ok()?;
    re.captures(blob_name).map(|c| c[2].to_string())
}

/// Outcome of the invalid-webhook-blob sweep.
#[derive(Debug, Default)]
pub struct WebhookSweepReport {
    pub scanned: usize,
    pub invalid: Vec<String>,
    pub deleted: usize,
}

/// Scan archived webhook bodies and delete the ones that fail envelope
/// validation (wrong `tipo`, missing fields, unreadable JSON). With
/// `dry_run` the report lists what would go, and nothing is touched.
pub async fn sweep_webhook_blobs(
    store: &dyn ObjectStore,
    prefix: &str,
    dry_run: bool,
) -> Result<WebhookSweepReport> {
    let mut report = WebhookSweepReport::default();
    for name in store.list(prefix).await? {
        report.scanned += 1;
        let valid = match store.get(&name).await {
            Ok(body) => match serde_json::from_slice::<Value>(&body) {
                Ok(payload) => matches!(
                    validate_webhook_payload(&payload),
                    Ok(Disposition::Accept { .. })
                ),
                Err(_) => false,
            },
            Err(e) => {
                warn!(target: "sweep", blob = %name, error = %e, "unreadable blob, skipping");
                continue;
            }
        };
        if valid {
            continue;
        }
        if dry_run {
            info!(target: "sweep", blob = %name, "DRY RUN: would delete");
        } else {
            info!(target: "sweep", blob = %name, "deleting invalid webhook blob");
            store.delete(&name).await?;
            report.deleted += 1;
        }
        report.invalid.push(name);
    }
    Ok(report)
}

/// Id sets that disagree between the raw archive and the warehouse.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ArchiveDiff {
    /// Archived but never landed in the fact tables (lost in transform).
    pub archived_not_loaded: BTreeSet<String>,
    /// In the fact tables with no surviving archive folder.
    pub loaded_not_archived: BTreeSet<String>,
}

impl ArchiveDiff {
    pub fn is_clean(&self) -> bool {
        self.archived_not_loaded.is_empty() && self.loaded_not_archived.is_empty()
    }

    pub fn of(archive_ids: &BTreeSet<String>, warehouse_ids: &BTreeSet<String>) -> Self {
        Self {
            archived_not_loaded: archive_ids.difference(warehouse_ids).cloned().collect(),
            loaded_not_archived: warehouse_ids.difference(archive_ids).cloned().collect(),
        }
    }
}

/// Compare archived run folders against warehouse order ids.
pub async fn diff_archive_warehouse(
    store: &dyn ObjectStore,
    warehouse: &dyn Warehouse,
) -> Result<ArchiveDiff> {
    let mut archive_ids = BTreeSet::new();
    for name in store.list("").await? {
        if let Some(id) = archive_folder_order_id(&name) {
            archive_ids.insert(id);
        }
    }
    let warehouse_ids: BTreeSet<String> =
        warehouse.existing_order_ids().await?.into_iter().collect();

    let diff = ArchiveDiff::of(&archive_ids, &warehouse_ids);
    if diff.is_clean() {
        info!(target: "sweep", archived = archive_ids.len(), "archive and warehouse agree");
    } else {
        warn!(
            target: "sweep",
            archived_not_loaded = ?diff.archived_not_loaded,
            loaded_not_archived = ?diff.loaded_not_archived,
            "archive and warehouse disagree"
        );
    }
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Metadata};
    use crate::warehouse::{MemoryWarehouse, Warehouse};

    const TRACE: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    #[test]
    fn extracts_order_id_from_run_folder() {
        let name = format!("20240305T120000-712345-{TRACE}/tiny-api-712345-pdv.json");
        assert_eq!(archive_folder_order_id(&name).as_deref(), Some("712345"));
        assert_eq!(archive_folder_order_id("vendas/whatever.json"), None);
        assert_eq!(archive_folder_order_id("20240305T120000-712345-short/x"), None);
    }

    #[test]
    fn diff_classifies_both_directions() {
        let archive: BTreeSet<String> =
            ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
        let warehouse: BTreeSet<String> =
            ["2", "3", "4"].iter().map(|s| s.to_string()).collect();
        let diff = ArchiveDiff::of(&archive, &warehouse);
        assert_eq!(
            diff.archived_not_loaded,
            ["1".to_string()].into_iter().collect()
        );
        assert_eq!(
            diff.loaded_not_archived,
            ["4".to_string()].into_iter().collect()
        );
        assert!(!diff.is_clean());
    }

    #[tokio::test]
    async fn webhook_sweep_respects_dry_run() {
        let store = MemoryStore::new();
        let good = serde_json::json!({
            "versao": "1.0", "cnpj": "x", "tipo": "inclusao_pedido", "dados": {"id": 1}
        });
        let bad = serde_json::json!({"tipo": "outro"});
        store
            .put("vendas/good.json", &serde_json::to_vec(&good).unwrap(), &Metadata::new())
            .await
            .unwrap();
        store
            .put("vendas/bad.json", &serde_json::to_vec(&bad).unwrap(), &Metadata::new())
            .await
            .unwrap();

        let report = sweep_webhook_blobs(&store, "vendas/", true).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.invalid, vec!["vendas/bad.json".to_string()]);
        assert_eq!(report.deleted, 0);
        assert_eq!(store.list("vendas/").await.unwrap().len(), 2);

        let report = sweep_webhook_blobs(&store, "vendas/", false).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.list("vendas/").await.unwrap(), vec!["vendas/good.json"]);
    }

    #[tokio::test]
    async fn archive_diff_against_memory_warehouse() {
        let store = MemoryStore::new();
        store
            .put(
                &format!("20240305T120000-712345-{TRACE}/tiny-api-712345-pdv.json"),
                b"{}",
                &Metadata::new(),
            )
            .await
            .unwrap();
        let warehouse = MemoryWarehouse::new();
        assert!(warehouse.existing_order_ids().await.unwrap().is_empty());

        let diff = diff_archive_warehouse(&store, &warehouse).await.unwrap();
        assert_eq!(diff.archived_not_loaded.len(), 1);
        assert!(diff.loaded_not_archived.is_empty());
    }
}
