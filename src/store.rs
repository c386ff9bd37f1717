//! Object-store abstraction for the raw-payload archive.
//!
//! Production writes to a mounted bucket directory via `FsObjectStore`;
//! tests use `MemoryStore`. Blob naming and metadata follow the archive
//! conventions the rest of the pipeline (sweeps included) relies on:
//! one folder per ingestion run, checksum and provenance on every blob.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::PipelineConfig;

pub type Metadata = BTreeMap<String, String>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, name: &str, data: &[u8], metadata: &Metadata) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Vec<u8>>;
    /// Names of every object under the given prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn delete(&self, name: &str) -> Result<()>;
}

/// SHA-256 hex digest recorded as blob integrity metadata.
pub fn checksum(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Store rooted at a local directory (e.g. a bucket mount). Metadata goes
/// into a `<name>.meta.json` sidecar.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn sidecar_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.meta.json"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, name: &str, data: &[u8], metadata: &Metadata) -> Result<()> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("writing blob {name}"))?;
        if !metadata.is_empty() {
            let sidecar = serde_json::to_vec_pretty(metadata)?;
            tokio::fs::write(self.sidecar_of(name), sidecar).await?;
        }
        debug!(target: "store", blob = name, bytes = data.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.path_of(name))
            .await
            .with_context(|| format!("reading blob {name}"))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Some(name) = relative_name(&self.root, &path) {
                    if name.starts_with(prefix) && !name.ends_with(".meta.json") {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        tokio::fs::remove_file(self.path_of(name))
            .await
            .with_context(|| format!("deleting blob {name}"))?;
        let _ = tokio::fs::remove_file(self.sidecar_of(name)).await;
        Ok(())
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, Metadata)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata_of(&self, name: &str) -> Option<Metadata> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, meta)| meta.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, name: &str, data: &[u8], metadata: &Metadata) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), (data.to_vec(), metadata.clone()));
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| anyhow::anyhow!("no such blob {name}"))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Archive naming + metadata conventions over any `ObjectStore`.
pub struct Archiver<'a> {
    store: &'a dyn ObjectStore,
    cfg: &'a PipelineConfig,
}

impl<'a> Archiver<'a> {
    pub fn new(store: &'a dyn ObjectStore, cfg: &'a PipelineConfig) -> Self {
        Self { store, cfg }
    }

    /// One folder per ingestion run: `{timestamp}-{dados_id}-{uuid}`.
    pub fn folder(&self, timestamp: &str, dados_id: &str, trace_id: &str) -> String {
        format!("{timestamp}-{dados_id}-{trace_id}")
    }

    pub async fn store_order_detail(
        &self,
        payload: &Value,
        dados_id: &str,
        pedido_numero: &str,
        timestamp: &str,
        trace_id: &str,
    ) -> Result<String> {
        self.store_payload(
            payload,
            &format!("{dados_id}-pdv-{timestamp}-{trace_id}"),
            dados_id,
            pedido_numero,
            timestamp,
            trace_id,
            "pdv.pedido",
            None,
        )
        .await
    }

    pub async fn store_order_search(
        &self,
        payload: &Value,
        dados_id: &str,
        pedido_numero: &str,
        timestamp: &str,
        trace_id: &str,
    ) -> Result<String> {
        self.store_payload(
            payload,
            &format!("{dados_id}-pesquisa-{timestamp}-{trace_id}"),
            dados_id,
            pedido_numero,
            timestamp,
            trace_id,
            "pedidos.pesquisa",
            None,
        )
        .await
    }

    pub async fn store_product(
        &self,
        payload: &Value,
        dados_id: &str,
        pedido_numero: &str,
        produto_id: &str,
        timestamp: &str,
        trace_id: &str,
    ) -> Result<String> {
        self.store_payload(
            payload,
            &format!("{dados_id}-produto-{produto_id}-{timestamp}-{trace_id}"),
            dados_id,
            pedido_numero,
            timestamp,
            trace_id,
            "produto",
            Some(produto_id),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_payload(
        &self,
        payload: &Value,
        stem: &str,
        dados_id: &str,
        pedido_numero: &str,
        timestamp: &str,
        trace_id: &str,
        data_type: &str,
        produto_id: Option<&str>,
    ) -> Result<String> {
        let folder = self.folder(timestamp, dados_id, trace_id);
        let name = format!("{folder}/{}{stem}.json", self.cfg.file_prefix);
        let body = serde_json::to_vec(payload)?;

        let mut metadata = Metadata::new();
        metadata.insert("uuid".to_string(), trace_id.to_string());
        metadata.insert("pedido-id".to_string(), pedido_numero.to_string());
        metadata.insert("data-type".to_string(), data_type.to_string());
        metadata.insert("checksum".to_string(), checksum(&body));
        metadata.insert("source-identifier".to_string(), self.cfg.source_id.clone());
        metadata.insert("version-control".to_string(), self.cfg.version_tag.clone());
        if let Some(produto_id) = produto_id {
            metadata.insert("produto-id".to_string(), produto_id.to_string());
        }

        self.store.put(&name, &body, &metadata).await?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> PipelineConfig {
        PipelineConfig {
            source_id: "test".to_string(),
            version_tag: "v0".to_string(),
            file_prefix: "tiny-api-".to_string(),
            webhook_prefix: "vendas".to_string(),
            webhook_file_prefix: "tiny-webhook-".to_string(),
            pedidos_table: "pedidos".to_string(),
            itens_table: "itens_pedido".to_string(),
            missing_product_policy: crate::reconcile::MissingProductPolicy::Skip,
        }
    }

    #[tokio::test]
    async fn archives_with_naming_and_checksum_metadata() {
        let store = MemoryStore::new();
        let cfg = cfg();
        let archiver = Archiver::new(&store, &cfg);

        let name = archiver
            .store_order_detail(
                &json!({"retorno": {}}),
                "712345",
                "1042",
                "20240305T120000",
                "abc-uuid",
            )
            .await
            .unwrap();
        assert_eq!(
            name,
            "20240305T120000-712345-abc-uuid/tiny-api-712345-pdv-20240305T120000-abc-uuid.json"
        );

        let meta = store.metadata_of(&name).unwrap();
        assert_eq!(meta.get("data-type").unwrap(), "pdv.pedido");
        assert_eq!(meta.get("pedido-id").unwrap(), "1042");
        let body = store.get(&name).await.unwrap();
        assert_eq!(meta.get("checksum").unwrap(), &checksum(&body));
    }

    #[tokio::test]
    async fn product_blob_carries_its_id() {
        let store = MemoryStore::new();
        let cfg = cfg();
        let archiver = Archiver::new(&store, &cfg);
        let name = archiver
            .store_product(
                &json!({}),
                "712345",
                "1042",
                "501",
                "20240305T120000",
                "abc-uuid",
            )
            .await
            .unwrap();
        assert!(name.contains("-produto-501-"));
        assert_eq!(
            store.metadata_of(&name).unwrap().get("produto-id").unwrap(),
            "501"
        );
    }

    #[tokio::test]
    async fn memory_store_round_trip_and_listing() {
        let store = MemoryStore::new();
        store
            .put("vendas/a.json", b"one", &Metadata::new())
            .await
            .unwrap();
        store
            .put("other/b.json", b"two", &Metadata::new())
            .await
            .unwrap();
        assert_eq!(store.get("vendas/a.json").await.unwrap(), b"one");
        assert_eq!(store.list("vendas/").await.unwrap(), vec!["vendas/a.json"]);
        store.delete("vendas/a.json").await.unwrap();
        assert!(store.get("vendas/a.json").await.is_err());
    }

    #[test]
    fn checksum_is_stable_hex() {
        let c = checksum(b"abc");
        assert_eq!(c.len(), 64);
        assert_eq!(
            c,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
