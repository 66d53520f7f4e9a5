//! Document persistence: a small keyed-document interface with local file,
//! in-memory, and Firestore backends, plus the review repository on top.

pub mod firestore;
pub mod local_fs;
pub mod memory;
pub mod reviews;

use std::sync::Arc;

use async_trait::async_trait;
use sha2::Digest as _;

use crate::config::{Secrets, StoreBackend, StoreSettings};

/// A JSON object. Timestamps are RFC 3339 strings.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>>;

    /// Upserts `fields` into the document, keeping fields it does not name.
    /// Every field in `server_timestamps` is set to the store's write time.
    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        server_timestamps: &[&str],
    ) -> anyhow::Result<()>;

    /// Writes `documents` as new documents with generated ids in one batch,
    /// stamping `timestamp_field` with the store's write time.
    async fn append(
        &self,
        collection: &str,
        documents: Vec<Document>,
        timestamp_field: &str,
    ) -> anyhow::Result<()>;

    /// All documents whose top-level `field` equals `value`, in no particular order.
    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<Vec<Document>>;
}

/// Stable document id for a free-form key.
pub fn document_id(key: &str) -> String {
    let digest = sha2::Sha256::digest(key.as_bytes());
    hex::encode(&digest[..16])
}

pub fn open(settings: &StoreSettings, secrets: &Secrets) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match settings.backend {
        StoreBackend::Local => Arc::new(local_fs::LocalFsDocumentStore::new(&settings.data_dir)),
        StoreBackend::Memory => Arc::new(memory::MemoryDocumentStore::new()),
        StoreBackend::Firestore => Arc::new(firestore::FirestoreDocumentStore::from_settings(
            settings, secrets,
        )?),
    };
    tracing::debug!(backend = ?settings.backend, "document store opened");
    Ok(store)
}

fn timestamp_now() -> serde_json::Value {
    serde_json::Value::String(
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_hex() {
        let id = document_id("Example Bistro");
        assert_eq!(id.len(), 32);
        assert_eq!(id, document_id("Example Bistro"));
        assert_ne!(id, document_id("example bistro"));
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
