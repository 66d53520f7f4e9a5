use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{Document, DocumentStore, timestamp_now};

/// Process-local store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        server_timestamps: &[&str],
    ) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        let document = collections
            .entry(collection.to_owned())
            .or_default()
            .entry(id.to_owned())
            .or_default();
        document.extend(fields);
        let now = timestamp_now();
        for field in server_timestamps {
            document.insert((*field).to_owned(), now.clone());
        }
        Ok(())
    }

    async fn append(
        &self,
        collection: &str,
        documents: Vec<Document>,
        timestamp_field: &str,
    ) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_owned()).or_default();
        let now = timestamp_now();
        for mut document in documents {
            document.insert(timestamp_field.to_owned(), now.clone());
            target.insert(uuid::Uuid::new_v4().simple().to_string(), document);
        }
        Ok(())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .values()
                    .filter(|document| document.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
