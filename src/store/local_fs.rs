use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::store::{Document, DocumentStore, timestamp_now};

/// One JSON file per document under `<base>/<collection>/<id>.json`.
#[derive(Debug)]
pub struct LocalFsDocumentStore {
    base_dir: PathBuf,
    // Serializes read-modify-write merges within this process.
    write_lock: Mutex<()>,
}

impl LocalFsDocumentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.base_dir.join(collection)
    }

    fn document_path(&self, collection: &str, id: &str) -> anyhow::Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            anyhow::bail!("invalid document id: {id:?}");
        }
        Ok(self.collection_dir(collection).join(format!("{id}.json")))
    }
}

#[async_trait]
impl DocumentStore for LocalFsDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let path = self.document_path(collection, id)?;
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        server_timestamps: &[&str],
    ) -> anyhow::Result<()> {
        let path = self.document_path(collection, id)?;
        let _guard = self.write_lock.lock().await;

        let mut document: Document = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .unwrap_or_default();
        document.extend(fields);
        let now = timestamp_now();
        for field in server_timestamps {
            document.insert((*field).to_owned(), now.clone());
        }

        write_json_atomic(&path, &document)
            .await
            .with_context(|| format!("write: {}", path.display()))
    }

    async fn append(
        &self,
        collection: &str,
        documents: Vec<Document>,
        timestamp_field: &str,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let now = timestamp_now();
        for mut document in documents {
            document.insert(timestamp_field.to_owned(), now.clone());
            let id = uuid::Uuid::new_v4().simple().to_string();
            let path = self.document_path(collection, &id)?;
            write_json_atomic(&path, &document)
                .await
                .with_context(|| format!("write: {}", path.display()))?;
        }
        Ok(())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<Vec<Document>> {
        let dir = self.collection_dir(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("list: {}", dir.display()));
            }
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("list: {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(document) = read_json::<Document>(&path)
                .await
                .with_context(|| format!("read: {}", path.display()))?
            else {
                continue;
            };
            if document.get(field) == Some(value) {
                matches.push(document);
            }
        }
        Ok(matches)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    // Not named `*.json` so concurrent listings skip it.
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
