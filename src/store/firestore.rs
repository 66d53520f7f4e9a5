use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{Secrets, StoreSettings};
use crate::store::{Document, DocumentStore};

const PRODUCTION_HOST: &str = "https://firestore.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Clone)]
enum Credentials {
    /// Emulator: any bearer token is accepted.
    Emulator,
    Static(String),
    /// Fetched from the GCE metadata server and cached until shortly before expiry.
    Metadata,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emulator => f.write_str("Emulator"),
            Self::Static(_) => f.write_str("Static(..)"),
            Self::Metadata => f.write_str("Metadata"),
        }
    }
}

/// Firestore over its REST surface (`documents:commit`, `documents:runQuery`).
#[derive(Debug)]
pub struct FirestoreDocumentStore {
    client: reqwest::Client,
    host: String,
    database_path: String,
    credentials: Credentials,
    cached_token: Mutex<Option<(String, Instant)>>,
}

impl FirestoreDocumentStore {
    pub fn from_settings(settings: &StoreSettings, secrets: &Secrets) -> anyhow::Result<Self> {
        let project = settings
            .firestore_project
            .as_deref()
            .filter(|project| !project.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("firestore backend requires store.firestore_project"))?;

        let (host, credentials) = match settings.firestore_emulator_host.as_deref() {
            Some(emulator) => (format!("http://{emulator}"), Credentials::Emulator),
            None => match secrets.firestore_token.clone() {
                Some(token) => (PRODUCTION_HOST.to_owned(), Credentials::Static(token)),
                None => (PRODUCTION_HOST.to_owned(), Credentials::Metadata),
            },
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            host,
            database_path: format!(
                "projects/{project}/databases/{}",
                settings.firestore_database
            ),
            credentials,
            cached_token: Mutex::new(None),
        })
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database_path)
    }

    fn documents_url(&self) -> String {
        format!("{}/v1/{}", self.host, self.documents_root())
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_root())
    }

    async fn bearer_token(&self) -> anyhow::Result<String> {
        match &self.credentials {
            Credentials::Emulator => Ok("owner".to_owned()),
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Metadata => {
                let mut cached = self.cached_token.lock().await;
                if let Some((token, expires_at)) = cached.as_ref()
                    && Instant::now() < *expires_at
                {
                    return Ok(token.clone());
                }
                let (token, ttl) = self.fetch_metadata_token().await?;
                let refresh_after = ttl.saturating_sub(Duration::from_secs(60));
                *cached = Some((token.clone(), Instant::now() + refresh_after));
                Ok(token)
            }
        }
    }

    async fn fetch_metadata_token(&self) -> anyhow::Result<(String, Duration)> {
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("GET metadata token")?;
        let status = response.status();
        let raw = response.text().await.context("read metadata token body")?;
        if !status.is_success() {
            anyhow::bail!("metadata token error ({status}): {raw}");
        }
        let value: Value = serde_json::from_str(&raw).context("parse metadata token")?;
        let token = value
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("metadata token response has no access_token"))?;
        let ttl = value
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(300);
        Ok((token.to_owned(), Duration::from_secs(ttl)))
    }

    async fn post(&self, url: &str, body: &Value) -> anyhow::Result<Value> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .context("read Firestore response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("Firestore error ({status}): {message}");
        }
        serde_json::from_str(&raw).context("parse Firestore response")
    }

    async fn commit(&self, writes: Vec<Value>) -> anyhow::Result<()> {
        let url = format!("{}:commit", self.documents_url());
        self.post(&url, &json!({ "writes": writes })).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let url = format!("{}/{collection}/{id}", self.documents_url());
        let token = self.bearer_token().await?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw = response
            .text()
            .await
            .context("read Firestore response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("Firestore error ({status}): {message}");
        }
        let value: Value = serde_json::from_str(&raw).context("parse Firestore document")?;
        Ok(Some(decode_document(&value)))
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        server_timestamps: &[&str],
    ) -> anyhow::Result<()> {
        let field_paths = fields.keys().map(|key| field_path(key)).collect::<Vec<_>>();
        let write = json!({
            "update": {
                "name": self.document_name(collection, id),
                "fields": encode_fields(&fields),
            },
            "updateMask": { "fieldPaths": field_paths },
            "updateTransforms": request_time_transforms(server_timestamps),
        });
        self.commit(vec![write])
            .await
            .with_context(|| format!("merge {collection}/{id}"))
    }

    async fn append(
        &self,
        collection: &str,
        documents: Vec<Document>,
        timestamp_field: &str,
    ) -> anyhow::Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let writes = documents
            .iter()
            .map(|document| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                json!({
                    "update": {
                        "name": self.document_name(collection, &id),
                        "fields": encode_fields(document),
                    },
                    "currentDocument": { "exists": false },
                    "updateTransforms": request_time_transforms(&[timestamp_field]),
                })
            })
            .collect::<Vec<_>>();
        let count = writes.len();
        self.commit(writes)
            .await
            .with_context(|| format!("append {count} documents to {collection}"))
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> anyhow::Result<Vec<Document>> {
        let url = format!("{}:runQuery", self.documents_url());
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field_path(field) },
                        "op": "EQUAL",
                        "value": encode_value(value),
                    }
                }
            }
        });
        let response = self
            .post(&url, &body)
            .await
            .with_context(|| format!("query {collection} where {field}"))?;

        let rows = response.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| row.get("document"))
            .map(decode_document)
            .collect())
    }
}

fn request_time_transforms(fields: &[&str]) -> Vec<Value> {
    fields
        .iter()
        .map(|field| {
            json!({
                "fieldPath": field_path(field),
                "setToServerValue": "REQUEST_TIME",
            })
        })
        .collect()
}

/// Quotes a top-level field name unless it is a simple identifier.
fn field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_owned()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn encode_fields(document: &Document) -> Value {
    Value::Object(
        document
            .iter()
            .map(|(key, value)| (key.clone(), encode_value(value)))
            .collect(),
    )
}

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|obj| obj.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.as_bool().map(Value::Bool).unwrap_or(Value::Null),
        "integerValue" => inner
            .as_str()
            .and_then(|raw| raw.parse::<i64>().ok())
            .or_else(|| inner.as_i64())
            .map(Value::from)
            .unwrap_or(Value::Null),
        "doubleValue" => inner.as_f64().map(Value::from).unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(decode_fields(inner.get("fields"))),
        "geoPointValue" => inner.clone(),
        _ => Value::Null,
    }
}

fn decode_fields(fields: Option<&Value>) -> Document {
    fields
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(key, value)| (key.clone(), decode_value(value)))
                .collect()
        })
        .unwrap_or_default()
}

fn decode_document(document: &Value) -> Document {
    decode_fields(document.get("fields"))
}
