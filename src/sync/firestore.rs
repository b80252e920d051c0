use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::storage::entities::SiteUsage;

use super::{auth::AuthProvider, document::RemoteUsageDocument, RemoteStore};

const DEFAULT_API_URL: &str = "https://firestore.googleapis.com/v1";
const COLLECTION: &str = "usage";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection settings for the Firestore project the dashboard reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: String,
    pub api_url: String,
}

impl FirestoreConfig {
    pub fn new(project_id: String, api_key: String) -> Self {
        Self {
            project_id,
            api_key,
            api_url: DEFAULT_API_URL.to_owned(),
        }
    }
}

/// [RemoteStore] talking to the Firestore REST API. Requests are made as the signed-in user
/// when the extension handed over an id token.
pub struct FirestoreStore {
    client: Client,
    config: FirestoreConfig,
    auth: Arc<dyn AuthProvider>,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build the HTTP client")?;
        Ok(Self {
            client,
            config,
            auth,
        })
    }

    fn document_url(&self, doc_id: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{COLLECTION}/{doc_id}",
            self.config.api_url, self.config.project_id
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.query(&[("key", &self.config.api_key)]);
        match self.auth.id_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for FirestoreStore {
    async fn get_document(&self, doc_id: &str) -> Result<Option<RemoteUsageDocument>> {
        let response = self
            .authorize(self.client.get(self.document_url(doc_id)))
            .send()
            .await
            .with_context(|| format!("Failed to send request for {doc_id}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response
            .error_for_status()
            .context("Request returned an error status")?
            .json::<Value>()
            .await
            .context("Failed to deserialize response")?;
        decode_document(&body).map(Some)
    }

    async fn merge_document(&self, doc_id: &str, document: &RemoteUsageDocument) -> Result<()> {
        let mask = field_mask(document);
        debug!("Patching {doc_id} with {} fields", mask.len());
        let query = mask
            .iter()
            .map(|path| ("updateMask.fieldPaths", path.as_str()))
            .collect::<Vec<_>>();

        self.authorize(self.client.patch(self.document_url(doc_id)))
            .query(&query)
            .json(&encode_document(document))
            .send()
            .await
            .with_context(|| format!("Failed to send update for {doc_id}"))?
            .error_for_status()
            .context("Update returned an error status")?;
        Ok(())
    }
}

fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

fn integer_value(value: u64) -> Value {
    // Firestore carries 64-bit integers as strings.
    json!({ "integerValue": value.to_string() })
}

/// Encodes a document into Firestore's typed value format.
pub fn encode_document(document: &RemoteUsageDocument) -> Value {
    let sites = document
        .sites
        .iter()
        .map(|(domain, ms)| (domain.clone(), integer_value(*ms)))
        .collect::<Map<_, _>>();

    json!({
        "fields": {
            "date": string_value(&document.date),
            "userId": string_value(&document.user_id),
            "totalTime": integer_value(document.total_time),
            "lastUpdated": string_value(&document.last_updated),
            "sites": { "mapValue": { "fields": sites } },
        }
    })
}

fn quote_segment(segment: &str) -> String {
    let simple = segment
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        segment.to_owned()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Field paths touched by a merge. Every site is listed on its own so that domains other
/// devices wrote and we don't know about stay untouched.
pub fn field_mask(document: &RemoteUsageDocument) -> Vec<String> {
    let mut paths = vec![
        "date".to_owned(),
        "userId".to_owned(),
        "totalTime".to_owned(),
        "lastUpdated".to_owned(),
    ];
    paths.extend(
        document
            .sites
            .keys()
            .map(|domain| format!("sites.{}", quote_segment(domain))),
    );
    paths
}

fn read_integer(value: &Value) -> Option<u64> {
    if let Some(text) = value.get("integerValue").and_then(Value::as_str) {
        return text.parse::<u64>().ok();
    }
    value
        .get("doubleValue")
        .and_then(Value::as_f64)
        .filter(|v| *v >= 0.)
        .map(|v| v.round() as u64)
}

fn read_string(fields: &Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(|v| v.get("stringValue"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Decodes a Firestore document resource. Missing fields take their defaults; malformed
/// site entries are skipped.
pub fn decode_document(body: &Value) -> Result<RemoteUsageDocument> {
    let fields = body
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("Document has no fields"))?;

    let sites = fields
        .get("sites")
        .and_then(|v| v.pointer("/mapValue/fields"))
        .and_then(Value::as_object)
        .map(|sites| {
            sites
                .iter()
                .filter_map(|(domain, value)| read_integer(value).map(|ms| (domain.clone(), ms)))
                .collect::<SiteUsage>()
        })
        .unwrap_or_default();

    Ok(RemoteUsageDocument {
        date: read_string(fields, "date"),
        user_id: read_string(fields, "userId"),
        total_time: fields.get("totalTime").and_then(read_integer).unwrap_or(0),
        last_updated: read_string(fields, "lastUpdated"),
        sites,
    })
}
