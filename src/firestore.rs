//! Live access to the user collection through the Firestore REST API.
//!
//! Only the read path is implemented: list every document of one collection,
//! page by page. The OAuth access token is taken as given; issuing and
//! refreshing it happens outside this crate.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::config::ExplorerConfig;
use crate::error::{ExplorerError, Result};
use crate::record::{FieldValue, Record};
use crate::source::DocumentCollection;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<RemoteDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// One Firestore collection reachable with a bearer token.
pub struct FirestoreCollection {
    agent: ureq::Agent,
    documents_url: String,
    collection: String,
    key_field: Option<String>,
    page_size: u32,
    access_token: String,
}

impl FirestoreCollection {
    /// Build a handle using the token found in `config.access_token_env`.
    pub fn from_config(config: &ExplorerConfig) -> Result<Self> {
        config.require_remote()?;
        let token = std::env::var(&config.access_token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ExplorerError::Connection {
                collection: config.collection.clone(),
                reason: format!(
                    "no access token in environment variable {}",
                    config.access_token_env
                ),
            })?;
        Ok(Self::with_token(config, token))
    }

    pub fn with_token(config: &ExplorerConfig, access_token: String) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();
        let documents_url = format!(
            "{}/projects/{}/databases/{}/documents/{}",
            config.endpoint.trim_end_matches('/'),
            config.project_id,
            config.database,
            config.collection
        );
        FirestoreCollection {
            agent,
            documents_url,
            collection: config.collection.clone(),
            key_field: config.key_field.clone(),
            page_size: config.page_size,
            access_token,
        }
    }

    fn connection_error(&self, reason: String) -> ExplorerError {
        ExplorerError::Connection {
            collection: self.collection.clone(),
            reason,
        }
    }

    fn fetch_page(&self, page_token: Option<&str>) -> Result<ListDocumentsResponse> {
        let mut request = self
            .agent
            .get(&self.documents_url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .query("pageSize", self.page_size.to_string());
        if let Some(token) = page_token {
            request = request.query("pageToken", token);
        }

        let response = request
            .call()
            .map_err(|err| self.connection_error(format!("list request failed: {err}")))?;
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|err| self.connection_error(format!("failed reading response body: {err}")))?;

        parse_list_response(&body).map_err(|reason| self.connection_error(reason))
    }
}

impl DocumentCollection for FirestoreCollection {
    fn name(&self) -> &str {
        &self.collection
    }

    fn list_documents(&self) -> Result<Vec<Record>> {
        info!("listing documents from {}", self.documents_url);
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.fetch_page(page_token.as_deref())?;
            debug!("received page of {} documents", page.documents.len());
            for document in page.documents {
                let record = decode_document(document, self.key_field.as_deref())
                    .map_err(|reason| self.connection_error(reason))?;
                records.push(record);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(collapse_duplicate_keys(records))
    }
}

/// Keep one record per key. A later document replaces an earlier one with the
/// same key in place.
fn collapse_duplicate_keys(records: Vec<Record>) -> Vec<Record> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Record> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record.key) {
            Some(&index) => {
                warn!(
                    "duplicate record key '{}', keeping the later document",
                    record.key
                );
                unique[index] = record;
            }
            None => {
                positions.insert(record.key.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

fn parse_list_response(body: &str) -> std::result::Result<ListDocumentsResponse, String> {
    serde_json::from_str(body).map_err(|err| format!("malformed list response: {err}"))
}

/// Turn a REST document into a record, keeping field order.
///
/// The key is the value of `key_field` when the document has it as text or
/// integer, otherwise the last segment of the document name.
fn decode_document(
    document: RemoteDocument,
    key_field: Option<&str>,
) -> std::result::Result<Record, String> {
    let document_id = document
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let mut record = Record::new(document_id);
    for (name, value) in &document.fields {
        let decoded = decode_value(value)
            .map_err(|err| format!("document {}: field '{name}': {err}", document.name))?;
        record.fields.push((name.clone(), decoded));
    }

    let keyed_by_field = key_field.and_then(|field| match record.get(field) {
        Some(FieldValue::Text(key)) if !key.is_empty() => Some(key.clone()),
        Some(FieldValue::Integer(key)) => Some(key.to_string()),
        _ => None,
    });
    if let Some(key) = keyed_by_field {
        record.key = key;
    }
    Ok(record)
}

/// Decode one Firestore typed value (`{"stringValue": "..."}` and friends).
fn decode_value(value: &Value) -> std::result::Result<FieldValue, String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("expected a typed value object, got {value}"))?;
    let (kind, inner) = match object.iter().next() {
        Some(entry) if object.len() == 1 => entry,
        _ => return Err(format!("expected exactly one value type, got {value}")),
    };

    match kind.as_str() {
        "nullValue" => Ok(FieldValue::Null),
        "booleanValue" => inner
            .as_bool()
            .map(FieldValue::Bool)
            .ok_or_else(|| format!("bad booleanValue {inner}")),
        "integerValue" => {
            let parsed = match inner {
                Value::String(text) => text.parse::<i64>().ok(),
                Value::Number(number) => number.as_i64(),
                _ => None,
            };
            parsed
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("bad integerValue {inner}"))
        }
        "doubleValue" => {
            let parsed = match inner {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => match text.as_str() {
                    "NaN" => Some(f64::NAN),
                    "Infinity" => Some(f64::INFINITY),
                    "-Infinity" => Some(f64::NEG_INFINITY),
                    _ => None,
                },
                _ => None,
            };
            parsed
                .map(FieldValue::Float)
                .ok_or_else(|| format!("bad doubleValue {inner}"))
        }
        "timestampValue" => {
            let text = inner
                .as_str()
                .ok_or_else(|| format!("bad timestampValue {inner}"))?;
            DateTime::parse_from_rfc3339(text)
                .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|err| format!("bad timestampValue {text}: {err}"))
        }
        "stringValue" | "bytesValue" | "referenceValue" => inner
            .as_str()
            .map(FieldValue::from)
            .ok_or_else(|| format!("bad {kind} {inner}")),
        "geoPointValue" => {
            let mut point = BTreeMap::new();
            for axis in ["latitude", "longitude"] {
                let coordinate = inner.get(axis).and_then(Value::as_f64).unwrap_or(0.0);
                point.insert(axis.to_string(), FieldValue::Float(coordinate));
            }
            Ok(FieldValue::Map(point))
        }
        "arrayValue" => {
            let items = match inner.get("values") {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(decode_value)
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => Vec::new(),
                Some(other) => return Err(format!("bad arrayValue values {other}")),
            };
            Ok(FieldValue::List(items))
        }
        "mapValue" => {
            let mut entries = BTreeMap::new();
            match inner.get("fields") {
                Some(Value::Object(fields)) => {
                    for (name, nested) in fields {
                        entries.insert(name.clone(), decode_value(nested)?);
                    }
                }
                None => {}
                Some(other) => return Err(format!("bad mapValue fields {other}")),
            }
            Ok(FieldValue::Map(entries))
        }
        other => Err(format!("unsupported value type '{other}'")),
    }
}
