//! PostgREST (Supabase-style) client for the shared document row.
//!
//! The document lives in one row of `table`, with the primary key `id` set to
//! `document_key`, the aggregate in a JSON `data` column and an `updated_at`
//! timestamp. Fetch asks for a single object; PostgREST answers a missing row
//! with HTTP 406 and code `PGRST116`, which is reported as `Ok(None)`.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{classify_message, RemoteError, RemoteErrorKind, RemoteResult, RemoteStore};
use crate::model::SharedDocument;

/// PostgREST code for "the result contains 0 rows"
const NO_ROWS_CODE: &str = "PGRST116";

/// Accept header selecting a single-object response
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Connection settings for the remote document
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Anonymous API key
    pub api_key: String,
    /// Table holding the document row
    pub table: String,
    /// Primary key of the document row
    pub document_key: String,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            table: "app_state".to_string(),
            document_key: "global_data".to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_document_key(mut self, key: impl Into<String>) -> Self {
        self.document_key = key.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.url.trim_end_matches('/'), self.table)
    }
}

/// Row shape returned by fetch
#[derive(Debug, Deserialize)]
struct DocumentRow {
    #[serde(default)]
    data: Option<SharedDocument>,
}

/// Row shape sent by upsert
#[derive(Debug, Serialize)]
struct UpsertRow<'a> {
    id: &'a str,
    data: &'a SharedDocument,
    updated_at: String,
}

/// Error body PostgREST returns on failure
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Remote store talking to a PostgREST endpoint
pub struct PostgrestRemoteStore {
    client: Client,
    config: RemoteConfig,
}

impl PostgrestRemoteStore {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
    }
}

#[async_trait]
impl RemoteStore for PostgrestRemoteStore {
    async fn fetch(&self) -> RemoteResult<Option<SharedDocument>> {
        let id_filter = format!("eq.{}", self.config.document_key);
        let response = self
            .request(self.client.get(self.config.endpoint()))
            .query(&[("id", id_filter.as_str()), ("select", "data,updated_at")])
            .header(header::ACCEPT, SINGLE_OBJECT)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let row: DocumentRow = response.json().await.map_err(transport_error)?;
            return Ok(Some(row.data.unwrap_or_default()));
        }

        let body = response.text().await.unwrap_or_default();
        if is_no_rows(status, &body) {
            debug!(key = %self.config.document_key, "Remote document row does not exist yet");
            return Ok(None);
        }
        Err(response_error(status, &body))
    }

    async fn upsert(&self, document: &SharedDocument) -> RemoteResult<()> {
        let row = UpsertRow {
            id: &self.config.document_key,
            data: document,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };

        let response = self
            .request(self.client.post(self.config.endpoint()))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(response_error(status, &body))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.config.endpoint(), self.config.document_key)
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RemoteError::transient(err.to_string())
    } else {
        RemoteError::from_message(err.to_string())
    }
}

fn parse_error_body(body: &str) -> ErrorBody {
    serde_json::from_str(body).unwrap_or_default()
}

fn is_no_rows(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_ACCEPTABLE
        && parse_error_body(body).code.as_deref() == Some(NO_ROWS_CODE)
}

/// Classify a non-success response
fn response_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed = parse_error_body(body);

    let mut message = parsed
        .message
        .clone()
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), body.trim()));
    if let Some(details) = &parsed.details {
        message = format!("{} ({})", message, details);
    }
    if let Some(code) = &parsed.code {
        message = format!("{} [code {}]", message, code);
    }

    let kind = match parsed.code.as_deref() {
        Some("42P01") | Some("PGRST205") => RemoteErrorKind::SchemaMissing,
        Some("42501") => RemoteErrorKind::PermissionDenied,
        _ => match classify_message(&message) {
            RemoteErrorKind::Unknown => kind_for_status(status),
            kind => kind,
        },
    };

    RemoteError::new(kind, message)
}

fn kind_for_status(status: StatusCode) -> RemoteErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::PermissionDenied,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RemoteErrorKind::Transient,
        s if s.is_server_error() => RemoteErrorKind::Transient,
        _ => RemoteErrorKind::Unknown,
    }
}
