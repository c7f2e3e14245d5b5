//! Sheets v4 REST client
//!
//! Bearer-token access to one spreadsheet. The base URL is configurable so a
//! compatible service (or a test server) can stand in for Google.

use async_trait::async_trait;
use clickpath_common::config::ExportConfig;
use reqwest::{Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Row, SheetClient, SheetError};

const USER_AGENT: &str = concat!("clickpath/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct HttpSheetClient {
    http_client: reqwest::Client,
    base_url: Url,
    spreadsheet_id: String,
    access_token: String,
}

impl HttpSheetClient {
    pub fn new(
        base_url: &str,
        spreadsheet_id: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, SheetError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SheetError::Parse(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SheetError::Parse(format!("invalid base URL '{}'", base_url)));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SheetError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            spreadsheet_id: spreadsheet_id.to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// Client for the spreadsheet named in the export configuration
    pub fn from_config(config: &ExportConfig) -> Result<Self, SheetError> {
        Self::new(
            &config.api_base_url,
            &config.spreadsheet_id,
            config.access_token.as_deref().unwrap_or_default(),
            config.call_timeout(),
        )
    }

    /// `{base}/v4/spreadsheets/{segments...}` with each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url, SheetError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SheetError::Parse(format!("invalid base URL '{}'", self.base_url)))?;
            path.pop_if_empty().push("v4").push("spreadsheets").extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, SheetError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Err(SheetError::RateLimited(error_text));
        }
        Err(SheetError::Api {
            status: status.as_u16(),
            message: error_text,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> SheetError {
    if e.is_timeout() {
        SheetError::Timeout
    } else {
        SheetError::Network(e.to_string())
    }
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetClient for HttpSheetClient {
    async fn sheet_exists(&self, title: &str) -> Result<bool, SheetError> {
        let mut url = self.url(&[self.spreadsheet_id.as_str()])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties.title");

        tracing::debug!(title, "Checking for sheet");

        let meta: SpreadsheetMeta = self
            .send(self.http_client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| SheetError::Parse(e.to_string()))?;

        Ok(meta.sheets.iter().any(|s| s.properties.title == title))
    }

    async fn create_sheet(&self, title: &str) -> Result<(), SheetError> {
        let segment = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = self.url(&[segment.as_str()])?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": title } } }]
        });

        self.send(self.http_client.post(url).json(&body)).await?;
        tracing::info!(title, "Created sheet");
        Ok(())
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetError> {
        let url = self.url(&[self.spreadsheet_id.as_str(), "values", range])?;

        let values: ValueRange = self
            .send(self.http_client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| SheetError::Parse(e.to_string()))?;

        Ok(values
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn append_rows(&self, range: &str, rows: &[Row]) -> Result<(), SheetError> {
        let segment = format!("{}:append", range);
        let mut url = self.url(&[self.spreadsheet_id.as_str(), "values", segment.as_str()])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = json!({ "majorDimension": "ROWS", "values": rows });
        self.send(self.http_client.post(url).json(&body)).await?;

        tracing::debug!(range, rows = rows.len(), "Appended rows");
        Ok(())
    }
}
