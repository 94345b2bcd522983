//! Upload client for syncing stored records to a remote AWARE host.
//!
//! Records are posted as JSON to `{host}/v1/{table}`. Only available with
//! the `sync` feature.

use crate::model::MessageData;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upload payload for one table.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPayload<'a> {
    pub table: &'a str,
    pub device_id: &'a str,
    pub data: &'a [MessageData],
}

/// Host acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    /// Number of records the host accepted
    #[serde(default)]
    pub accepted: Option<usize>,
}

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync config error: {0}")]
    Config(String),

    #[error("Sync network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Sync server error ({status}): {message}")]
    Server { status: u16, message: String },
}

/// Async upload client.
pub struct SyncClient {
    host: String,
    client: reqwest::Client,
}

impl SyncClient {
    pub fn new(host: &str) -> Result<Self, SyncError> {
        let host = host.trim_end_matches('/').to_string();
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "Database host must be an http(s) URL, got '{host}'"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { host, client })
    }

    /// Endpoint for `table`.
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/v1/{}", self.host, table)
    }

    /// Upload `records` of `table`.
    pub async fn upload(
        &self,
        table: &str,
        records: &[MessageData],
    ) -> Result<SyncResponse, SyncError> {
        let device_id = records.first().map(|r| r.device_id.as_str()).unwrap_or("");
        let payload = SyncPayload {
            table,
            device_id,
            data: records,
        };

        let response = self
            .client
            .post(self.table_url(table))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SyncError::Server {
                status: status.as_u16(),
                message,
            });
        }

        // Hosts that return an empty body still count as success
        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or(SyncResponse { accepted: None }))
    }
}

/// Blocking wrapper for use from the sensor's handler thread.
pub struct BlockingSyncClient {
    inner: SyncClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingSyncClient {
    pub fn new(host: &str) -> Result<Self, SyncError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: SyncClient::new(host)?,
            runtime,
        })
    }

    pub fn upload(&self, table: &str, records: &[MessageData]) -> Result<SyncResponse, SyncError> {
        self.runtime.block_on(self.inner.upload(table, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url() {
        let client = SyncClient::new("http://localhost:8080/").unwrap();
        assert_eq!(
            client.table_url("messageData"),
            "http://localhost:8080/v1/messageData"
        );
    }

    #[test]
    fn test_rejects_non_http_host() {
        assert!(matches!(
            SyncClient::new("ftp://example"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_payload_shape() {
        let records = vec![MessageData {
            device_id: "device-1".into(),
            ..MessageData::default()
        }];
        let payload = SyncPayload {
            table: "messageData",
            device_id: "device-1",
            data: &records,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["table"], "messageData");
        assert_eq!(value["data"][0]["deviceId"], "device-1");
    }

    #[test]
    fn test_unreachable_host_is_network_error() {
        let client = BlockingSyncClient::new("http://127.0.0.1:9").unwrap();
        let result = client.upload("messageData", &[MessageData::default()]);
        assert!(matches!(result, Err(SyncError::Network(_))));
    }
}
