//! Request/response exchange with the target STAC catalog.
use crate::client::{HostClient, RetrievalClient};
use crate::config::Endpoint;
use crate::error::PipelineError;
use crate::stac_item::{UPLOAD_LOG_PREFIX, VERIFIED_PREFIX};
use anyhow::Result;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UploadedFeature {
    #[serde(rename = "featureId")]
    pub feature_id: String,
    #[serde(rename = "productIdentifier", default)]
    pub product_identifier: String,
}

/// Insert response. Success and error shapes share the one struct.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UploadResponse {
    pub status: Option<String>,
    pub inserted: Option<u64>,
    #[serde(rename = "inError")]
    pub in_error: Option<u64>,
    #[serde(default)]
    pub features: Vec<UploadedFeature>,
    pub errors: Option<Value>,
    #[serde(rename = "ErrorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<Value>,
}

/// An accepted upload: the first inserted feature and the response text as
/// received.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub feature: UploadedFeature,
    pub response: UploadResponse,
    pub raw: String,
}

impl UploadReceipt {
    /// Writes the raw response to `upload_<productIdentifier>.log` in `dir`.
    pub fn write_log(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(format!(
            "{UPLOAD_LOG_PREFIX}{}.log",
            self.feature.product_identifier
        ));
        fs::write(&path, &self.raw)?;
        Ok(path)
    }

    /// Writes the raw response to `verified_<product name>.json` in `dir`.
    pub fn write_verified(&self, dir: &Path, product_name: &str) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("{VERIFIED_PREFIX}{product_name}.json"));
        fs::write(&path, &self.raw)?;
        Ok(path)
    }
}

fn error_code(code: Option<&Value>) -> String {
    match code {
        Some(Value::String(code)) => code.clone(),
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

/// Interprets an insert response body.
pub fn parse_upload_response(raw: &str) -> Result<UploadReceipt, PipelineError> {
    let response: UploadResponse = serde_json::from_str(raw)
        .map_err(|_| PipelineError::UnexpectedUploadResponse(raw.to_string()))?;

    if let Some(message) = &response.error_message {
        return Err(PipelineError::UploadRejected {
            code: error_code(response.error_code.as_ref()),
            message: message.clone(),
        });
    }
    if response.status.as_deref() != Some("success") {
        return Err(PipelineError::UnexpectedUploadResponse(raw.to_string()));
    }
    let Some(feature) = response.features.first().cloned() else {
        return Err(PipelineError::UnexpectedUploadResponse(raw.to_string()));
    };
    Ok(UploadReceipt {
        feature,
        response,
        raw: raw.to_string(),
    })
}

/// Exit code of a run whose upload could not be read back as uploaded.
pub const EXIT_UNVERIFIED: u8 = 2;

/// Outcome of reading an uploaded item back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// The catalog returned an item with a different (or no) id.
    Mismatch { found: Option<String> },
    /// The item could not be read back at all.
    Unavailable,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }

    /// Process exit code for an otherwise successful run.
    pub fn exit_code(&self) -> u8 {
        if self.is_verified() {
            0
        } else {
            EXIT_UNVERIFIED
        }
    }
}

pub fn items_path(collection: &str) -> String {
    format!("/collections/{collection}/items")
}

pub struct CatalogClient {
    target: HostClient,
}

impl CatalogClient {
    pub fn new(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            target: HostClient::new(endpoint, timeout)?,
        })
    }

    pub fn host(&self) -> &str {
        self.target.host()
    }

    /// Ids of the collections the catalog lists.
    pub async fn collections(&self) -> Result<Vec<String>> {
        let value = self.target.json("/collections").await?;
        let ids = value
            .get("collections")
            .and_then(|c| c.as_array())
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|c| c.get("id")?.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    /// Registers `item` (raw JSON bytes) in `collection`.
    pub async fn upload(
        &self,
        collection: &str,
        item: Vec<u8>,
    ) -> Result<UploadReceipt, PipelineError> {
        let url = self.target.url(&items_path(collection));
        info!(%url, bytes = item.len(), "uploading item");
        let request = self
            .target
            .client()
            .http()
            .post(&url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(item);
        let response = RetrievalClient::authorize(request, self.target.credentials())
            .send()
            .await?;
        let status = response.status();
        let raw = response.text().await?;
        info!(%status, response = %raw, "upload response");

        let receipt = parse_upload_response(&raw)?;
        info!(
            status = receipt.response.status.as_deref().unwrap_or_default(),
            inserted = ?receipt.response.inserted,
            in_error = ?receipt.response.in_error,
            feature_id = %receipt.feature.feature_id,
            product_identifier = %receipt.feature.product_identifier,
            errors = ?receipt.response.errors,
            "upload accepted"
        );
        Ok(receipt)
    }

    /// Reads `feature_id` back from `collection` and compares the item id.
    pub async fn verify(&self, collection: &str, feature_id: &str) -> Verification {
        let path = format!("{}/{feature_id}", items_path(collection));
        let value = match self.target.json(&path).await {
            Ok(value) => value,
            Err(err) => {
                warn!(url = %self.target.url(&path), error = %err, "unable to read uploaded item");
                return Verification::Unavailable;
            }
        };
        let found = value.get("id").and_then(|id| id.as_str());
        if found == Some(feature_id) {
            info!(feature_id, "upload verified");
            Verification::Verified
        } else {
            warn!(feature_id, found = ?found, "uploaded item does not match");
            Verification::Mismatch {
                found: found.map(str::to_string),
            }
        }
    }
}
