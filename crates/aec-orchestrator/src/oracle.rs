//! Oracle contracts and the HTTP client that speaks them.
//!
//! The orchestrator never reasons about code itself. It sends a
//! [`DiagnosticContext`] to a [`DiagnosticOracle`] and a [`PatchRequest`] to
//! a [`PatchOracle`], and receives typed payloads back. Anything that does
//! not deserialize into the contract is an [`OracleError`].

use std::time::Duration;

use aec_context::DiagnosticContext;
use aec_lifecycle::{DetectedError, DiagnosisPayload, DiagnosticRecord, PatchPayload};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::OracleError;

/// Current on-disk content of a file the diagnosis wants modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentFile {
    pub path: String,
    /// Empty when the file does not exist yet.
    pub content: String,
    pub exists: bool,
}

/// Request body for patch generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub error: DetectedError,
    pub diagnostic: DiagnosticRecord,
    pub files: Vec<CurrentFile>,
}

#[async_trait]
pub trait DiagnosticOracle: Send + Sync {
    async fn diagnose(&self, context: &DiagnosticContext) -> Result<DiagnosisPayload, OracleError>;
}

#[async_trait]
pub trait PatchOracle: Send + Sync {
    async fn generate_patch(&self, request: &PatchRequest) -> Result<PatchPayload, OracleError>;
}

/// Both oracles behind one HTTP endpoint: `POST /diagnose`, `POST /patch`.
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracle {
    /// `base_url` should be like `http://localhost:8700` (no trailing slash).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, OracleError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        info!(url = %url, "calling oracle");
        let resp = self.client.post(&url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OracleError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().await?;
        parse_response(&text)
    }
}

/// Decode a response body; contract violations become `InvalidResponse`.
pub fn parse_response<Resp: DeserializeOwned>(body: &str) -> Result<Resp, OracleError> {
    serde_json::from_str(body).map_err(|e| OracleError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl DiagnosticOracle for HttpOracle {
    async fn diagnose(&self, context: &DiagnosticContext) -> Result<DiagnosisPayload, OracleError> {
        self.post("/diagnose", context).await
    }
}

#[async_trait]
impl PatchOracle for HttpOracle {
    async fn generate_patch(&self, request: &PatchRequest) -> Result<PatchPayload, OracleError> {
        self.post("/patch", request).await
    }
}

/// Stands in for both oracles when no endpoint is configured; every call
/// fails, so pipelines settle back to `detected`.
pub struct UnconfiguredOracle;

#[async_trait]
impl DiagnosticOracle for UnconfiguredOracle {
    async fn diagnose(&self, _context: &DiagnosticContext) -> Result<DiagnosisPayload, OracleError> {
        Err(OracleError::NotConfigured)
    }
}

#[async_trait]
impl PatchOracle for UnconfiguredOracle {
    async fn generate_patch(&self, _request: &PatchRequest) -> Result<PatchPayload, OracleError> {
        Err(OracleError::NotConfigured)
    }
}
