//! HTTP client for the intelligence service.

use std::time::Duration;

use uuid::Uuid;

use pricedock_core::protocol::{
    AnalysisStatusResponse, AnalyzeAccepted, AnalyzeFileRequest, HealthResponse,
};

use crate::error::CourierError;

#[derive(Clone)]
pub struct IntelligenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl IntelligenceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CourierError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CourierError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CourierError::Intelligence {
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        })
    }

    /// `POST /analyze/file` → the intelligence-side analysis id.
    pub async fn analyze_file(
        &self,
        request: &AnalyzeFileRequest,
    ) -> Result<Uuid, CourierError> {
        let response = self
            .http
            .post(format!("{}/analyze/file", self.base_url))
            .json(request)
            .send()
            .await?;
        let accepted: AnalyzeAccepted = Self::check(response).await?.json().await?;
        Ok(accepted.analysis_id)
    }

    /// `GET /analyze/status/{id}`.
    pub async fn status(
        &self,
        analysis_id: Uuid,
    ) -> Result<AnalysisStatusResponse, CourierError> {
        let response = self
            .http
            .get(format!("{}/analyze/status/{}", self.base_url, analysis_id))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthResponse, CourierError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        // Health answers 503 with a body when degraded; both are useful.
        if response.status().as_u16() == 503 {
            return Ok(response.json().await?);
        }
        Ok(Self::check(response).await?.json().await?)
    }
}
