use std::time::Duration;

use dragnet_core::error::AppError;
use dragnet_core::extractor::{ExtractionRequest, ExtractionResponse};
use dragnet_core::traits::ExtractorInvoker;
use reqwest::Client;

const USER_AGENT: &str = concat!("Dragnet/", env!("CARGO_PKG_VERSION"), " (queue processor)");
/// Longest error body kept when an extractor answers non-2xx without JSON.
const MAX_ERROR_BODY: usize = 300;

/// Invokes extractor functions over HTTP.
///
/// Each extractor is a serverless function reachable at
/// `{base_url}/functions/v1/{extractor}` that takes `{"url": ...}` and answers
/// `{"success": bool, "resultId"?: string, "error"?: string}`.
#[derive(Clone)]
pub struct HttpExtractorInvoker {
    client: Client,
    base_url: String,
    service_key: String,
}

impl HttpExtractorInvoker {
    pub fn new(base_url: &str, service_key: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn endpoint(&self, extractor: &str) -> String {
        format!("{}/functions/v1/{}", self.base_url, extractor)
    }
}

impl ExtractorInvoker for HttpExtractorInvoker {
    async fn invoke(
        &self,
        extractor: &str,
        url: &str,
        timeout: Duration,
    ) -> Result<ExtractionResponse, AppError> {
        let response = self
            .client
            .post(self.endpoint(extractor))
            .bearer_auth(&self.service_key)
            .timeout(timeout)
            .json(&ExtractionRequest {
                url: url.to_string(),
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(timeout.as_secs())
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(timeout.as_secs())
            } else {
                AppError::HttpError(format!("Failed to read extractor response: {e}"))
            }
        })?;

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let status_code = status.as_u16();
        tracing::debug!(%extractor, %url, status_code, "Extractor answered non-2xx");

        // Extractors usually still send their JSON envelope on errors.
        let response = match serde_json::from_str::<ExtractionResponse>(&body) {
            Ok(parsed) if !parsed.success => parsed,
            _ => ExtractionResponse::failed(truncate(body.trim(), MAX_ERROR_BODY)),
        };
        Ok(response.with_status(status_code))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.is_empty() {
        return "empty response body".to_string();
    }
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
