use std::time::Duration;

use dragnet_core::config::RunRequest;
use dragnet_core::error::AppError;
use dragnet_core::traits::ContinuationTrigger;
use reqwest::Client;

const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts continuation run requests to the processor's dispatch endpoint.
///
/// The endpoint is expected to acknowledge with `202 Accepted` and run the
/// request in the background; this trigger only waits for the acknowledgement.
#[derive(Clone)]
pub struct HttpContinuationTrigger {
    client: Client,
    processor_url: String,
    service_key: String,
}

impl HttpContinuationTrigger {
    pub fn new(processor_url: &str, service_key: &str) -> Result<Self, AppError> {
        Self::with_timeout(processor_url, service_key, DEFAULT_TRIGGER_TIMEOUT)
    }

    pub fn with_timeout(
        processor_url: &str,
        service_key: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            processor_url: processor_url.to_string(),
            service_key: service_key.to_string(),
        })
    }
}

impl ContinuationTrigger for HttpContinuationTrigger {
    async fn trigger(&self, request: RunRequest) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.processor_url)
            .bearer_auth(&self.service_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::ContinuationError(format!("Failed to reach processor: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ContinuationError(format!(
                "Processor rejected continuation: HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }
}
