use serde::{Deserialize, Serialize};

/// Body sent to a source extractor function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub url: String,
}

/// What an extractor function answers.
///
/// Extractors never surface failures as transport errors when they can help
/// it: a failure is `success: false` plus an `error` message. `status_code` is
/// filled by the invoker when the answer came with a non-2xx HTTP status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub success: bool,
    #[serde(default, alias = "result_id", alias = "vehicleId", alias = "vehicle_id")]
    pub result_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ExtractionResponse {
    pub fn succeeded(result_id: impl Into<String>) -> Self {
        Self {
            success: true,
            result_id: Some(result_id.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}
