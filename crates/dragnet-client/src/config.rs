use dragnet_core::AppError;
use url::Url;

/// Endpoints and credentials for the HTTP collaborators.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Base URL of the extractor functions host, e.g. `https://xyz.example.co`.
    pub functions_url: Option<String>,
    /// Bearer key sent with every outbound call.
    pub service_key: Option<String>,
    /// Endpoint that accepts continuation run requests.
    pub processor_url: Option<String>,
}

impl ClientConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DRAGNET_FUNCTIONS_URL`
    /// - `DRAGNET_SERVICE_KEY`
    /// - `DRAGNET_PROCESSOR_URL`
    ///
    /// All are optional here; [`require_functions`](Self::require_functions)
    /// enforces what a run needs.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let functions_url = non_empty("DRAGNET_FUNCTIONS_URL");
        let processor_url = non_empty("DRAGNET_PROCESSOR_URL");
        for (key, value) in [
            ("DRAGNET_FUNCTIONS_URL", &functions_url),
            ("DRAGNET_PROCESSOR_URL", &processor_url),
        ] {
            if let Some(raw) = value {
                validate_http_url(key, raw)?;
            }
        }

        Ok(Self {
            functions_url,
            service_key: non_empty("DRAGNET_SERVICE_KEY"),
            processor_url,
        })
    }

    /// The functions URL and service key, or a `ConfigError` naming what is missing.
    pub fn require_functions(&self) -> Result<(&str, &str), AppError> {
        let url = self.functions_url.as_deref().ok_or_else(|| {
            AppError::ConfigError("DRAGNET_FUNCTIONS_URL not set. Required to call extractors.".into())
        })?;
        let key = self.service_key.as_deref().ok_or_else(|| {
            AppError::ConfigError("DRAGNET_SERVICE_KEY not set. Required to call extractors.".into())
        })?;
        Ok((url, key))
    }
}

fn validate_http_url(key: &str, raw: &str) -> Result<(), AppError> {
    let parsed = Url::parse(raw)
        .map_err(|e| AppError::ConfigError(format!("Invalid {key} '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': scheme '{scheme}' is not http/https"
        ))),
    }
}
