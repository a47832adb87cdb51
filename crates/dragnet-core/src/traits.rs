use std::future::Future;
use std::time::Duration;

use crate::config::RunRequest;
use crate::error::AppError;
use crate::extractor::ExtractionResponse;

/// Invokes a named source extractor for one URL.
///
/// Implementations must honour `timeout` and should report extractor-side
/// failures as `Ok(ExtractionResponse { success: false, .. })`; `Err` is for
/// calls that never got an answer (connection refused, timeout, bad payload).
pub trait ExtractorInvoker: Send + Sync + Clone {
    fn invoke(
        &self,
        extractor: &str,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<ExtractionResponse, AppError>> + Send;
}

/// Issues a new, independent run request carrying `request`.
///
/// The scheduler never awaits the resulting run; it only learns whether the
/// request could be sent.
pub trait ContinuationTrigger: Send + Sync + Clone + 'static {
    fn trigger(&self, request: RunRequest) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Whether this trigger can issue anything at all.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A no-op trigger for runs that must never chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContinuation;

impl ContinuationTrigger for NoContinuation {
    async fn trigger(&self, _request: RunRequest) -> Result<(), AppError> {
        Err(AppError::ContinuationError(
            "continuation is disabled for this deployment".to_string(),
        ))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// An unconfigured trigger behaves like [`NoContinuation`].
impl<T: ContinuationTrigger> ContinuationTrigger for Option<T> {
    async fn trigger(&self, request: RunRequest) -> Result<(), AppError> {
        match self {
            Some(trigger) => trigger.trigger(request).await,
            None => NoContinuation.trigger(request).await,
        }
    }

    fn is_enabled(&self) -> bool {
        self.as_ref().is_some_and(|trigger| trigger.is_enabled())
    }
}
