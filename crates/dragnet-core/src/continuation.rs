use crate::config::RunConfig;
use crate::traits::ContinuationTrigger;

/// Decides whether a budget-stopped run should hand off to a fresh run.
///
/// The handoff request is sent before the run returns, so a process that
/// exits right after its run still delivers it. The chained run itself is
/// never awaited. A trigger failure is logged and otherwise ignored: a
/// periodic external trigger drains whatever a broken chain leaves behind.
#[derive(Debug, Clone)]
pub struct ContinuationChainer<T: ContinuationTrigger> {
    trigger: T,
    max_chain_depth: u32,
}

impl<T: ContinuationTrigger> ContinuationChainer<T> {
    pub fn new(trigger: T, max_chain_depth: u32) -> Self {
        Self {
            trigger,
            max_chain_depth,
        }
    }

    /// Whether a run with this config and `remaining` eligible items may chain.
    pub fn should_continue(&self, config: &RunConfig, remaining: i64) -> bool {
        config.continuous && remaining > 0 && config.chain_depth < self.max_chain_depth
    }

    /// Send the continuation if allowed. Returns whether the receiver accepted it.
    pub async fn maybe_continue(&self, config: &RunConfig, remaining: i64) -> bool {
        if !self.trigger.is_enabled() {
            if config.continuous && remaining > 0 {
                tracing::info!(remaining, "No continuation trigger configured, not continuing");
            }
            return false;
        }
        if !self.should_continue(config, remaining) {
            if config.continuous && remaining > 0 {
                tracing::warn!(
                    chain_depth = config.chain_depth,
                    max_chain_depth = self.max_chain_depth,
                    remaining,
                    "Chain depth limit reached, not continuing"
                );
            }
            return false;
        }

        let next_depth = config.chain_depth + 1;
        match self.trigger.trigger(config.continuation_request()).await {
            Ok(()) => {
                tracing::info!(chain_depth = next_depth, remaining, "Continuation triggered");
                true
            }
            Err(e) => {
                tracing::warn!(
                    chain_depth = next_depth,
                    error = %e,
                    "Failed to trigger continuation"
                );
                false
            }
        }
    }
}
