use crate::config::RetryPolicy;
use crate::error::{ProviderError, ProviderStage, RagError};
use std::future::Future;
use tracing::warn;

/// Runs `operation` until it succeeds, fails fatally, or `policy.max_attempts` is reached.
///
/// Each attempt is bounded by the policy's request timeout; a timed-out attempt counts as a
/// retryable failure. Dropping the returned future abandons the call.
pub async fn with_retry<T, F, Fut>(
    stage: ProviderStage,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RagError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.request_timeout(), operation()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::retryable(format!(
                "request timed out after {}s",
                policy.request_timeout_secs
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    stage = %stage,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                return Err(RagError::Provider {
                    stage,
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}
