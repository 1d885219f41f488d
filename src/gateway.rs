//! Bounded, cancellable calls to external gateways
//!
//! Every embedding and generation call goes through [`bounded`] so that no
//! pipeline step waits on a remote model indefinitely.

use crate::error::{RagError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run `call` until it finishes, `limit` elapses, or `cancel` fires
pub async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled(operation));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(operation, "gateway call cancelled");
            Err(RagError::Cancelled(operation))
        }
        outcome = tokio::time::timeout(limit, call) => match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, ?limit, "gateway call timed out");
                Err(RagError::Timeout { operation, limit })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_through_result() {
        let cancel = CancellationToken::new();
        let value = bounded("embedding", Duration::from_secs(1), &cancel, async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let cancel = CancellationToken::new();
        let result: Result<()> = bounded("generation", Duration::from_millis(50), &cancel, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(RagError::Timeout {
                operation: "generation",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = bounded("embedding", Duration::from_secs(1), &cancel, async { Ok(1) }).await;
        assert!(matches!(result, Err(RagError::Cancelled("embedding"))));
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result: Result<()> = bounded("embedding", Duration::from_secs(30), &cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RagError::Cancelled(_))));
    }
}
