use crate::error::{RoiError, RoiResult};

/// Runs CPU-bound `work` on the blocking pool. A panic or cancellation of the
/// blocking task becomes a `Worker` error named after `what`.
pub async fn blocking<T, F>(what: &str, work: F) -> RoiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RoiResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RoiError::worker(format!("{what}: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panics_become_worker_errors() {
        let result: RoiResult<()> = blocking("exploding stage", || panic!("boom")).await;
        match result {
            Err(RoiError::Worker { reason }) => assert!(reason.contains("exploding stage")),
            other => panic!("expected a worker error, got {other:?}"),
        }
        assert_eq!(blocking("fine", || Ok(7)).await.expect("value"), 7);
    }
}
