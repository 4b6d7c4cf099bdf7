use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{StreamControl, StreamDescription, StreamStatus};
use crate::error::{Result, ShardScaleError};
use crate::topology::ShardTopology;
use crate::types::ShardId;

pub const DESCRIBE_RETRIES: u32 = 10;
pub const MODIFY_RETRIES: u32 = 10;
/// Base unit of the exponential backoff; the provider throttles above
/// roughly ten calls per second.
pub const RETRY_TIMEOUT_MS: u64 = 100;

const SHARD_BUSY_DELAY: Duration = Duration::from_secs(1);
/// Stream mutations take around 30 seconds, so the first status poll waits
/// 20 before falling back to a tight loop.
const FIRST_STATUS_POLL: Duration = Duration::from_secs(20);
const STATUS_POLL: Duration = Duration::from_secs(1);

/// Retrying wrapper around a raw [`StreamControl`] adapter.
///
/// Every call goes through one helper: busy shards get a fixed delay,
/// throttles get exponential backoff, and a bounded number of attempts
/// before the call surfaces as `OperationExhausted`.
pub struct RetryingStreamControl {
    inner: Arc<dyn StreamControl>,
}

impl RetryingStreamControl {
    pub fn new(inner: Arc<dyn StreamControl>) -> Self {
        Self { inner }
    }

    pub fn keyspace_max(&self) -> u128 {
        self.inner.keyspace_max()
    }

    async fn with_retries<T, F, Fut>(&self, name: &str, retries: u32, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(ShardScaleError::ShardBusy(reason)) if attempts < retries => {
                    // the shard is mutating; wait until the modification lands
                    debug!(operation = name, attempts, %reason, "shard busy, retrying");
                    sleep(SHARD_BUSY_DELAY).await;
                }
                Err(ShardScaleError::Throttled(reason)) if attempts < retries => {
                    warn!(operation = name, attempts, %reason, "throttled, backing off");
                    sleep(backoff(attempts)).await;
                }
                Err(
                    err @ (ShardScaleError::ShardBusy(_) | ShardScaleError::Throttled(_)),
                ) => {
                    warn!(operation = name, retries, error = %err, "retries exhausted");
                    return Err(ShardScaleError::OperationExhausted {
                        operation: name.to_string(),
                        retries,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn describe(&self, stream: &str) -> Result<StreamDescription> {
        self.with_retries("describe", DESCRIBE_RETRIES, || self.inner.describe(stream))
            .await
    }

    pub async fn open_shard_count(&self, stream: &str) -> Result<u32> {
        Ok(self.describe(stream).await?.open_shard_count)
    }

    /// List the stream and build the ordered open-shard view.
    pub async fn open_shards(&self, stream: &str) -> Result<ShardTopology> {
        let all = self
            .with_retries("list_shards", DESCRIBE_RETRIES, || {
                self.inner.list_shards(stream)
            })
            .await?;
        Ok(ShardTopology::from_listing(all, self.inner.keyspace_max()))
    }

    pub async fn split_shard(
        &self,
        stream: &str,
        shard: &ShardId,
        new_starting_hash: u128,
        wait_for_active: bool,
    ) -> Result<()> {
        info!(stream, %shard, new_starting_hash, "splitting shard");
        self.with_retries("split_shard", MODIFY_RETRIES, || {
            self.inner.split_shard(stream, shard, new_starting_hash)
        })
        .await?;
        if wait_for_active {
            self.wait_for_status(stream, StreamStatus::Active).await?;
        }
        Ok(())
    }

    pub async fn merge_shards(
        &self,
        stream: &str,
        lower: &ShardId,
        higher: &ShardId,
        wait_for_active: bool,
    ) -> Result<()> {
        info!(stream, %lower, %higher, "merging shards");
        self.with_retries("merge_shards", MODIFY_RETRIES, || {
            self.inner.merge_shards(stream, lower, higher)
        })
        .await?;
        if wait_for_active {
            self.wait_for_status(stream, StreamStatus::Active).await?;
        }
        Ok(())
    }

    /// Poll `describe` until the stream reaches `status`.
    pub async fn wait_for_status(&self, stream: &str, status: StreamStatus) -> Result<()> {
        let mut wait = FIRST_STATUS_POLL;
        loop {
            let description = self.describe(stream).await?;
            if description.status == status {
                return Ok(());
            }
            sleep(wait).await;
            wait = STATUS_POLL;
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(2u64.saturating_pow(attempt) * RETRY_TIMEOUT_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::InMemoryStreamControl;

    #[tokio::test(start_paused = true)]
    async fn retries_through_transient_busy_and_throttle() {
        let inner = Arc::new(InMemoryStreamControl::new(u128::MAX).with_stream("orders", 1));
        inner.inject_fault(ShardScaleError::ShardBusy("mutating".to_string()));
        inner.inject_fault(ShardScaleError::Throttled("rate exceeded".to_string()));

        let control = RetryingStreamControl::new(inner.clone());
        let topology = control.open_shards("orders").await.unwrap();
        let shard = topology.shards()[0].clone();

        control
            .split_shard("orders", &shard.id, 1u128 << 127, true)
            .await
            .unwrap();

        assert_eq!(inner.splits(), 1);
        assert_eq!(control.open_shard_count("orders").await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_operation_exhausted() {
        let inner = Arc::new(InMemoryStreamControl::new(u128::MAX).with_stream("orders", 1));
        for _ in 0..MODIFY_RETRIES {
            inner.inject_fault(ShardScaleError::ShardBusy("mutating".to_string()));
        }

        let control = RetryingStreamControl::new(inner.clone());
        let topology = control.open_shards("orders").await.unwrap();
        let shard = topology.shards()[0].clone();

        let err = control
            .split_shard("orders", &shard.id, 1u128 << 127, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShardScaleError::OperationExhausted { retries: MODIFY_RETRIES, .. }
        ));
        assert_eq!(inner.splits(), 0);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let inner = Arc::new(InMemoryStreamControl::new(u128::MAX).with_stream("orders", 1));
        let control = RetryingStreamControl::new(inner);
        let err = control
            .split_shard("orders", &"no-such-shard".to_string(), 10, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShardScaleError::ShardNotFound(_)));
    }
}
