//! Stream control-plane and notification adapters.
//!
//! [`StreamControl`] is the raw provider surface: implementations perform
//! no retries of their own. [`RetryingStreamControl`] layers the shared
//! retry discipline on top of any implementation, and is what the planner
//! and monitors talk to.

pub mod memory;
pub mod retry;

pub use memory::InMemoryStreamControl;
pub use retry::{RetryingStreamControl, DESCRIBE_RETRIES, MODIFY_RETRIES, RETRY_TIMEOUT_MS};

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::topology::Shard;
use crate::types::{ShardId, StreamName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Active,
    Updating,
    Deleting,
}

#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub stream: StreamName,
    pub status: StreamStatus,
    pub open_shard_count: u32,
}

/// Raw control-plane operations for one stream provider.
#[async_trait]
pub trait StreamControl: Send + Sync {
    /// Upper bound of the hash keyspace, inclusive.
    fn keyspace_max(&self) -> u128;

    async fn describe(&self, stream: &str) -> Result<StreamDescription>;

    /// All shards of the stream, open and closed, in listing order.
    /// Implementations page through the provider API internally.
    async fn list_shards(&self, stream: &str) -> Result<Vec<Shard>>;

    /// Split `shard` in two; the right child starts at `new_starting_hash`.
    async fn split_shard(
        &self,
        stream: &str,
        shard: &ShardId,
        new_starting_hash: u128,
    ) -> Result<()>;

    /// Merge two adjacent shards: `lower.end + 1` must equal `higher.start`.
    async fn merge_shards(&self, stream: &str, lower: &ShardId, higher: &ShardId) -> Result<()>;
}

/// Fire-and-forget operator notifications. Failures are the implementation's
/// problem to log; they never propagate into a scaling iteration.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &str, subject: &str, body: &str);
}

/// Notifier that writes notifications to the log, used when no publishing
/// backend is wired in.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, target: &str, subject: &str, body: &str) {
        info!(target_arn = target, subject, body, "notification");
    }
}
