use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{StreamControl, StreamDescription, StreamStatus};
use crate::error::{Result, ShardScaleError};
use crate::keyspace::{ideal_partition_starts, HashRange};
use crate::topology::Shard;
use crate::types::{ShardId, StreamName};

/// In-memory control plane used by tests and local runs.
///
/// Implements full split/merge semantics over the keyspace: children carry
/// parent ids and parents close, exactly as the provider reports them.
/// Mutations apply instantly, so the stream is always `Active`. Faults can
/// be queued with [`inject_fault`] to exercise the retry discipline; each
/// queued error fails the next mutating call.
///
/// [`inject_fault`]: InMemoryStreamControl::inject_fault
pub struct InMemoryStreamControl {
    keyspace_max: u128,
    streams: Mutex<HashMap<StreamName, StreamState>>,
    faults: Mutex<VecDeque<ShardScaleError>>,
    splits: AtomicU32,
    merges: AtomicU32,
}

struct StreamState {
    shards: Vec<Shard>,
    next_index: u64,
}

impl StreamState {
    fn next_id(&mut self) -> ShardId {
        self.next_index += 1;
        format!("shardId-{:012}", self.next_index)
    }

    fn closed_ids(&self) -> HashSet<&str> {
        let mut closed = HashSet::new();
        for shard in &self.shards {
            if let Some(parent) = &shard.parent {
                closed.insert(parent.as_str());
            }
            if let Some(parent) = &shard.adjacent_parent {
                closed.insert(parent.as_str());
            }
        }
        closed
    }

    fn open_count(&self) -> u32 {
        let closed = self.closed_ids();
        self.shards
            .iter()
            .filter(|shard| !closed.contains(shard.id.as_str()))
            .count() as u32
    }

    fn open_shard(&self, id: &str) -> Result<Shard> {
        let shard = self
            .shards
            .iter()
            .find(|shard| shard.id == id)
            .ok_or_else(|| ShardScaleError::ShardNotFound(id.to_string()))?;
        if self.closed_ids().contains(id) {
            return Err(ShardScaleError::InvalidOperation(format!(
                "shard {id} is closed"
            )));
        }
        Ok(shard.clone())
    }
}

impl InMemoryStreamControl {
    pub fn new(keyspace_max: u128) -> Self {
        Self {
            keyspace_max,
            streams: Mutex::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
            splits: AtomicU32::new(0),
            merges: AtomicU32::new(0),
        }
    }

    /// Builder form of [`create_stream`].
    ///
    /// [`create_stream`]: InMemoryStreamControl::create_stream
    pub fn with_stream(self, stream: &str, shard_count: u32) -> Self {
        self.create_stream(stream, shard_count);
        self
    }

    /// Create `stream` with `shard_count` equal shards.
    pub fn create_stream(&self, stream: &str, shard_count: u32) {
        let starts = ideal_partition_starts(self.keyspace_max, shard_count);
        let mut state = StreamState {
            shards: Vec::new(),
            next_index: 0,
        };
        for (k, &start) in starts.iter().enumerate() {
            let end = if k + 1 == starts.len() {
                self.keyspace_max
            } else {
                starts[k + 1] - 1
            };
            let id = state.next_id();
            state.shards.push(Shard::root(id, HashRange::new(start, end)));
        }
        self.streams.lock().insert(stream.to_string(), state);
    }

    /// Queue an error; the next mutating call fails with it instead of
    /// executing.
    pub fn inject_fault(&self, error: ShardScaleError) {
        self.faults.lock().push_back(error);
    }

    pub fn splits(&self) -> u32 {
        self.splits.load(Ordering::SeqCst)
    }

    pub fn merges(&self) -> u32 {
        self.merges.load(Ordering::SeqCst)
    }

    fn take_fault(&self) -> Option<ShardScaleError> {
        self.faults.lock().pop_front()
    }
}

#[async_trait]
impl StreamControl for InMemoryStreamControl {
    fn keyspace_max(&self) -> u128 {
        self.keyspace_max
    }

    async fn describe(&self, stream: &str) -> Result<StreamDescription> {
        let streams = self.streams.lock();
        let state = streams
            .get(stream)
            .ok_or_else(|| ShardScaleError::StreamNotFound(stream.to_string()))?;
        Ok(StreamDescription {
            stream: stream.to_string(),
            status: StreamStatus::Active,
            open_shard_count: state.open_count(),
        })
    }

    async fn list_shards(&self, stream: &str) -> Result<Vec<Shard>> {
        let streams = self.streams.lock();
        let state = streams
            .get(stream)
            .ok_or_else(|| ShardScaleError::StreamNotFound(stream.to_string()))?;
        Ok(state.shards.clone())
    }

    async fn split_shard(
        &self,
        stream: &str,
        shard: &ShardId,
        new_starting_hash: u128,
    ) -> Result<()> {
        if let Some(error) = self.take_fault() {
            return Err(error);
        }
        let mut streams = self.streams.lock();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| ShardScaleError::StreamNotFound(stream.to_string()))?;
        let parent = state.open_shard(shard)?;
        if new_starting_hash <= parent.range.start || new_starting_hash > parent.range.end {
            return Err(ShardScaleError::InvalidOperation(format!(
                "split hash {new_starting_hash} is outside shard {shard} [{}..{}]",
                parent.range.start, parent.range.end
            )));
        }

        let left_id = state.next_id();
        let right_id = state.next_id();
        state.shards.push(Shard {
            id: left_id,
            range: HashRange::new(parent.range.start, new_starting_hash - 1),
            parent: Some(parent.id.clone()),
            adjacent_parent: None,
        });
        state.shards.push(Shard {
            id: right_id,
            range: HashRange::new(new_starting_hash, parent.range.end),
            parent: Some(parent.id),
            adjacent_parent: None,
        });
        self.splits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn merge_shards(&self, stream: &str, lower: &ShardId, higher: &ShardId) -> Result<()> {
        if let Some(error) = self.take_fault() {
            return Err(error);
        }
        let mut streams = self.streams.lock();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| ShardScaleError::StreamNotFound(stream.to_string()))?;
        let lower_shard = state.open_shard(lower)?;
        let higher_shard = state.open_shard(higher)?;
        if !lower_shard.range.adjoins_below(&higher_shard.range) {
            return Err(ShardScaleError::InvalidOperation(format!(
                "shards {lower} and {higher} are not adjacent"
            )));
        }

        let child_id = state.next_id();
        state.shards.push(Shard {
            id: child_id,
            range: HashRange::new(lower_shard.range.start, higher_shard.range.end),
            parent: Some(lower_shard.id),
            adjacent_parent: Some(higher_shard.id),
        });
        self.merges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ShardTopology;

    #[tokio::test]
    async fn split_closes_parent_and_covers_range() {
        let control = InMemoryStreamControl::new(999).with_stream("orders", 1);
        let listing = control.list_shards("orders").await.unwrap();
        let root = listing[0].clone();

        control.split_shard("orders", &root.id, 500).await.unwrap();

        let topology =
            ShardTopology::from_listing(control.list_shards("orders").await.unwrap(), 999);
        topology.validate().unwrap();
        assert_eq!(topology.len(), 2);
        assert_eq!(topology.shards()[0].range, HashRange::new(0, 499));
        assert_eq!(topology.shards()[1].range, HashRange::new(500, 999));
        assert!(topology.shard_by_id(&root.id).is_none());
    }

    #[tokio::test]
    async fn merge_requires_adjacency() {
        let control = InMemoryStreamControl::new(999).with_stream("orders", 4);
        let topology =
            ShardTopology::from_listing(control.list_shards("orders").await.unwrap(), 999);
        let first = topology.shards()[0].id.clone();
        let third = topology.shards()[2].id.clone();

        let err = control
            .merge_shards("orders", &first, &third)
            .await
            .unwrap_err();
        assert!(matches!(err, ShardScaleError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn merge_produces_single_covering_child() {
        let control = InMemoryStreamControl::new(999).with_stream("orders", 2);
        let topology =
            ShardTopology::from_listing(control.list_shards("orders").await.unwrap(), 999);
        let lower = topology.shards()[0].id.clone();
        let higher = topology.shards()[1].id.clone();

        control.merge_shards("orders", &lower, &higher).await.unwrap();

        let after =
            ShardTopology::from_listing(control.list_shards("orders").await.unwrap(), 999);
        after.validate().unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after.shards()[0].range, HashRange::new(0, 999));
        assert_eq!(after.shards()[0].parent.as_deref(), Some(lower.as_str()));
        assert_eq!(
            after.shards()[0].adjacent_parent.as_deref(),
            Some(higher.as_str())
        );
    }

    #[tokio::test]
    async fn split_of_closed_shard_is_rejected() {
        let control = InMemoryStreamControl::new(999).with_stream("orders", 1);
        let root = control.list_shards("orders").await.unwrap()[0].clone();
        control.split_shard("orders", &root.id, 500).await.unwrap();

        let err = control
            .split_shard("orders", &root.id, 250)
            .await
            .unwrap_err();
        assert!(matches!(err, ShardScaleError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn describe_counts_open_shards_only() {
        let control = InMemoryStreamControl::new(999).with_stream("orders", 1);
        let root = control.list_shards("orders").await.unwrap()[0].clone();
        control.split_shard("orders", &root.id, 500).await.unwrap();

        let description = control.describe("orders").await.unwrap();
        assert_eq!(description.open_shard_count, 2);
        assert_eq!(description.status, StreamStatus::Active);
    }
}
