//! Keyspace-aware resize planner.
//!
//! Given the current open-shard topology and a target count, issues the
//! split and merge operations that leave the stream with `target` equally
//! sized shards. The walk goes left to right over the ideal partition
//! boundaries, merging shards that fall short of the next boundary before
//! splitting shards that cross it, which conserves the control plane's
//! per-call budget. Every mutation waits for the stream to return to
//! `ACTIVE` before the next is issued.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::control_plane::RetryingStreamControl;
use crate::error::{Result, ShardScaleError};
use crate::keyspace::ideal_partition_starts;
use crate::topology::ShardTopology;
use crate::types::{CompletionStatus, ScaleDirection, ScalingReport, ShardSummary};

pub struct ResizePlanner {
    control: Arc<RetryingStreamControl>,
}

#[derive(Debug, Default)]
struct WalkOutcome {
    splits: u32,
    merges: u32,
}

impl WalkOutcome {
    fn operations(&self) -> u32 {
        self.splits + self.merges
    }
}

impl ResizePlanner {
    pub fn new(control: Arc<RetryingStreamControl>) -> Self {
        Self { control }
    }

    /// Drive `stream` to `target` open shards covering equal slices of the
    /// keyspace. The target is clamped into `[max(1, min_shards),
    /// max_shards]` first.
    pub async fn resize_to(
        &self,
        stream: &str,
        target: u32,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
        direction: ScaleDirection,
    ) -> Result<ScalingReport> {
        let started_at = Utc::now();
        let topology = self.control.open_shards(stream).await?;
        topology.validate()?;
        let current = topology.len() as u32;
        let target = clamp_target(target, min_shards, max_shards);

        if target == current && topology.is_balanced(target) {
            debug!(stream, target, "stream already at target and balanced");
            return Ok(ScalingReport::no_action(stream, direction, current));
        }

        info!(stream, current, target, "resizing stream");
        let mut outcome = self.walk(stream, target, topology).await?;

        let mut after = self.control.open_shards(stream).await?;
        if !after.is_balanced(target) {
            // a concurrent mutation can leave the keyspace uneven; replan once
            warn!(stream, target, "topology not balanced after plan, replanning");
            let second = self.walk(stream, target, after).await?;
            outcome.splits += second.splits;
            outcome.merges += second.merges;
            after = self.control.open_shards(stream).await?;
            if !after.is_balanced(target) {
                return Err(ShardScaleError::Inconsistent(format!(
                    "stream {stream} is not balanced at {target} shards after replanning"
                )));
            }
        }

        let keyspace_max = self.control.keyspace_max();
        Ok(ScalingReport {
            operation_id: uuid::Uuid::new_v4().to_string(),
            stream: stream.to_string(),
            direction,
            start_shard_count: current,
            end_shard_count: after.len() as u32,
            operations_executed: outcome.operations(),
            started_at,
            finished_at: Utc::now(),
            status: CompletionStatus::Ok,
            shards: after
                .shards()
                .iter()
                .map(|shard| ShardSummary::from_shard(shard, keyspace_max))
                .collect(),
        })
    }

    /// One left-to-right pass. Partition `k` of the ideal layout is
    /// assembled from the shard starting at its boundary: merged rightward
    /// while it falls short, split once it overshoots.
    async fn walk(
        &self,
        stream: &str,
        target: u32,
        mut topology: ShardTopology,
    ) -> Result<WalkOutcome> {
        let keyspace_max = self.control.keyspace_max();
        let starts = ideal_partition_starts(keyspace_max, target);
        let mut outcome = WalkOutcome::default();
        let mut k: usize = 0;

        while k < target as usize {
            let partition_start = starts[k];
            let partition_end = if k + 1 == target as usize {
                keyspace_max
            } else {
                starts[k + 1] - 1
            };

            let shard = topology
                .shard_at_hash(partition_start)
                .ok_or_else(|| {
                    ShardScaleError::Inconsistent(format!(
                        "no open shard covers hash {partition_start} in stream {stream}"
                    ))
                })?
                .clone();
            if shard.range.start != partition_start {
                return Err(ShardScaleError::Inconsistent(format!(
                    "shard {} starts at {} instead of the partition boundary {partition_start}",
                    shard.id, shard.range.start
                )));
            }

            if shard.range.end < partition_end {
                // shard falls short of the boundary: absorb the right
                // neighbour; the validated topology guarantees adjacency
                let next = topology
                    .shard_at_hash(shard.range.end + 1)
                    .ok_or_else(|| {
                        ShardScaleError::Inconsistent(format!(
                            "no open shard follows {} in stream {stream}",
                            shard.id
                        ))
                    })?
                    .clone();
                self.control
                    .merge_shards(stream, &shard.id, &next.id, true)
                    .await?;
                outcome.merges += 1;
            } else if shard.range.end > partition_end {
                self.control
                    .split_shard(stream, &shard.id, partition_end + 1, true)
                    .await?;
                outcome.splits += 1;
                k += 1;
            } else {
                k += 1;
                continue;
            }

            topology = self.control.open_shards(stream).await?;
            topology.validate()?;
        }

        Ok(outcome)
    }
}

fn clamp_target(target: u32, min_shards: Option<u32>, max_shards: Option<u32>) -> u32 {
    let floor = min_shards.unwrap_or(1).max(1);
    let mut clamped = target.max(floor);
    if let Some(max) = max_shards {
        clamped = clamped.min(max);
    }
    clamped
}
