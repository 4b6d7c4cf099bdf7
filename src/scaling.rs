//! Target computation and the stream scaling facade.

use std::sync::Arc;

use tracing::info;

use crate::control_plane::RetryingStreamControl;
use crate::error::{Result, ShardScaleError};
use crate::planner::ResizePlanner;
use crate::types::{CompletionStatus, ScaleDirection, ScalingReport, ShardSummary};

/// Compute the shard count a scaling action should target.
///
/// A `scale_count` is absolute and wins when both are present. Percentages
/// are interpreted the way operators phrase them: scaling up by 20 means
/// growing to 120% of the current size, while values of 100 or more are the
/// absolute factor. Scaling down by 15 removes 15% of the shards; values
/// above 100 divide, so scaling down by 200 halves the stream. The result
/// is clamped into `[max(1, min_shards), max_shards]`.
pub fn new_shard_count(
    current: u32,
    scale_count: Option<u32>,
    scale_pct: Option<u32>,
    direction: ScaleDirection,
    min_shards: Option<u32>,
    max_shards: Option<u32>,
) -> u32 {
    let current_f = current as f64;
    let raw: i64 = match direction {
        ScaleDirection::Up => match (scale_count, scale_pct) {
            (Some(count), _) => current as i64 + count as i64,
            (None, Some(pct)) => {
                let factor = if pct < 100 {
                    (100 + pct) as f64 / 100.0
                } else {
                    pct as f64 / 100.0
                };
                (current_f * factor).ceil() as i64
            }
            (None, None) => current as i64,
        },
        ScaleDirection::Down => match (scale_count, scale_pct) {
            (Some(count), _) => current as i64 - count as i64,
            (None, Some(pct)) => {
                if pct > 100 {
                    (current_f / (pct as f64 / 100.0)).floor() as i64
                } else {
                    current as i64 - (current_f * (pct as f64 / 100.0)).floor() as i64
                }
            }
            (None, None) => current as i64,
        },
        ScaleDirection::None => current as i64,
    };

    let floor = min_shards.unwrap_or(1).max(1) as i64;
    let mut target = raw.max(floor);
    if let Some(max) = max_shards {
        target = target.min(max as i64);
    }
    target as u32
}

/// High-level scaling operations against one stream provider. Manual
/// commands and the per-stream monitors both go through this facade.
pub struct StreamScaler {
    control: Arc<RetryingStreamControl>,
    planner: ResizePlanner,
}

impl StreamScaler {
    pub fn new(control: Arc<RetryingStreamControl>) -> Self {
        let planner = ResizePlanner::new(control.clone());
        Self { control, planner }
    }

    pub async fn open_shard_count(&self, stream: &str) -> Result<u32> {
        self.control.open_shard_count(stream).await
    }

    pub async fn scale_up(
        &self,
        stream: &str,
        scale_count: Option<u32>,
        scale_pct: Option<u32>,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
    ) -> Result<ScalingReport> {
        let current = self.open_shard_count(stream).await?;
        let target = new_shard_count(
            current,
            scale_count,
            scale_pct,
            ScaleDirection::Up,
            min_shards,
            max_shards,
        );
        self.update_shard_count(stream, current, target, min_shards, max_shards, ScaleDirection::Up)
            .await
    }

    pub async fn scale_down(
        &self,
        stream: &str,
        scale_count: Option<u32>,
        scale_pct: Option<u32>,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
    ) -> Result<ScalingReport> {
        let current = self.open_shard_count(stream).await?;
        let target = new_shard_count(
            current,
            scale_count,
            scale_pct,
            ScaleDirection::Down,
            min_shards,
            max_shards,
        );
        self.update_shard_count(
            stream,
            current,
            target,
            min_shards,
            max_shards,
            ScaleDirection::Down,
        )
        .await
    }

    /// Resize straight to `target` shards, rebalancing even when the count
    /// already matches.
    pub async fn resize(
        &self,
        stream: &str,
        target: u32,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
    ) -> Result<ScalingReport> {
        let current = self.open_shard_count(stream).await?;
        let direction = match target.cmp(&current) {
            std::cmp::Ordering::Greater => ScaleDirection::Up,
            std::cmp::Ordering::Less => ScaleDirection::Down,
            std::cmp::Ordering::Equal => ScaleDirection::None,
        };
        if direction == ScaleDirection::Down && current == 1 {
            return Err(ShardScaleError::AlreadyAtMinimum(stream.to_string()));
        }
        self.planner
            .resize_to(stream, target, min_shards, max_shards, direction)
            .await
    }

    /// Execute a computed scaling decision. `NoActionRequired` when the
    /// target equals the current count; `AlreadyAtMinimum` when scaling a
    /// single-shard stream down.
    pub async fn update_shard_count(
        &self,
        stream: &str,
        current: u32,
        target: u32,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
        direction: ScaleDirection,
    ) -> Result<ScalingReport> {
        if direction == ScaleDirection::Down && current == 1 {
            return Err(ShardScaleError::AlreadyAtMinimum(stream.to_string()));
        }
        if target == current || target < 1 {
            info!(
                stream,
                current, target, "target equals current shard count, nothing to do"
            );
            return Ok(ScalingReport::no_action(stream, direction, current));
        }
        self.planner
            .resize_to(stream, target, min_shards, max_shards, direction)
            .await
    }

    /// Snapshot of the current open-shard layout, as a report.
    pub async fn report_for(&self, stream: &str) -> Result<ScalingReport> {
        let topology = self.control.open_shards(stream).await?;
        let keyspace_max = self.control.keyspace_max();
        let mut report =
            ScalingReport::no_action(stream, ScaleDirection::None, topology.len() as u32);
        report.shards = topology
            .shards()
            .iter()
            .map(|shard| ShardSummary::from_shard(shard, keyspace_max))
            .collect();
        Ok(report)
    }

    /// Split a single shard at the midpoint of its range. Manual surgery
    /// for one hot shard; the stream ends up unbalanced by design.
    pub async fn split_one(&self, stream: &str, shard_id: &str) -> Result<ScalingReport> {
        let started_at = chrono::Utc::now();
        let topology = self.control.open_shards(stream).await?;
        let current = topology.len() as u32;
        let shard = topology
            .shard_by_id(shard_id)
            .ok_or_else(|| ShardScaleError::ShardNotFound(shard_id.to_string()))?;
        if shard.range.start == shard.range.end {
            return Err(ShardScaleError::InvalidOperation(format!(
                "shard {shard_id} covers a single hash and cannot be split"
            )));
        }
        let midpoint = shard.range.start + (shard.range.end - shard.range.start) / 2 + 1;
        self.control
            .split_shard(stream, &shard.id, midpoint, true)
            .await?;

        let after = self.control.open_shards(stream).await?;
        let keyspace_max = self.control.keyspace_max();
        Ok(ScalingReport {
            operation_id: uuid::Uuid::new_v4().to_string(),
            stream: stream.to_string(),
            direction: ScaleDirection::Up,
            start_shard_count: current,
            end_shard_count: after.len() as u32,
            operations_executed: 1,
            started_at,
            finished_at: chrono::Utc::now(),
            status: CompletionStatus::Ok,
            shards: after
                .shards()
                .iter()
                .map(|shard| ShardSummary::from_shard(shard, keyspace_max))
                .collect(),
        })
    }
}
