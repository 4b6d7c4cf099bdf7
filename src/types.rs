use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::topology::Shard;

pub type StreamName = String;
pub type ShardId = String;

/// Stream operation classes whose utilization can drive scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Put,
    Get,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Put => write!(f, "PUT"),
            OperationType::Get => write!(f, "GET"),
        }
    }
}

/// The two throughput dimensions published per shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamMetric {
    Records,
    Bytes,
}

impl StreamMetric {
    pub const ALL: [StreamMetric; 2] = [StreamMetric::Records, StreamMetric::Bytes];
}

impl fmt::Display for StreamMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMetric::Records => write!(f, "Records"),
            StreamMetric::Bytes => write!(f, "Bytes"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDirection::Up => write!(f, "UP"),
            ScaleDirection::Down => write!(f, "DOWN"),
            ScaleDirection::None => write!(f, "NONE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    Ok,
    NoActionRequired,
    AlreadyAtMinimum,
    Failed,
}

/// Per-shard line of a scaling report. Hash keys are rendered as strings:
/// they exceed the integer range JSON consumers can be trusted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSummary {
    pub shard_id: ShardId,
    pub start_hash: String,
    pub end_hash: String,
    pub coverage_pct: f64,
}

impl ShardSummary {
    pub fn from_shard(shard: &Shard, keyspace_max: u128) -> Self {
        Self {
            shard_id: shard.id.clone(),
            start_hash: shard.range.start.to_string(),
            end_hash: shard.range.end.to_string(),
            coverage_pct: shard.range.fraction_of(keyspace_max) * 100.0,
        }
    }
}

/// Outcome of one scaling evaluation, also used as the notification body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingReport {
    pub operation_id: String,
    pub stream: StreamName,
    pub direction: ScaleDirection,
    pub start_shard_count: u32,
    pub end_shard_count: u32,
    pub operations_executed: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shards: Vec<ShardSummary>,
}

impl ScalingReport {
    pub fn no_action(stream: &str, direction: ScaleDirection, shard_count: u32) -> Self {
        let now = Utc::now();
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            stream: stream.to_string(),
            direction,
            start_shard_count: shard_count,
            end_shard_count: shard_count,
            operations_executed: 0,
            started_at: now,
            finished_at: now,
            status: CompletionStatus::NoActionRequired,
            shards: Vec::new(),
        }
    }

    pub fn already_at_minimum(stream: &str, shard_count: u32) -> Self {
        let now = Utc::now();
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            stream: stream.to_string(),
            direction: ScaleDirection::Down,
            start_shard_count: shard_count,
            end_shard_count: shard_count,
            operations_executed: 0,
            started_at: now,
            finished_at: now,
            status: CompletionStatus::AlreadyAtMinimum,
            shards: Vec::new(),
        }
    }

    pub fn failed(
        stream: &str,
        direction: ScaleDirection,
        shard_count: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            stream: stream.to_string(),
            direction,
            start_shard_count: shard_count,
            end_shard_count: shard_count,
            operations_executed: 0,
            started_at,
            finished_at: Utc::now(),
            status: CompletionStatus::Failed,
            shards: Vec::new(),
        }
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for ScalingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scaling {} for Stream {}: {:?}, {} -> {} shards in {} operations",
            self.direction,
            self.stream,
            self.status,
            self.start_shard_count,
            self.end_shard_count,
            self.operations_executed
        )
    }
}
