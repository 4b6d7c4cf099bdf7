use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::control_plane::RetryingStreamControl;
use crate::error::{Result, ShardScaleError};
use crate::types::{OperationType, StreamMetric};

/// Aggregated sum-per-minute datapoints keyed by timestamp. Gaps mean no
/// activity in that minute.
pub type SampleSeries = BTreeMap<DateTime<Utc>, f64>;

/// Source of aggregated throughput metrics and provider quotas.
///
/// No retry policy beyond the implementation's own; failures surface to the
/// monitor as errors.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Aggregated datapoints for the window `[start, end]`.
    async fn samples(
        &self,
        stream: &str,
        op: OperationType,
        metric: StreamMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SampleSeries>;

    /// Provider-published quota for one shard, per sample period. The
    /// signature keeps the stream so providers with width- or
    /// tier-dependent quotas can be adapted without changing callers.
    async fn per_shard_max(
        &self,
        stream: &str,
        op: OperationType,
        metric: StreamMetric,
    ) -> Result<f64>;
}

/// Tracks the stream-level maximum throughput per (operation, metric):
/// open shard count times the per-shard quota. Owned by one monitor;
/// refreshed after scaling actions and on the configured refresh clock so
/// manual resizes are picked up.
pub struct StreamCapacityTracker {
    stream: String,
    operations: Vec<OperationType>,
    source: Arc<dyn MetricSource>,
    control: Arc<RetryingStreamControl>,
    capacity: HashMap<(OperationType, StreamMetric), f64>,
}

impl StreamCapacityTracker {
    pub fn new(
        stream: impl Into<String>,
        operations: Vec<OperationType>,
        source: Arc<dyn MetricSource>,
        control: Arc<RetryingStreamControl>,
    ) -> Self {
        Self {
            stream: stream.into(),
            operations,
            source,
            control,
            capacity: HashMap::new(),
        }
    }

    pub async fn refresh(&mut self) -> Result<()> {
        let open_shards = self.control.open_shard_count(&self.stream).await? as f64;
        for &op in &self.operations {
            for metric in StreamMetric::ALL {
                let per_shard = self.source.per_shard_max(&self.stream, op, metric).await?;
                if per_shard <= 0.0 {
                    return Err(ShardScaleError::MetricSource(format!(
                        "per-shard quota for {} {} {} is {per_shard}",
                        self.stream, op, metric
                    )));
                }
                self.capacity.insert((op, metric), open_shards * per_shard);
            }
        }
        info!(
            stream = %self.stream,
            open_shards,
            "refreshed stream capacity limits"
        );
        Ok(())
    }

    /// Stream-level maximum for the pair, if capacity has been loaded.
    pub fn stream_max(&self, op: OperationType, metric: StreamMetric) -> Option<f64> {
        self.capacity.get(&(op, metric)).copied()
    }
}

/// In-memory metric source for tests and local runs.
pub struct InMemoryMetricSource {
    series: RwLock<HashMap<(String, OperationType, StreamMetric), SampleSeries>>,
    quotas: RwLock<HashMap<(OperationType, StreamMetric), f64>>,
}

impl InMemoryMetricSource {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            quotas: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_quota(self, op: OperationType, metric: StreamMetric, per_shard: f64) -> Self {
        self.set_quota(op, metric, per_shard);
        self
    }

    pub fn set_quota(&self, op: OperationType, metric: StreamMetric, per_shard: f64) {
        self.quotas.write().insert((op, metric), per_shard);
    }

    pub fn record(
        &self,
        stream: &str,
        op: OperationType,
        metric: StreamMetric,
        at: DateTime<Utc>,
        value: f64,
    ) {
        self.series
            .write()
            .entry((stream.to_string(), op, metric))
            .or_default()
            .insert(at, value);
    }

    pub fn clear(&self, stream: &str) {
        self.series
            .write()
            .retain(|(name, _, _), _| name != stream);
    }
}

impl Default for InMemoryMetricSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn samples(
        &self,
        stream: &str,
        op: OperationType,
        metric: StreamMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SampleSeries> {
        let series = self.series.read();
        Ok(series
            .get(&(stream.to_string(), op, metric))
            .map(|points| {
                points
                    .range(start..=end)
                    .map(|(ts, value)| (*ts, *value))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn per_shard_max(
        &self,
        _stream: &str,
        op: OperationType,
        metric: StreamMetric,
    ) -> Result<f64> {
        self.quotas.read().get(&(op, metric)).copied().ok_or_else(|| {
            ShardScaleError::MetricSource(format!("no per-shard quota set for {op} {metric}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::InMemoryStreamControl;
    use chrono::Duration;

    #[tokio::test]
    async fn samples_filter_to_window() {
        let source = InMemoryMetricSource::new();
        let now = Utc::now();
        for mins_ago in 0..10 {
            source.record(
                "orders",
                OperationType::Put,
                StreamMetric::Records,
                now - Duration::minutes(mins_ago),
                mins_ago as f64,
            );
        }

        let window = source
            .samples(
                "orders",
                OperationType::Put,
                StreamMetric::Records,
                now - Duration::minutes(4),
                now,
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 5);
    }

    #[tokio::test]
    async fn missing_quota_is_an_error() {
        let source = InMemoryMetricSource::new();
        let err = source
            .per_shard_max("orders", OperationType::Get, StreamMetric::Bytes)
            .await
            .unwrap_err();
        assert!(matches!(err, ShardScaleError::MetricSource(_)));
    }

    #[tokio::test]
    async fn capacity_tracks_open_shard_count() {
        let control = Arc::new(RetryingStreamControl::new(Arc::new(
            InMemoryStreamControl::new(u128::MAX).with_stream("orders", 4),
        )));
        let source = Arc::new(
            InMemoryMetricSource::new()
                .with_quota(OperationType::Put, StreamMetric::Records, 60_000.0)
                .with_quota(OperationType::Put, StreamMetric::Bytes, 60_000_000.0),
        );

        let mut tracker = StreamCapacityTracker::new(
            "orders",
            vec![OperationType::Put],
            source,
            control,
        );
        tracker.refresh().await.unwrap();

        assert_eq!(
            tracker.stream_max(OperationType::Put, StreamMetric::Records),
            Some(240_000.0)
        );
        assert_eq!(
            tracker.stream_max(OperationType::Put, StreamMetric::Bytes),
            Some(240_000_000.0)
        );
    }
}
