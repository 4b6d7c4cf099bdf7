//! End-to-end scaling flows over the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use shardscale::config::{AutoscalingPolicy, ThresholdSpec};
use shardscale::control_plane::{
    InMemoryStreamControl, Notifier, RetryingStreamControl, StreamControl,
};
use shardscale::controller::AutoscalingController;
use shardscale::metric_source::InMemoryMetricSource;
use shardscale::metrics::Metrics;
use shardscale::monitor::{ReportListener, SCALE_UP_SUBJECT};
use shardscale::scaling::StreamScaler;
use shardscale::types::{CompletionStatus, OperationType, ScalingReport, StreamMetric};

#[derive(Default)]
struct RecordingListener {
    reports: Mutex<Vec<ScalingReport>>,
}

impl ReportListener for RecordingListener {
    fn on_report(&self, report: &ScalingReport) {
        self.reports.lock().push(report.clone());
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: &str, subject: &str, body: &str) {
        self.messages
            .lock()
            .push((target.to_string(), subject.to_string(), body.to_string()));
    }
}

fn policy(stream: &str) -> AutoscalingPolicy {
    AutoscalingPolicy {
        stream_name: stream.to_string(),
        region: "eu-west-1".to_string(),
        scale_on_operation: vec![OperationType::Put],
        min_shards: 1,
        max_shards: 16,
        refresh_shards_number_after_min: 10,
        check_interval: 1,
        scale_up: ThresholdSpec {
            scale_threshold_pct: 75,
            scale_after_mins: 3,
            scale_count: None,
            scale_pct: Some(200),
            cool_off_mins: 60,
            notification_arn: Some("arn:aws:sns:eu-west-1:000000000000:scaling".to_string()),
        },
        scale_down: ThresholdSpec {
            scale_threshold_pct: 20,
            scale_after_mins: 5,
            scale_count: None,
            scale_pct: Some(200),
            cool_off_mins: 60,
            notification_arn: None,
        },
    }
}

fn quota_source() -> Arc<InMemoryMetricSource> {
    Arc::new(
        InMemoryMetricSource::new()
            .with_quota(OperationType::Put, StreamMetric::Records, 1000.0)
            .with_quota(OperationType::Put, StreamMetric::Bytes, 1_000_000.0),
    )
}

fn saturate(source: &InMemoryMetricSource, stream: &str, per_minute: f64) {
    let now = Utc::now();
    for minutes_ago in 1..=5 {
        source.record(
            stream,
            OperationType::Put,
            StreamMetric::Records,
            now - chrono::Duration::minutes(minutes_ago),
            per_minute,
        );
    }
}

#[tokio::test]
async fn sustained_load_scales_the_stream_up_and_notifies() {
    let control = Arc::new(InMemoryStreamControl::new(u128::MAX).with_stream("orders", 2));
    let source = quota_source();
    // two shards at 1000 records/min each: 95% utilisation
    saturate(&source, "orders", 1900.0);

    let listener = Arc::new(RecordingListener::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let controller = AutoscalingController::start(
        vec![policy("orders")],
        control.clone(),
        source,
        notifier.clone(),
        Some(listener.clone()),
        Metrics::new(),
        false,
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.stop().await;

    let description = control.describe("orders").await.unwrap();
    assert_eq!(description.open_shard_count, 4);

    let reports = listener.reports.lock();
    let executed: Vec<&ScalingReport> = reports
        .iter()
        .filter(|report| report.status == CompletionStatus::Ok)
        .collect();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].start_shard_count, 2);
    assert_eq!(executed[0].end_shard_count, 4);

    let messages = notifier.messages.lock();
    assert_eq!(messages.len(), 1);
    let (target, subject, body) = &messages[0];
    assert_eq!(target, "arn:aws:sns:eu-west-1:000000000000:scaling");
    assert_eq!(subject, SCALE_UP_SUBJECT);
    let notified: ScalingReport = serde_json::from_str(body).unwrap();
    assert_eq!(notified.end_shard_count, 4);
}

#[tokio::test]
async fn silent_stream_drains_down_to_the_floor() {
    let control = Arc::new(InMemoryStreamControl::new(u128::MAX).with_stream("clicks", 8));
    let mut drain_policy = policy("clicks");
    drain_policy.min_shards = 2;
    // no cool-off so consecutive iterations keep halving
    drain_policy.scale_down.cool_off_mins = 0;

    let listener = Arc::new(RecordingListener::default());
    let controller = AutoscalingController::start(
        vec![drain_policy],
        control.clone(),
        quota_source(),
        Arc::new(RecordingNotifier::default()),
        Some(listener.clone()),
        Metrics::new(),
        false,
    );

    // three iterations at a one second check interval: 8 -> 4 -> 2
    tokio::time::sleep(Duration::from_millis(2600)).await;
    controller.stop().await;

    let description = control.describe("clicks").await.unwrap();
    assert_eq!(description.open_shard_count, 2);

    let reports = listener.reports.lock();
    assert!(reports
        .iter()
        .any(|report| report.status == CompletionStatus::Ok));
}

#[tokio::test]
async fn independent_streams_scale_independently() {
    let control = Arc::new(
        InMemoryStreamControl::new(u128::MAX)
            .with_stream("orders", 2)
            .with_stream("clicks", 2),
    );
    let source = quota_source();
    // orders is hot, clicks is idle
    saturate(&source, "orders", 1900.0);
    saturate(&source, "clicks", 1000.0);

    let controller = AutoscalingController::start(
        vec![policy("orders"), policy("clicks")],
        control.clone(),
        source,
        Arc::new(RecordingNotifier::default()),
        None,
        Metrics::new(),
        false,
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.stop().await;

    assert_eq!(control.describe("orders").await.unwrap().open_shard_count, 4);
    assert_eq!(control.describe("clicks").await.unwrap().open_shard_count, 2);
}

#[tokio::test]
async fn resize_round_trip_restores_balance() {
    let control = Arc::new(InMemoryStreamControl::new(u128::MAX).with_stream("orders", 4));
    let scaler = StreamScaler::new(Arc::new(RetryingStreamControl::new(control.clone())));

    for target in [7u32, 4] {
        let report = scaler.resize("orders", target, None, None).await.unwrap();
        assert_eq!(report.end_shard_count, target);
    }

    let report = scaler.report_for("orders").await.unwrap();
    assert_eq!(report.shards.len(), 4);
    for summary in &report.shards {
        assert!((summary.coverage_pct - 25.0).abs() < 1e-6);
    }
}
