//! Supervises one stream monitor per configured policy.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AutoscalingPolicy;
use crate::control_plane::{Notifier, RetryingStreamControl, StreamControl};
use crate::metric_source::MetricSource;
use crate::metrics::Metrics;
use crate::monitor::{ReportListener, StreamMonitor};
use crate::types::StreamName;

struct MonitorHandle {
    stream: StreamName,
    stop: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
    fatal: Arc<Mutex<Option<String>>>,
}

/// Owns the monitor tasks. Monitors share the adapter clients (they are
/// thread-safe) but no mutable state; each holds its own vote window and
/// cool-off timestamps.
pub struct AutoscalingController {
    handles: Vec<MonitorHandle>,
    metrics: Arc<Metrics>,
    suppress_abort_on_fatal: bool,
}

impl AutoscalingController {
    pub fn start(
        policies: Vec<AutoscalingPolicy>,
        control: Arc<dyn StreamControl>,
        metric_source: Arc<dyn MetricSource>,
        notifier: Arc<dyn Notifier>,
        listener: Option<Arc<dyn ReportListener>>,
        metrics: Arc<Metrics>,
        suppress_abort_on_fatal: bool,
    ) -> Self {
        let mut handles = Vec::with_capacity(policies.len());
        for policy in policies {
            let stream = policy.stream_name.clone();
            let (stop_tx, stop_rx) = watch::channel(false);
            let fatal = Arc::new(Mutex::new(None));

            let monitor = StreamMonitor::new(
                policy,
                Arc::new(RetryingStreamControl::new(control.clone())),
                metric_source.clone(),
                notifier.clone(),
                listener.clone(),
                metrics.clone(),
                fatal.clone(),
            );
            let join = tokio::spawn(monitor.run(stop_rx));

            handles.push(MonitorHandle {
                stream,
                stop: stop_tx,
                join: Mutex::new(Some(join)),
                fatal,
            });
        }

        metrics.monitored_streams.set(handles.len() as f64);
        info!(monitors = handles.len(), "autoscaling controller started");
        Self {
            handles,
            metrics,
            suppress_abort_on_fatal,
        }
    }

    /// Signal every monitor and wait for the loops to exit. Monitors stop
    /// promptly: the stop signal interrupts the inter-iteration sleep and
    /// no new plan is started.
    pub async fn stop(&self) {
        for handle in &self.handles {
            info!(stream = %handle.stream, "signalling monitor to stop");
            let _ = handle.stop.send(true);
        }
        for handle in &self.handles {
            let join = handle.join.lock().take();
            if let Some(join) = join {
                if let Err(error) = join.await {
                    warn!(stream = %handle.stream, %error, "monitor task join failed");
                }
            }
        }
        self.metrics.monitored_streams.set(0.0);
        info!("autoscaling controller stopped");
    }

    /// Fatal errors captured by monitors that have exited their loops.
    pub fn engine_errors(&self) -> Vec<(StreamName, String)> {
        self.handles
            .iter()
            .filter_map(|handle| {
                handle
                    .fatal
                    .lock()
                    .clone()
                    .map(|error| (handle.stream.clone(), error))
            })
            .collect()
    }

    /// Healthy unless a monitor has died fatally; suppression keeps the
    /// health endpoint green regardless.
    pub fn is_healthy(&self) -> bool {
        self.suppress_abort_on_fatal || self.engine_errors().is_empty()
    }

    pub fn monitored_streams(&self) -> Vec<StreamName> {
        self.handles
            .iter()
            .map(|handle| handle.stream.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdSpec;
    use crate::control_plane::{InMemoryStreamControl, LogNotifier};
    use crate::metric_source::InMemoryMetricSource;
    use crate::types::{OperationType, StreamMetric};
    use std::time::Duration;

    fn policy(stream: &str) -> AutoscalingPolicy {
        let spec = ThresholdSpec {
            scale_threshold_pct: 75,
            scale_after_mins: 3,
            scale_count: Some(1),
            scale_pct: None,
            cool_off_mins: 30,
            notification_arn: None,
        };
        AutoscalingPolicy {
            stream_name: stream.to_string(),
            region: "eu-west-1".to_string(),
            scale_on_operation: vec![OperationType::Put],
            min_shards: 1,
            max_shards: 8,
            refresh_shards_number_after_min: 10,
            check_interval: 3600,
            scale_up: spec.clone(),
            scale_down: ThresholdSpec {
                scale_threshold_pct: 20,
                scale_after_mins: 5,
                ..spec
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

    #[tokio::test]
    async fn healthy_controller_stops_promptly() {
        let control =
            Arc::new(InMemoryStreamControl::new(u128::MAX).with_stream("orders", 2));
        let controller = AutoscalingController::start(
            vec![policy("orders")],
            control,
            quota_source(),
            Arc::new(LogNotifier),
            None,
            Metrics::new(),
            false,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(controller.is_healthy());
        assert_eq!(controller.monitored_streams(), vec!["orders".to_string()]);

        // check_interval is an hour; stop must interrupt the sleep
        tokio::time::timeout(Duration::from_secs(2), controller.stop())
            .await
            .expect("stop did not interrupt the monitor sleep");
    }

    #[tokio::test]
    async fn fatal_setup_failure_surfaces_to_health() {
        // no stream behind the policy: the initial capacity load fails
        let control = Arc::new(InMemoryStreamControl::new(u128::MAX));
        let controller = AutoscalingController::start(
            vec![policy("missing")],
            control,
            quota_source(),
            Arc::new(LogNotifier),
            None,
            Metrics::new(),
            false,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!controller.is_healthy());
        let errors = controller.engine_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "missing");
        controller.stop().await;
    }

    #[tokio::test]
    async fn suppression_keeps_health_green() {
        let control = Arc::new(InMemoryStreamControl::new(u128::MAX));
        let controller = AutoscalingController::start(
            vec![policy("missing")],
            control,
            quota_source(),
            Arc::new(LogNotifier),
            None,
            Metrics::new(),
            true,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!controller.engine_errors().is_empty());
        assert!(controller.is_healthy());
        controller.stop().await;
    }
}
