//! Per-stream decision engine.
//!
//! One monitor owns one stream: it samples utilization over a rolling
//! window, classifies each datapoint against the scale-up and scale-down
//! thresholds, lets each configured operation type vote, combines the votes
//! and, cool-off permitting, drives the planner to a new shard count. The
//! loop never dies on an iteration failure; only a failed initial capacity
//! load is fatal, and that is surfaced through the captured-error slot the
//! controller watches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{AutoscalingPolicy, ThresholdSpec};
use crate::control_plane::{Notifier, RetryingStreamControl};
use crate::error::{Result, ShardScaleError};
use crate::metric_source::{MetricSource, SampleSeries, StreamCapacityTracker};
use crate::metrics::Metrics;
use crate::scaling::{new_shard_count, StreamScaler};
use crate::types::{CompletionStatus, OperationType, ScaleDirection, ScalingReport, StreamMetric};

pub const SCALE_UP_SUBJECT: &str = "Kinesis Autoscaling - Scale Up";
pub const SCALE_DOWN_SUBJECT: &str = "Kinesis Autoscaling - Scale Down";

/// Listener invoked with every report a monitor produces.
pub trait ReportListener: Send + Sync {
    fn on_report(&self, report: &ScalingReport);
}

/// Per-metric tallies accumulated over the sampling window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricTally {
    pub high_samples: u32,
    pub low_samples: u32,
    pub latest_avg_pct: f64,
}

/// Classify one metric's datapoints against the thresholds. Minutes with no
/// datapoint count as low samples, so a silent window can only vote down;
/// an entirely empty window seeds a full low count up front.
pub(crate) fn tally_samples(
    series: &SampleSeries,
    stream_max: f64,
    window_mins: u32,
    scale_up: &ThresholdSpec,
    scale_down: &ThresholdSpec,
) -> MetricTally {
    let mut tally = MetricTally::default();
    if series.is_empty() {
        tally.low_samples = scale_down.scale_after_mins;
    }

    let high_threshold = scale_up.scale_threshold_pct as f64 / 100.0;
    let low_threshold = scale_down.scale_threshold_pct as f64 / 100.0;
    let mut seen = false;
    for (timestamp, &observed) in series {
        let pct = observed / stream_max;
        debug!(
            at = %timestamp,
            observed,
            stream_max,
            utilisation_pct = pct * 100.0,
            "datapoint"
        );
        tally.latest_avg_pct = if seen {
            (tally.latest_avg_pct + pct) / 2.0
        } else {
            pct
        };
        seen = true;
        if pct > high_threshold {
            tally.high_samples += 1;
        } else if pct < low_threshold {
            tally.low_samples += 1;
        }
    }

    if (series.len() as u32) < window_mins {
        tally.low_samples += window_mins - series.len() as u32;
    }
    tally
}

/// Pick the driving metric (the higher moving average; bytes wins a tie)
/// and turn its tallies into this operation's vote.
pub(crate) fn vote_for(
    tallies: &HashMap<StreamMetric, MetricTally>,
    scale_up: &ThresholdSpec,
    scale_down: &ThresholdSpec,
) -> (ScaleDirection, StreamMetric, f64) {
    let bytes = tallies
        .get(&StreamMetric::Bytes)
        .copied()
        .unwrap_or_default();
    let records = tallies
        .get(&StreamMetric::Records)
        .copied()
        .unwrap_or_default();
    let (metric, tally) = if bytes.latest_avg_pct >= records.latest_avg_pct {
        (StreamMetric::Bytes, bytes)
    } else {
        (StreamMetric::Records, records)
    };

    let direction = if tally.high_samples >= scale_up.scale_after_mins {
        ScaleDirection::Up
    } else if tally.low_samples >= scale_down.scale_after_mins {
        ScaleDirection::Down
    } else {
        ScaleDirection::None
    };
    (direction, metric, tally.latest_avg_pct)
}

/// Combine per-operation votes: any UP wins, both DOWN scales down,
/// anything else holds. A single configured operation passes its vote
/// through.
pub(crate) fn combine_votes(votes: &HashMap<OperationType, ScaleDirection>) -> ScaleDirection {
    let get = votes.get(&OperationType::Get).copied();
    let put = votes.get(&OperationType::Put).copied();
    match (get, put) {
        (Some(get), Some(put)) => {
            if get == ScaleDirection::Up || put == ScaleDirection::Up {
                ScaleDirection::Up
            } else if get == ScaleDirection::Down && put == ScaleDirection::Down {
                ScaleDirection::Down
            } else {
                ScaleDirection::None
            }
        }
        (Some(vote), None) | (None, Some(vote)) => vote,
        (None, None) => ScaleDirection::None,
    }
}

pub struct StreamMonitor {
    policy: AutoscalingPolicy,
    metric_source: Arc<dyn MetricSource>,
    notifier: Arc<dyn Notifier>,
    scaler: StreamScaler,
    capacity: StreamCapacityTracker,
    listener: Option<Arc<dyn ReportListener>>,
    metrics: Arc<Metrics>,
    fatal: Arc<Mutex<Option<String>>>,
    last_scale_up: Option<DateTime<Utc>>,
    last_scale_down: Option<DateTime<Utc>>,
    last_capacity_refresh: DateTime<Utc>,
}

impl StreamMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: AutoscalingPolicy,
        control: Arc<RetryingStreamControl>,
        metric_source: Arc<dyn MetricSource>,
        notifier: Arc<dyn Notifier>,
        listener: Option<Arc<dyn ReportListener>>,
        metrics: Arc<Metrics>,
        fatal: Arc<Mutex<Option<String>>>,
    ) -> Self {
        let capacity = StreamCapacityTracker::new(
            policy.stream_name.clone(),
            policy.scale_on_operation.clone(),
            metric_source.clone(),
            control.clone(),
        );
        Self {
            policy,
            metric_source,
            notifier,
            scaler: StreamScaler::new(control),
            capacity,
            listener,
            metrics,
            fatal,
            last_scale_up: None,
            last_scale_down: None,
            last_capacity_refresh: Utc::now(),
        }
    }

    fn window_mins(&self) -> u32 {
        self.policy
            .scale_up
            .scale_after_mins
            .max(self.policy.scale_down.scale_after_mins)
    }

    /// One evaluation of the stream at time `now`. `None` means the
    /// iteration ended without anything to report (cool-off deferral).
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> Result<Option<ScalingReport>> {
        let stream = self.policy.stream_name.clone();
        let window = self.window_mins();
        let window_start = now - chrono::Duration::minutes(window as i64);

        let mut votes: HashMap<OperationType, ScaleDirection> = HashMap::new();
        for &op in &self.policy.scale_on_operation {
            let mut tallies: HashMap<StreamMetric, MetricTally> = HashMap::new();
            for metric in StreamMetric::ALL {
                let series = self
                    .metric_source
                    .samples(&stream, op, metric, window_start, now)
                    .await?;
                let stream_max = self.capacity.stream_max(op, metric).ok_or_else(|| {
                    ShardScaleError::MetricSource(format!(
                        "no capacity loaded for {stream} {op} {metric}"
                    ))
                })?;
                let tally = tally_samples(
                    &series,
                    stream_max,
                    window,
                    &self.policy.scale_up,
                    &self.policy.scale_down,
                );
                info!(
                    stream = %stream,
                    %op,
                    %metric,
                    high_samples = tally.high_samples,
                    low_samples = tally.low_samples,
                    "performance analysis"
                );
                tallies.insert(metric, tally);
            }

            let (vote, driving_metric, avg_pct) =
                vote_for(&tallies, &self.policy.scale_up, &self.policy.scale_down);
            info!(
                stream = %stream,
                %op,
                %driving_metric,
                utilisation_pct = avg_pct * 100.0,
                %vote,
                "vote decided on highest-utilisation metric"
            );
            votes.insert(op, vote);
        }

        let decision = combine_votes(&votes);
        info!(
            stream = %stream,
            get_vote = %votes.get(&OperationType::Get).copied().unwrap_or(ScaleDirection::None),
            put_vote = %votes.get(&OperationType::Put).copied().unwrap_or(ScaleDirection::None),
            %decision,
            "scaling votes"
        );

        let current = self.scaler.open_shard_count(&stream).await?;
        let spec = match decision {
            ScaleDirection::Up => &self.policy.scale_up,
            ScaleDirection::Down => &self.policy.scale_down,
            ScaleDirection::None => {
                info!(stream = %stream, "no scaling required, stream within tolerances");
                return Ok(Some(ScalingReport::no_action(
                    &stream,
                    ScaleDirection::None,
                    current,
                )));
            }
        };

        // cool-off: defer if the same direction fired too recently
        let last_action = match decision {
            ScaleDirection::Up => self.last_scale_up,
            _ => self.last_scale_down,
        };
        if let Some(last) = last_action {
            let cool_off = chrono::Duration::minutes(spec.cool_off_mins as i64);
            if now - last < cool_off {
                info!(
                    stream = %stream,
                    %decision,
                    cool_off_mins = spec.cool_off_mins,
                    "deferring scaling action until cool-off elapses"
                );
                self.metrics.deferred_actions.inc();
                return Ok(None);
            }
        }

        if decision == ScaleDirection::Down && current == 1 {
            info!(stream = %stream, "not scaling down, already at the minimum of one shard");
            return Ok(Some(ScalingReport::already_at_minimum(&stream, current)));
        }

        let target = new_shard_count(
            current,
            spec.scale_count,
            spec.scale_pct,
            decision,
            Some(self.policy.min_shards),
            Some(self.policy.max_shards),
        );
        if target == current {
            info!(
                stream = %stream,
                current, "computed target equals current shard count, nothing to do"
            );
            return Ok(Some(ScalingReport::no_action(&stream, decision, current)));
        }

        info!(
            stream = %stream,
            %decision,
            current,
            target,
            threshold_pct = spec.scale_threshold_pct,
            after_mins = spec.scale_after_mins,
            "requesting scaling action"
        );
        let started_at = now;
        let report = match self
            .scaler
            .update_shard_count(
                &stream,
                current,
                target,
                Some(self.policy.min_shards),
                Some(self.policy.max_shards),
                decision,
            )
            .await
        {
            Ok(report) => report,
            Err(ShardScaleError::AlreadyAtMinimum(_)) => {
                ScalingReport::already_at_minimum(&stream, current)
            }
            Err(error) => {
                // keep the cool-off timestamps untouched on failure
                error!(stream = %stream, %error, "scaling action failed");
                self.metrics.failed_actions.inc();
                ScalingReport::failed(&stream, decision, current, started_at)
            }
        };

        if report.status == CompletionStatus::Ok {
            match decision {
                ScaleDirection::Up => {
                    self.last_scale_up = Some(now);
                    self.metrics.scale_ups.inc();
                }
                _ => {
                    self.last_scale_down = Some(now);
                    self.metrics.scale_downs.inc();
                }
            }
            if let Err(error) = self.capacity.refresh().await {
                warn!(stream = %stream, %error, "capacity refresh after scaling failed");
            } else {
                self.last_capacity_refresh = now;
            }
            if let Some(target_arn) = &spec.notification_arn {
                let subject = match decision {
                    ScaleDirection::Up => SCALE_UP_SUBJECT,
                    _ => SCALE_DOWN_SUBJECT,
                };
                self.notifier
                    .notify(target_arn, subject, &report.as_json())
                    .await;
            }
        }

        Ok(Some(report))
    }

    /// The monitor loop. Runs until `stop` flips to true; a failed initial
    /// capacity load captures the error and exits immediately.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let stream = self.policy.stream_name.clone();
        info!(stream = %stream, "started stream monitor");

        if let Err(error) = self.capacity.refresh().await {
            let error = ShardScaleError::Fatal(format!("initial capacity load failed: {error}"));
            error!(stream = %stream, %error, "monitor exiting");
            *self.fatal.lock() = Some(error.to_string());
            return;
        }
        self.last_capacity_refresh = Utc::now();

        loop {
            if *stop.borrow() {
                break;
            }

            let now = Utc::now();
            match self.run_once(now).await {
                Ok(Some(report)) => {
                    if let Some(listener) = &self.listener {
                        listener.on_report(&report);
                    }
                    if report.direction != ScaleDirection::None
                        && report.status == CompletionStatus::Ok
                    {
                        info!(stream = %stream, %report, "scaling action complete");
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    // transient provider failures must not kill the loop
                    error!(stream = %stream, error = ?error, "monitor iteration failed");
                }
            }

            let refresh_after =
                chrono::Duration::minutes(self.policy.refresh_shards_number_after_min as i64);
            if Utc::now() - self.last_capacity_refresh > refresh_after {
                // pick up manual resizes done outside this process
                match self.capacity.refresh().await {
                    Ok(()) => self.last_capacity_refresh = Utc::now(),
                    Err(error) => warn!(stream = %stream, %error, "periodic capacity refresh failed"),
                }
            }

            debug!(
                stream = %stream,
                check_interval = self.policy.check_interval,
                "next check cycle"
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.policy.check_interval)) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!(stream = %stream, "stream monitor stopped");
    }
}
