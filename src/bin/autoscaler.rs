use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use shardscale::admin_api::AdminApi;
use shardscale::config::{self, load_policies};
use shardscale::control_plane::{InMemoryStreamControl, LogNotifier, RetryingStreamControl};
use shardscale::controller::AutoscalingController;
use shardscale::metric_source::InMemoryMetricSource;
use shardscale::metrics::Metrics;
use shardscale::scaling::StreamScaler;
use shardscale::types::{OperationType, StreamMetric};
use shardscale::Result;

#[derive(Parser)]
#[command(name = "autoscaler")]
#[command(about = "Stream autoscaling daemon: one monitor per configured stream")]
pub struct Cli {
    /// Policy file location: a path or file:// URL
    #[arg(long, env = config::CONFIG_URL_ENV)]
    pub config_url: String,

    /// Admin API and health endpoint port
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Keep the health endpoint green even when a monitor dies fatally
    #[arg(long, env = config::SUPPRESS_ABORT_ENV)]
    pub suppress_abort_on_fatal: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    info!(config_url = %cli.config_url, "loading autoscaling policies");
    let policies = match load_policies(&cli.config_url) {
        Ok(policies) => policies,
        Err(error) => {
            error!(%error, "failed to load configuration");
            std::process::exit(1);
        }
    };
    for policy in &policies {
        info!(
            stream = %policy.stream_name,
            min_shards = policy.min_shards,
            max_shards = policy.max_shards,
            check_interval = policy.check_interval,
            "monitoring stream"
        );
    }

    // Provider SDK adapters implement StreamControl/MetricSource/Notifier
    // at integration time; this binary wires the in-memory pair.
    warn!("no provider SDK wired in, using the in-memory control plane and metric source");
    let control = Arc::new(InMemoryStreamControl::new(u128::MAX));
    for policy in &policies {
        control.create_stream(&policy.stream_name, policy.min_shards);
    }
    let metric_source = Arc::new(
        InMemoryMetricSource::new()
            .with_quota(OperationType::Put, StreamMetric::Records, 60_000.0)
            .with_quota(OperationType::Put, StreamMetric::Bytes, 60_000_000.0)
            .with_quota(OperationType::Get, StreamMetric::Records, 120_000.0)
            .with_quota(OperationType::Get, StreamMetric::Bytes, 120_000_000.0),
    );

    let metrics = Metrics::new();
    let controller = Arc::new(AutoscalingController::start(
        policies,
        control.clone(),
        metric_source,
        Arc::new(LogNotifier),
        None,
        metrics.clone(),
        cli.suppress_abort_on_fatal,
    ));

    let scaler = Arc::new(StreamScaler::new(Arc::new(RetryingStreamControl::new(
        control,
    ))));
    let admin_api = AdminApi::new(controller.clone(), scaler, metrics, cli.port);
    let api_handle = tokio::spawn(admin_api.start());

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = api_handle => {
            error!("admin API terminated unexpectedly");
        }
    }

    controller.stop().await;
    info!("autoscaler shutdown complete");
    Ok(())
}
