//! Admin REST surface: health, prometheus metrics, stream reports and
//! manual scaling commands.

use std::convert::Infallible;
use std::sync::Arc;

use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use crate::controller::AutoscalingController;
use crate::error::ShardScaleError;
use crate::metrics::Metrics;
use crate::scaling::StreamScaler;
use crate::types::ScalingReport;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Resize,
    Report,
}

/// Manual scaling command, posted by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRequest {
    pub action: ScalingAction,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub pct: Option<u32>,
    #[serde(default)]
    pub min_shards: Option<u32>,
    #[serde(default)]
    pub max_shards: Option<u32>,
    /// Split this single shard at its midpoint instead of rebalancing.
    #[serde(default)]
    pub shard_id: Option<String>,
    #[serde(default)]
    pub wait_for_completion: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub streams: Vec<String>,
    pub errors: Vec<EngineError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineError {
    pub stream: String,
    pub error: String,
}

pub struct AdminApi {
    controller: Arc<AutoscalingController>,
    scaler: Arc<StreamScaler>,
    metrics: Arc<Metrics>,
    port: u16,
}

impl AdminApi {
    pub fn new(
        controller: Arc<AutoscalingController>,
        scaler: Arc<StreamScaler>,
        metrics: Arc<Metrics>,
        port: u16,
    ) -> Self {
        Self {
            controller,
            scaler,
            metrics,
            port,
        }
    }

    pub fn routes(&self) -> BoxedFilter<(impl Reply,)> {
        let controller = self.controller.clone();
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let controller = controller.clone();
                async move { health_handler(controller).await }
            });

        let metrics = self.metrics.clone();
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let metrics = metrics.clone();
                async move { metrics_handler(metrics).await }
            });

        let scaler = self.scaler.clone();
        let report = warp::path!("api" / "v1" / "streams" / String / "report")
            .and(warp::get())
            .and_then(move |stream: String| {
                let scaler = scaler.clone();
                async move { report_handler(scaler, stream).await }
            });

        let scaler = self.scaler.clone();
        let scale = warp::path!("api" / "v1" / "streams" / String / "scale")
            .and(warp::post())
            .and(warp::body::json())
            .and_then(move |stream: String, request: ScaleRequest| {
                let scaler = scaler.clone();
                async move { scale_handler(scaler, stream, request).await }
            });

        health.or(metrics_route).or(report).or(scale).boxed()
    }

    pub async fn start(self) {
        let port = self.port;
        info!(port, "admin API listening");
        warp::serve(self.routes()).run(([0, 0, 0, 0], port)).await;
    }
}

async fn health_handler(
    controller: Arc<AutoscalingController>,
) -> Result<impl Reply, Infallible> {
    let errors = controller
        .engine_errors()
        .into_iter()
        .map(|(stream, error)| EngineError { stream, error })
        .collect();
    let healthy = controller.is_healthy();
    let body = HealthResponse {
        status: if healthy { "ok" } else { "failed" }.to_string(),
        streams: controller.monitored_streams(),
        errors,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), code))
}

async fn metrics_handler(metrics: Arc<Metrics>) -> Result<impl Reply, Infallible> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        error!(%error, "failed to encode metrics");
        return Ok(warp::reply::with_status(
            String::new(),
            StatusCode::INTERNAL_SERVER_ERROR,
        ));
    }
    Ok(warp::reply::with_status(
        String::from_utf8_lossy(&buffer).to_string(),
        StatusCode::OK,
    ))
}

async fn report_handler(
    scaler: Arc<StreamScaler>,
    stream: String,
) -> Result<impl Reply, Infallible> {
    match scaler.report_for(&stream).await {
        Ok(report) => Ok(reply(StatusCode::OK, ok_response(report))),
        Err(error) => Ok(error_reply(&stream, error)),
    }
}

async fn scale_handler(
    scaler: Arc<StreamScaler>,
    stream: String,
    request: ScaleRequest,
) -> Result<impl Reply, Infallible> {
    info!(stream = %stream, action = ?request.action, "manual scaling command");
    let result = match request.action {
        ScalingAction::ScaleUp => {
            scaler
                .scale_up(
                    &stream,
                    request.count,
                    request.pct,
                    request.min_shards,
                    request.max_shards,
                )
                .await
        }
        ScalingAction::ScaleDown => {
            scaler
                .scale_down(
                    &stream,
                    request.count,
                    request.pct,
                    request.min_shards,
                    request.max_shards,
                )
                .await
        }
        ScalingAction::Resize => match (&request.shard_id, request.count) {
            (Some(shard_id), _) => scaler.split_one(&stream, shard_id).await,
            (None, Some(target)) => {
                scaler
                    .resize(&stream, target, request.min_shards, request.max_shards)
                    .await
            }
            (None, None) => {
                return Ok(reply(
                    StatusCode::BAD_REQUEST,
                    ApiResponse::<ScalingReport> {
                        success: false,
                        data: None,
                        error: Some("resize requires count or shardId".to_string()),
                    },
                ));
            }
        },
        ScalingAction::Report => scaler.report_for(&stream).await,
    };

    match result {
        Ok(report) => Ok(reply(StatusCode::OK, ok_response(report))),
        Err(ShardScaleError::AlreadyAtMinimum(_)) => {
            let current = scaler.open_shard_count(&stream).await.unwrap_or(1);
            Ok(reply(
                StatusCode::OK,
                ok_response(ScalingReport::already_at_minimum(&stream, current)),
            ))
        }
        Err(error) => Ok(error_reply(&stream, error)),
    }
}

fn ok_response(report: ScalingReport) -> ApiResponse<ScalingReport> {
    ApiResponse {
        success: true,
        data: Some(report),
        error: None,
    }
}

fn error_reply(
    stream: &str,
    error: ShardScaleError,
) -> warp::reply::WithStatus<warp::reply::Json> {
    error!(stream, %error, "admin API operation failed");
    let code = match error {
        ShardScaleError::StreamNotFound(_) | ShardScaleError::ShardNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ShardScaleError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reply(
        code,
        ApiResponse::<ScalingReport> {
            success: false,
            data: None,
            error: Some(error.to_string()),
        },
    )
}

fn reply<T: Serialize>(
    code: StatusCode,
    body: ApiResponse<T>,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&body), code)
}
