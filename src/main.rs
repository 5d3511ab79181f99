//! tollgate HTTP server: `POST /validate`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;
use tollgate::{spawn_idle_sweeper, Gate, GateReply, LimiterConfig, TokenBucket, ValidateRequest};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ENV_ADDR: &str = "TOLLGATE_ADDR";
const ENV_IDLE_TTL_SECS: &str = "TOLLGATE_IDLE_TTL_SECS";
const DEFAULT_ADDR: &str = "0.0.0.0:8000";

/// Process-level settings on top of [`LimiterConfig`].
#[derive(Debug, Clone)]
struct ServerConfig {
    addr: SocketAddr,
    limiter: LimiterConfig,
    idle_ttl: Option<Duration>,
}

impl ServerConfig {
    fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let raw_addr = std::env::var(ENV_ADDR).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let addr: SocketAddr = raw_addr
            .parse()
            .map_err(|e| format!("{ENV_ADDR} has invalid value {raw_addr:?}: {e}"))?;
        let idle_ttl = match std::env::var(ENV_IDLE_TTL_SECS) {
            Ok(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| format!("{ENV_IDLE_TTL_SECS} has invalid value {raw:?}: {e}"))?;
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };
        Ok(Self { addr, limiter: LimiterConfig::from_env()?, idle_ttl })
    }
}

fn render(reply: GateReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(reply.body)).into_response();
    if let Some(secs) = reply.retry_after_secs {
        response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

async fn validate(
    State(gate): State<Gate<TokenBucket>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => render(gate.handle(request, peer.ip())),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "invalid request body");
            render(GateReply::invalid_request())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Invalid limiter settings stop the process before the listener exists.
    let config = ServerConfig::from_env()?;
    info!(
        capacity = config.limiter.capacity(),
        refill_rate = config.limiter.refill_rate(),
        "limiter configured"
    );

    let limiter = TokenBucket::in_memory(config.limiter);
    let _sweeper = config.idle_ttl.map(|ttl| {
        let every = (ttl / 2).max(Duration::from_secs(1));
        info!(idle_ttl = ?ttl, every = ?every, "idle sweeper enabled");
        spawn_idle_sweeper(limiter.clone(), every, ttl)
    });

    let app = Router::new()
        .route("/validate", post(validate))
        .with_state(Gate::new(limiter))
        .layer(CatchPanicLayer::custom(|_: Box<dyn Any + Send + 'static>| {
            render(GateReply::internal_error())
        }))
        .layer(TraceLayer::new_for_http());

    info!(addr = %config.addr, "starting tollgate");
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
