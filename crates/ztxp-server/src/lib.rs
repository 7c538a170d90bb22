//! HTTP adapter for the ZTXP broker and enforcement point.
//!
//! | Route | Body in | Body out |
//! |-------|---------|----------|
//! | `POST /ztxp/evaluate` | `{"tam": {...}}` | decision record, status 200/400/403/500 |
//! | `POST /pep/authorize` | inbound request description | `{"isAuthorized", "context"}` |
//! | `GET /healthz` | - | `{"status": "ok"}` |
//!
//! The adapter holds no protocol logic: status and body both come from
//! [`BrokerResponse`] and [`Pep::authorize`].

pub mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use ztxp_core::pep::{build_broker_client, EVALUATE_PATH};
use ztxp_core::{build_signer, Broker, BrokerResponse, InboundRequest, Pep, ZtxpConfig};

pub const AUTHORIZE_PATH: &str = "/pep/authorize";
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub pep: Arc<Pep>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>, pep: Arc<Pep>) -> Self {
        Self { broker, pep }
    }
}

/// Wire broker, signer and PEP from configuration.
///
/// The signer is built first: with the local backend it creates the key pair
/// the broker's verifier then loads.
pub fn build_state(config: &ZtxpConfig) -> anyhow::Result<AppState> {
    let signer = build_signer(&config.signing).context("failed to build signer")?;
    let broker = Arc::new(Broker::from_config(config)?);
    let client = build_broker_client(&config.pep, broker.clone())
        .context("failed to build broker client")?;
    let pep = Arc::new(Pep::from_config(config, signer, client));

    info!(
        signing = ?config.signing.backend,
        policy = ?config.policy.backend,
        replay_protection = config.broker.replay_protection,
        remote_broker = config.pep.broker_url.is_some(),
        "ztxp state ready"
    );
    Ok(AppState::new(broker, pep))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(healthz))
        .route(EVALUATE_PATH, post(evaluate))
        .route(AUTHORIZE_PATH, post(authorize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `server.bind` and serve until interrupted.
pub async fn serve(config: &ZtxpConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;

    let state = build_state(config)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(addr = %listener.local_addr()?, "ztxp server listening");
    serve_listener(listener, state).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn evaluate(State(st): State<AppState>, body: Bytes) -> Response {
    let now = Utc::now();
    let response = BrokerResponse::from_outcome(st.broker.evaluate_at(now, &body).await, now);
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

async fn authorize(
    State(st): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<InboundRequest>, JsonRejection>,
) -> Response {
    let mut request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "authorize body not an inbound request");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_request" })),
            )
                .into_response();
        }
    };

    if request.source_ip.is_empty() {
        request.source_ip = peer.ip().to_string();
    }

    Json(st.pep.authorize(&request).await).into_response()
}
