//! HTTP control endpoint (Axum)
//!
//! Thin layer over `DroneController`: every handler turns its request into
//! one controller call. Domain failures answer 200 with `success: false`;
//! only malformed requests get a 4xx.

use super::response::ControlResponse;
use crate::command::{DroneController, Request};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use tello_link_shared::{now_ms, Command, CommandKind, DroneError, MoveDirection, RotateDirection};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Header naming the agent or tool behind a request
pub const CALLER_HEADER: &str = "x-caller-id";

const DEFAULT_CALLER: &str = "http";

/// Application state shared across all HTTP handlers
#[derive(Clone)]
pub struct ApiState {
    pub controller: DroneController,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallOptions {
    /// Fail with `busy` instead of waiting behind other commands
    #[serde(default)]
    pub nowait: bool,
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub direction: String,
    pub distance: i64,
}

#[derive(Debug, Deserialize)]
pub struct RotateBody {
    pub direction: String,
    pub degrees: i64,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/battery", get(battery))
        .route("/takeoff", post(takeoff))
        .route("/land", post(land))
        .route("/emergency", post(emergency))
        .route("/move", post(move_drone))
        .route("/rotate", post(rotate))
        .route("/video/start", post(video_start))
        .route("/video/stop", post(video_stop))
        .route("/video/frame", get(video_frame))
        .with_state(state)
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    controller: DroneController,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP endpoint {}", addr))?;
    info!("HTTP control endpoint listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(ApiState { controller }))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server")?;
    Ok(())
}

fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CALLER)
        .to_string()
}

async fn run(
    state: &ApiState,
    headers: &HeaderMap,
    options: &CallOptions,
    build: impl FnOnce(&str) -> Request,
) -> Json<ControlResponse> {
    let caller = caller_id(headers);
    let request = build(&caller);
    let result = if options.nowait {
        state.controller.try_execute(request, &caller).await
    } else {
        state.controller.execute(request, &caller).await
    };
    Json(ControlResponse::from_outcome(result))
}

fn drone(kind: CommandKind) -> impl FnOnce(&str) -> Request {
    move |caller: &str| Request::Drone(Command::new(kind, caller))
}

fn bad_request(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ControlResponse::bad_request(rejection.body_text())),
    )
        .into_response()
}

fn domain_failure(err: DroneError) -> Response {
    Json(ControlResponse::failure(&err)).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "tello-link",
        "timestamp_ms": now_ms(),
    }))
}

async fn status(State(state): State<ApiState>) -> Json<ControlResponse> {
    let report = state.controller.status().await;
    Json(ControlResponse::ok("status", report))
}

async fn connect(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, |_| Request::Connect).await
}

async fn disconnect(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, |_| Request::Disconnect).await
}

async fn battery(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, drone(CommandKind::Query)).await
}

async fn takeoff(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, drone(CommandKind::Takeoff)).await
}

async fn land(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, drone(CommandKind::Land)).await
}

async fn emergency(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, drone(CommandKind::Emergency)).await
}

fn to_u32(value: i64, what: &str) -> Result<u32, DroneError> {
    u32::try_from(value)
        .map_err(|_| DroneError::invalid_parameter(format!("{} {} out of range", what, value)))
}

async fn move_drone(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
    body: Result<Json<MoveBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(rejection),
    };
    let kind = match (
        body.direction.parse::<MoveDirection>(),
        to_u32(body.distance, "distance"),
    ) {
        (Ok(direction), Ok(distance_cm)) => CommandKind::Move {
            direction,
            distance_cm,
        },
        (Err(e), _) | (_, Err(e)) => return domain_failure(e),
    };
    run(&state, &headers, &options, drone(kind)).await.into_response()
}

async fn rotate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
    body: Result<Json<RotateBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(rejection),
    };
    let kind = match (
        body.direction.parse::<RotateDirection>(),
        to_u32(body.degrees, "degrees"),
    ) {
        (Ok(direction), Ok(degrees)) => CommandKind::Rotate { direction, degrees },
        (Err(e), _) | (_, Err(e)) => return domain_failure(e),
    };
    run(&state, &headers, &options, drone(kind)).await.into_response()
}

async fn video_start(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, |_| Request::VideoStart).await
}

async fn video_stop(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(options): Query<CallOptions>,
) -> Json<ControlResponse> {
    run(&state, &headers, &options, |_| Request::VideoStop).await
}

async fn video_frame(State(state): State<ApiState>) -> Json<ControlResponse> {
    match state.controller.video_frame().await {
        Ok(frame) => Json(ControlResponse::ok("frame", frame)),
        Err(e) => Json(ControlResponse::failure(&e)),
    }
}
