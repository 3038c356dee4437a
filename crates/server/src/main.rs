use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    async_trait,
    extract::{
        ws::{Message, WebSocket},
        FromRequestParts, Path, State, WebSocketUpgrade,
    },
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use quiz_core::{HttpFlagFetcher, RoundController};
use serde::Serialize;
use shared::{
    domain::{Country, SessionId},
    error::{ApiError, ErrorCode},
    protocol::{CreateGameResponse, RoundEvent, RoundView, UserIntent},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::{
    apply_intent, close_session, create_session, find_session, reap_idle_sessions, round_error,
    session_count, session_view,
};
use app_state::AppState;
use config::load_settings;

const MAX_REQUEST_BYTES: usize = 16 * 1024;
const WS_REPLY_CAPACITY: usize = 16;
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let catalog = settings.catalog()?;
    let fetcher = HttpFlagFetcher::new(&settings.flags_endpoint)
        .with_context(|| format!("invalid flags_endpoint '{}'", settings.flags_endpoint))?;
    info!(
        countries = catalog.len(),
        flags_endpoint = %fetcher.endpoint(),
        "catalog loaded"
    );

    let api = api::ApiContext::new(
        Arc::new(catalog),
        Arc::new(fetcher),
        settings.round_settings(),
    );
    if let Some(max_idle) = settings.session_idle_timeout() {
        spawn_session_sweeper(api.clone(), max_idle);
    }
    let app = build_router(Arc::new(AppState { api }));

    let addr = settings.bind_addr()?;
    info!(%addr, "flag quiz server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/catalog", get(http_catalog))
        .route("/games", post(http_create_game))
        .route(
            "/games/:session_id",
            get(http_game_view).delete(http_close_game),
        )
        .route("/games/:session_id/start", post(http_start))
        .route("/games/:session_id/advance", post(http_advance))
        .route("/games/:session_id/reveal", post(http_reveal))
        .route("/games/:session_id/restart", post(http_restart))
        .route("/games/:session_id/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .with_state(state)
}

fn spawn_session_sweeper(api: api::ApiContext, max_idle: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let reaped = reap_idle_sessions(&api, max_idle).await;
            if reaped > 0 {
                debug!(reaped, "idle game sessions dropped");
            }
        }
    });
}

/// Session id path segment. A malformed id is answered with the usual
/// `ApiError` body instead of axum's plain-text rejection.
struct GamePath(SessionId);

#[async_trait]
impl<S> FromRequestParts<S> for GamePath
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(session_id) = Path::<SessionId>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                http_error(ApiError::new(
                    ErrorCode::Validation,
                    format!("invalid game session id: {}", rejection.body_text()),
                ))
            })?;
        Ok(Self(session_id))
    }
}

fn http_error(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: session_count(&state.api).await,
    })
}

async fn http_catalog(State(state): State<Arc<AppState>>) -> Json<Vec<Country>> {
    Json(state.api.catalog.iter().cloned().collect())
}

async fn http_create_game(State(state): State<Arc<AppState>>) -> Json<CreateGameResponse> {
    Json(create_session(&state.api).await)
}

async fn http_game_view(
    State(state): State<Arc<AppState>>,
    GamePath(session_id): GamePath,
) -> Result<Json<RoundView>, HttpError> {
    let view = session_view(&state.api, session_id)
        .await
        .map_err(http_error)?;
    Ok(Json(view))
}

async fn http_close_game(
    State(state): State<Arc<AppState>>,
    GamePath(session_id): GamePath,
) -> Result<StatusCode, HttpError> {
    close_session(&state.api, session_id)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_intent(
    state: &AppState,
    session_id: SessionId,
    intent: UserIntent,
) -> Result<Json<RoundView>, HttpError> {
    let view = apply_intent(&state.api, session_id, intent)
        .await
        .map_err(http_error)?;
    Ok(Json(view))
}

async fn http_start(
    State(state): State<Arc<AppState>>,
    GamePath(session_id): GamePath,
) -> Result<Json<RoundView>, HttpError> {
    http_intent(&state, session_id, UserIntent::Start).await
}

async fn http_advance(
    State(state): State<Arc<AppState>>,
    GamePath(session_id): GamePath,
) -> Result<Json<RoundView>, HttpError> {
    http_intent(&state, session_id, UserIntent::Advance).await
}

async fn http_reveal(
    State(state): State<Arc<AppState>>,
    GamePath(session_id): GamePath,
) -> Result<Json<RoundView>, HttpError> {
    http_intent(&state, session_id, UserIntent::Reveal).await
}

async fn http_restart(
    State(state): State<Arc<AppState>>,
    GamePath(session_id): GamePath,
) -> Result<Json<RoundView>, HttpError> {
    http_intent(&state, session_id, UserIntent::Restart).await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    GamePath(session_id): GamePath,
) -> Result<impl IntoResponse, HttpError> {
    let controller = find_session(&state.api, session_id)
        .await
        .map_err(http_error)?;
    Ok(ws.on_upgrade(move |socket| ws_connection(controller, socket, session_id)))
}

/// Streams every round event of one session to the socket and applies the
/// intents it sends. Rejected intents are answered on this socket only.
async fn ws_connection(controller: Arc<RoundController>, socket: WebSocket, session_id: SessionId) {
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(controller.subscribe_events());
    let (reply_tx, mut reply_rx) = mpsc::channel::<RoundEvent>(WS_REPLY_CAPACITY);

    let snapshot = RoundEvent::Snapshot {
        view: controller.view().await,
    };
    let _ = reply_tx.send(snapshot).await;
    debug!(%session_id, "ws client attached");

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = reply_rx.recv() => event,
                Some(item) = events.next() => match item {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(%session_id, skipped, "ws client lagging; events dropped");
                        continue;
                    }
                },
                else => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let reply = match serde_json::from_str::<UserIntent>(&text) {
            // Successful transitions reach the client through the broadcast.
            Ok(intent) => match controller.apply(intent).await {
                Ok(_) => continue,
                Err(err) => RoundEvent::Error(round_error(err)),
            },
            Err(err) => RoundEvent::Error(ApiError::new(
                ErrorCode::Validation,
                format!("malformed intent: {err}"),
            )),
        };
        if reply_tx.send(reply).await.is_err() {
            break;
        }
    }

    send_task.abort();
    debug!(%session_id, "ws client detached");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
