use std::{collections::HashMap, sync::Arc, time::Duration};

use quiz_core::{FlagFetcher, RoundController, RoundDependencies, RoundError, RoundSettings};
use shared::{
    catalog::Catalog,
    domain::SessionId,
    error::{ApiError, ErrorCode},
    protocol::{CreateGameResponse, RoundView, UserIntent},
};
use tokio::{sync::RwLock, time::Instant};
use tracing::{info, warn};

/// Game sessions plus what every new session is built from.
#[derive(Clone)]
pub struct ApiContext {
    pub catalog: Arc<Catalog>,
    pub fetcher: Arc<dyn FlagFetcher>,
    pub round_settings: RoundSettings,
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

struct SessionEntry {
    controller: Arc<RoundController>,
    last_seen: Instant,
}

impl ApiContext {
    pub fn new(
        catalog: Arc<Catalog>,
        fetcher: Arc<dyn FlagFetcher>,
        round_settings: RoundSettings,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            round_settings,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

pub fn round_error(err: RoundError) -> ApiError {
    match err {
        RoundError::Fetch(err) => ApiError::new(ErrorCode::Upstream, err.to_string()),
        other => ApiError::new(ErrorCode::Conflict, other.to_string()),
    }
}

fn unknown_session(session_id: SessionId) -> ApiError {
    ApiError::new(
        ErrorCode::NotFound,
        format!("game session {session_id} not found"),
    )
}

pub async fn create_session(ctx: &ApiContext) -> CreateGameResponse {
    let session_id = SessionId::new_v4();
    let controller = RoundController::new_with_dependencies(
        ctx.catalog.clone(),
        RoundDependencies::new(ctx.fetcher.clone()),
        ctx.round_settings.clone(),
    );
    let view = controller.view().await;

    let active = {
        let mut sessions = ctx.sessions.write().await;
        sessions.insert(
            session_id,
            SessionEntry {
                controller,
                last_seen: Instant::now(),
            },
        );
        sessions.len()
    };
    info!(%session_id, active, "game session created");

    CreateGameResponse { session_id, view }
}

pub async fn find_session(
    ctx: &ApiContext,
    session_id: SessionId,
) -> Result<Arc<RoundController>, ApiError> {
    let mut sessions = ctx.sessions.write().await;
    let entry = sessions
        .get_mut(&session_id)
        .ok_or_else(|| unknown_session(session_id))?;
    entry.last_seen = Instant::now();
    Ok(entry.controller.clone())
}

pub async fn session_view(ctx: &ApiContext, session_id: SessionId) -> Result<RoundView, ApiError> {
    Ok(find_session(ctx, session_id).await?.view().await)
}

pub async fn apply_intent(
    ctx: &ApiContext,
    session_id: SessionId,
    intent: UserIntent,
) -> Result<RoundView, ApiError> {
    let controller = find_session(ctx, session_id).await?;
    controller.apply(intent).await.map_err(|err| {
        warn!(%session_id, intent = intent.as_str(), error = %err, "intent rejected");
        round_error(err)
    })
}

/// Drops a session after restarting it, which cancels any scheduled
/// automatic advance.
pub async fn close_session(ctx: &ApiContext, session_id: SessionId) -> Result<(), ApiError> {
    let entry = ctx
        .sessions
        .write()
        .await
        .remove(&session_id)
        .ok_or_else(|| unknown_session(session_id))?;
    entry.controller.restart().await;
    info!(%session_id, "game session closed");
    Ok(())
}

/// Drops sessions nobody looked up for `max_idle`. A session still held
/// elsewhere (an attached socket, a scheduled advance) is kept.
pub async fn reap_idle_sessions(ctx: &ApiContext, max_idle: Duration) -> usize {
    let now = Instant::now();
    let mut sessions = ctx.sessions.write().await;
    let before = sessions.len();
    sessions.retain(|session_id, entry| {
        let idle = now.duration_since(entry.last_seen) >= max_idle
            && Arc::strong_count(&entry.controller) == 1;
        if idle {
            info!(%session_id, "idle game session dropped");
        }
        !idle
    });
    before - sessions.len()
}

pub async fn session_count(ctx: &ApiContext) -> usize {
    ctx.sessions.read().await.len()
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
