use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use shared::{
    catalog::Catalog,
    domain::{Country, NoticePosition},
    protocol::{format_elapsed, CompletionNotice, RoundEvent, RoundView, UserIntent},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod effects;
pub mod error;
pub mod fetcher;
pub mod state;

pub use effects::{
    Celebration, Clock, CompletionNotifier, NoopCelebration, SystemClock, TracingNotifier,
};
pub use error::{FetchError, RoundError};
pub use fetcher::{FlagFetcher, HttpFlagFetcher};
pub use state::{CurrentRound, RoundState};

pub const DEFAULT_REVEAL_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_COMPLETION_MESSAGE: &str = "BRAVO ALIXE !";
pub const DEFAULT_NOTICE_DURATION: Duration = Duration::from_millis(3000);
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RoundSettings {
    /// How long a revealed answer stays up before the next flag is drawn.
    pub reveal_delay: Duration,
    pub completion_message: String,
    pub notice_duration: Duration,
    pub notice_position: NoticePosition,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            reveal_delay: DEFAULT_REVEAL_DELAY,
            completion_message: DEFAULT_COMPLETION_MESSAGE.to_string(),
            notice_duration: DEFAULT_NOTICE_DURATION,
            notice_position: NoticePosition::default(),
        }
    }
}

impl RoundSettings {
    pub fn completion_notice(&self, elapsed_secs: f64) -> CompletionNotice {
        CompletionNotice {
            message: self.completion_message.clone(),
            duration_ms: self.notice_duration.as_millis() as u64,
            position: self.notice_position,
            elapsed_secs,
        }
    }
}

pub struct RoundDependencies {
    pub fetcher: Arc<dyn FlagFetcher>,
    pub notifier: Arc<dyn CompletionNotifier>,
    pub celebration: Arc<dyn Celebration>,
    pub clock: Arc<dyn Clock>,
}

impl RoundDependencies {
    pub fn new(fetcher: Arc<dyn FlagFetcher>) -> Self {
        Self {
            fetcher,
            notifier: Arc::new(TracingNotifier),
            celebration: Arc::new(NoopCelebration),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Outcome of a transition that draws a new flag.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Presented(RoundView),
    /// Every country has been shown; nothing changed.
    Exhausted(RoundView),
    /// A restart or a concurrent draw committed while the fetch was in flight,
    /// so the fetched flag was dropped.
    Superseded,
}

pub struct RoundController {
    catalog: Arc<Catalog>,
    fetcher: Arc<dyn FlagFetcher>,
    notifier: Arc<dyn CompletionNotifier>,
    celebration: Arc<dyn Celebration>,
    clock: Arc<dyn Clock>,
    settings: RoundSettings,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<RoundEvent>,
}

struct ControllerState {
    round: RoundState,
    /// Bumped on every committed draw and on restart.
    revision: u64,
    /// Bumped on restart only.
    epoch: u64,
    rng: StdRng,
    pending_advances: Vec<JoinHandle<()>>,
}

impl ControllerState {
    fn pick(&mut self, candidates: &[&Country]) -> Country {
        let index = self.rng.gen_range(0..candidates.len());
        candidates[index].clone()
    }
}

impl RoundController {
    pub fn new(catalog: Arc<Catalog>, fetcher: Arc<dyn FlagFetcher>) -> Arc<Self> {
        Self::new_with_dependencies(
            catalog,
            RoundDependencies::new(fetcher),
            RoundSettings::default(),
        )
    }

    pub fn new_with_dependencies(
        catalog: Arc<Catalog>,
        dependencies: RoundDependencies,
        settings: RoundSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            catalog,
            fetcher: dependencies.fetcher,
            notifier: dependencies.notifier,
            celebration: dependencies.celebration,
            clock: dependencies.clock,
            settings,
            inner: Mutex::new(ControllerState {
                round: RoundState::default(),
                revision: 0,
                epoch: 0,
                rng: StdRng::from_entropy(),
                pending_advances: Vec::new(),
            }),
            events,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn settings(&self) -> &RoundSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> RoundState {
        self.inner.lock().await.round.clone()
    }

    pub async fn view(&self) -> RoundView {
        self.inner.lock().await.round.view(self.catalog.len())
    }

    /// Draws the first flag of a game from the whole catalog.
    pub async fn start(&self) -> Result<Advance, RoundError> {
        let (country, revision) = {
            let mut inner = self.inner.lock().await;
            if inner.round.is_started() {
                return Err(RoundError::AlreadyStarted);
            }
            let candidates: Vec<&Country> = self.catalog.iter().collect();
            let country = inner.pick(&candidates);
            (country, inner.revision)
        };

        self.present(country, revision).await
    }

    /// Draws a flag among the countries not shown yet. A no-op once the
    /// catalog is exhausted.
    pub async fn next(&self) -> Result<Advance, RoundError> {
        let (country, revision) = {
            let mut inner = self.inner.lock().await;
            if !inner.round.is_started() {
                return Err(RoundError::NotStarted);
            }
            let available = inner.round.available(&self.catalog);
            if inner.round.is_finished() || available.is_empty() {
                debug!(shown = inner.round.shown.len(), "no flags left to draw");
                return Ok(Advance::Exhausted(inner.round.view(self.catalog.len())));
            }
            let country = inner.pick(&available);
            (country, inner.revision)
        };

        self.present(country, revision).await
    }

    /// Shows the answer now and schedules the next draw after the reveal
    /// delay. Only `restart` cancels the scheduled draw.
    pub async fn reveal(self: &Arc<Self>) -> Result<RoundView, RoundError> {
        let view = {
            let mut inner = self.inner.lock().await;
            if inner.round.current.is_none() {
                return Err(RoundError::NothingToReveal);
            }
            if inner.round.revealed {
                return Err(RoundError::AlreadyRevealed);
            }
            inner.round.revealed = true;

            let epoch = inner.epoch;
            let delay = self.settings.reveal_delay;
            let controller = Arc::clone(self);
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                controller.advance_after_reveal(epoch).await;
            });
            inner.pending_advances.retain(|task| !task.is_finished());
            inner.pending_advances.push(task);

            let view = inner.round.view(self.catalog.len());
            let _ = self.events.send(RoundEvent::Revealed { view: view.clone() });
            view
        };

        Ok(view)
    }

    pub async fn restart(&self) -> RoundView {
        let (view, pending) = {
            let mut inner = self.inner.lock().await;
            inner.epoch += 1;
            inner.revision += 1;
            inner.round = RoundState::default();

            self.celebration.deactivate();
            let view = inner.round.view(self.catalog.len());
            let _ = self.events.send(RoundEvent::Restarted { view: view.clone() });
            (view, std::mem::take(&mut inner.pending_advances))
        };
        for task in pending {
            task.abort();
        }

        info!(total = view.total, "game restarted");
        view
    }

    /// Routes a rendering-surface intent to its transition and returns the
    /// resulting projection.
    pub async fn apply(self: &Arc<Self>, intent: UserIntent) -> Result<RoundView, RoundError> {
        let advance = match intent {
            UserIntent::Start => self.start().await?,
            UserIntent::Advance => self.next().await?,
            UserIntent::Reveal => return self.reveal().await,
            UserIntent::Restart => return Ok(self.restart().await),
        };

        match advance {
            Advance::Presented(view) | Advance::Exhausted(view) => Ok(view),
            Advance::Superseded => Ok(self.view().await),
        }
    }

    async fn present(&self, country: Country, revision: u64) -> Result<Advance, RoundError> {
        let image = match self.fetcher.fetch_flag(&country.name).await {
            Ok(image) => image,
            Err(err) => {
                warn!(country = %country.name, error = %err, "flag fetch failed; round not advanced");
                let _ = self.events.send(RoundEvent::FetchFailed {
                    country: country.name.clone(),
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };

        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if inner.revision != revision {
            debug!(country = %country.name, "discarding stale flag fetch");
            return Ok(Advance::Superseded);
        }
        inner.revision += 1;
        inner.round.present(country, image, now);
        let completed = inner.round.complete_if_exhausted(&self.catalog, now);
        let view = inner.round.view(self.catalog.len());

        // Events and effects go out before the lock is released so a restart
        // is always observed after them.
        debug!(progress = %view.progress_label(), "flag presented");
        let _ = self.events.send(RoundEvent::Presented { view: view.clone() });
        if let Some(elapsed_secs) = completed {
            self.complete(&view, elapsed_secs);
        }
        drop(inner);
        Ok(Advance::Presented(view))
    }

    fn complete(&self, view: &RoundView, elapsed_secs: f64) {
        let notice = self.settings.completion_notice(elapsed_secs);
        info!(
            total = view.total,
            elapsed = %format_elapsed(elapsed_secs),
            "every flag shown"
        );
        self.notifier.notify(&notice);
        self.celebration.activate();
        let _ = self.events.send(RoundEvent::Completed {
            view: view.clone(),
            notice,
        });
    }

    async fn advance_after_reveal(&self, epoch: u64) {
        let current_epoch = self.inner.lock().await.epoch;
        if current_epoch != epoch {
            debug!("game restarted during reveal delay; skipping advance");
            return;
        }

        match self.next().await {
            Ok(Advance::Presented(_)) => {}
            Ok(Advance::Exhausted(_)) => debug!("reveal delay elapsed with no flags left"),
            Ok(Advance::Superseded) => debug!("automatic advance superseded"),
            // Already logged and broadcast at the fetch site.
            Err(RoundError::Fetch(_)) => {}
            Err(err) => debug!(error = %err, "automatic advance skipped"),
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
