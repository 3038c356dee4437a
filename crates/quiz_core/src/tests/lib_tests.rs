use super::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex as StdMutex,
    },
};

struct StubFetcher {
    fail: AtomicBool,
    delay: Duration,
    calls: StdMutex<Vec<String>>,
}

impl StubFetcher {
    fn ok() -> Self {
        Self {
            fail: AtomicBool::new(false),
            delay: Duration::ZERO,
            calls: StdMutex::new(Vec::new()),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok()
        }
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FlagFetcher for StubFetcher {
    async fn fetch_flag(&self, country_name: &str) -> Result<String, FetchError> {
        self.calls
            .lock()
            .expect("calls")
            .push(country_name.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::new(country_name, "stub failure"));
        }
        Ok(format!(
            "https://flags.test/{}.png",
            country_name.replace(' ', "_")
        ))
    }
}

#[derive(Default)]
struct RecordingEffects {
    notices: StdMutex<Vec<CompletionNotice>>,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl CompletionNotifier for RecordingEffects {
    fn notify(&self, notice: &CompletionNotice) {
        self.notices.lock().expect("notices").push(notice.clone());
    }
}

impl Celebration for RecordingEffects {
    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }

    fn deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }
}

struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            now: StdMutex::new(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp")),
        }
    }

    fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock")
    }
}

struct Harness {
    controller: Arc<RoundController>,
    fetcher: Arc<StubFetcher>,
    effects: Arc<RecordingEffects>,
    clock: Arc<ManualClock>,
}

fn three_countries() -> Catalog {
    Catalog::new(vec![
        Country::new("Peru", "Pérou"),
        Country::new("Chile", "Chili"),
        Country::new("Japan", "Japon"),
    ])
    .expect("catalog")
}

fn harness(catalog: Catalog, fetcher: StubFetcher) -> Harness {
    let fetcher = Arc::new(fetcher);
    let effects = Arc::new(RecordingEffects::default());
    let clock = Arc::new(ManualClock::new());
    let controller = RoundController::new_with_dependencies(
        Arc::new(catalog),
        RoundDependencies {
            fetcher: fetcher.clone(),
            notifier: effects.clone(),
            celebration: effects.clone(),
            clock: clock.clone(),
        },
        RoundSettings::default(),
    );
    Harness {
        controller,
        fetcher,
        effects,
        clock,
    }
}

fn drain(rx: &mut broadcast::Receiver<RoundEvent>) -> Vec<RoundEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn start_presents_one_catalog_country() {
    let h = harness(three_countries(), StubFetcher::ok());

    let advance = h.controller.start().await.expect("start");
    let Advance::Presented(view) = advance else {
        panic!("expected a presented flag, got {advance:?}");
    };
    assert!(view.started);
    assert_eq!(view.shown, 1);
    assert_eq!(view.total, 3);
    assert!(view.label.is_none());
    assert!(view.image.as_deref().unwrap_or_default().starts_with("https://flags.test/"));

    let state = h.controller.snapshot().await;
    let current = state.current.expect("current");
    assert!(h.controller.catalog().contains(&current.country.name));
    assert_eq!(state.shown, vec![current.country.name.clone()]);
    assert!(state.started_at.is_some());
    assert!(state.finished_at.is_none());
    assert!(!state.revealed);
}

#[tokio::test]
async fn start_is_rejected_once_started_and_next_before_start() {
    let h = harness(three_countries(), StubFetcher::ok());

    let err = h.controller.next().await.expect_err("not started");
    assert!(matches!(err, RoundError::NotStarted));

    h.controller.start().await.expect("start");
    let err = h.controller.start().await.expect_err("already started");
    assert!(matches!(err, RoundError::AlreadyStarted));
    assert!(err.is_precondition());
    assert_eq!(h.controller.snapshot().await.shown.len(), 1);
}

#[tokio::test]
async fn three_country_game_completes_once_and_further_draws_are_noops() {
    let h = harness(three_countries(), StubFetcher::ok());
    let mut rx = h.controller.subscribe_events();

    h.controller.start().await.expect("start");
    h.clock.advance(chrono::Duration::milliseconds(750));
    h.controller.next().await.expect("second");
    h.clock.advance(chrono::Duration::milliseconds(750));
    let advance = h.controller.next().await.expect("third");

    let Advance::Presented(view) = advance else {
        panic!("expected last flag to be presented, got {advance:?}");
    };
    assert_eq!(view.shown, 3);
    assert!(view.finished);
    assert_eq!(view.elapsed_secs, Some(1.5));
    assert_eq!(view.elapsed_label().as_deref(), Some("1.50"));

    let state = h.controller.snapshot().await;
    let unique: HashSet<_> = state.shown.iter().collect();
    assert_eq!(unique.len(), 3);
    assert!(state.started_at <= state.finished_at);

    let advance = h.controller.next().await.expect("fourth");
    assert!(matches!(advance, Advance::Exhausted(ref view) if view.shown == 3));
    assert_eq!(h.controller.snapshot().await.finished_at, state.finished_at);

    let notices = h.effects.notices.lock().expect("notices").clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, DEFAULT_COMPLETION_MESSAGE);
    assert_eq!(notices[0].duration_ms, 3000);
    assert_eq!(notices[0].position, NoticePosition::BottomCenter);
    assert_eq!(h.effects.activations.load(Ordering::SeqCst), 1);

    let completed = drain(&mut rx)
        .into_iter()
        .filter(|event| matches!(event, RoundEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn full_catalog_is_drawn_without_repeats() {
    let catalog = Catalog::flags();
    let total = catalog.len();
    let h = harness(catalog, StubFetcher::ok());

    h.controller.start().await.expect("start");
    let mut previous = 1;
    for _ in 1..total {
        let state = h.controller.snapshot().await;
        assert!(state.finished_at.is_none());
        h.controller.next().await.expect("next");
        let shown = h.controller.snapshot().await.shown.len();
        assert_eq!(shown, previous + 1);
        previous = shown;
    }

    let state = h.controller.snapshot().await;
    let unique: HashSet<_> = state.shown.iter().collect();
    assert_eq!(unique.len(), total);
    assert!(state.available(h.controller.catalog()).is_empty());
    assert!(state.finished_at.is_some());

    let advance = h.controller.next().await.expect("exhausted");
    assert!(matches!(advance, Advance::Exhausted(_)));
    assert_eq!(h.controller.snapshot().await.shown.len(), total);
    assert_eq!(h.fetcher.calls.lock().expect("calls").len(), total);
}

#[tokio::test]
async fn failed_start_leaves_state_untouched_until_user_retries() {
    let h = harness(three_countries(), StubFetcher::ok());
    let mut rx = h.controller.subscribe_events();
    h.fetcher.set_failing(true);

    let err = h.controller.start().await.expect_err("fetch failure");
    assert!(matches!(err, RoundError::Fetch(_)));
    assert!(!err.is_precondition());
    assert_eq!(h.controller.snapshot().await, RoundState::default());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [RoundEvent::FetchFailed { .. }]
    ));

    h.fetcher.set_failing(false);
    h.controller.start().await.expect("retry succeeds");
    assert_eq!(h.controller.snapshot().await.shown.len(), 1);
}

#[tokio::test]
async fn failed_next_keeps_current_round() {
    let h = harness(three_countries(), StubFetcher::ok());
    h.controller.start().await.expect("start");
    let before = h.controller.snapshot().await;

    h.fetcher.set_failing(true);
    let err = h.controller.next().await.expect_err("fetch failure");
    assert!(matches!(err, RoundError::Fetch(ref e) if e.reason == "stub failure"));
    assert_eq!(h.controller.snapshot().await, before);
}

#[tokio::test]
async fn reveal_requires_an_unrevealed_current_flag() {
    let h = harness(three_countries(), StubFetcher::ok());

    let err = h.controller.reveal().await.expect_err("nothing shown");
    assert!(matches!(err, RoundError::NothingToReveal));

    h.controller.start().await.expect("start");
    let view = h.controller.reveal().await.expect("reveal");
    assert!(view.revealed);
    let current = h.controller.snapshot().await.current.expect("current");
    assert_eq!(view.label, Some(current.country.display_name));

    let err = h.controller.reveal().await.expect_err("already revealed");
    assert!(matches!(err, RoundError::AlreadyRevealed));
}

#[tokio::test(start_paused = true)]
async fn reveal_advances_exactly_once_after_delay() {
    let h = harness(three_countries(), StubFetcher::ok());
    h.controller.start().await.expect("start");
    h.controller.reveal().await.expect("reveal");

    tokio::time::sleep(Duration::from_millis(1900)).await;
    let state = h.controller.snapshot().await;
    assert_eq!(state.shown.len(), 1);
    assert!(state.revealed);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = h.controller.snapshot().await;
    assert_eq!(state.shown.len(), 2);
    assert!(!state.revealed);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.controller.snapshot().await.shown.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reveal_on_last_flag_does_not_advance_past_completion() {
    let h = harness(three_countries(), StubFetcher::ok());
    h.controller.start().await.expect("start");
    h.controller.next().await.expect("second");
    h.controller.next().await.expect("third");
    let finished_at = h.controller.snapshot().await.finished_at;

    let view = h.controller.reveal().await.expect("reveal last");
    assert!(view.finished);
    assert!(view.elapsed_secs.is_some());

    tokio::time::sleep(Duration::from_secs(3)).await;
    let state = h.controller.snapshot().await;
    assert_eq!(state.shown.len(), 3);
    assert_eq!(state.finished_at, finished_at);
    assert_eq!(h.effects.notices.lock().expect("notices").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reveal_chain_completes_small_catalog() {
    let catalog = Catalog::new(vec![
        Country::new("Malta", "Malte"),
        Country::new("Egypt", "Égypte"),
    ])
    .expect("catalog");
    let h = harness(catalog, StubFetcher::ok());
    let mut rx = h.controller.subscribe_events();

    h.controller.start().await.expect("start");
    h.controller.reveal().await.expect("reveal");
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let view = h.controller.view().await;
    assert!(view.finished);
    assert_eq!(view.progress_label(), "2 / 2");

    let kinds: Vec<_> = drain(&mut rx)
        .into_iter()
        .map(|event| match event {
            RoundEvent::Presented { .. } => "presented",
            RoundEvent::Revealed { .. } => "revealed",
            RoundEvent::Completed { .. } => "completed",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, ["presented", "revealed", "presented", "completed"]);
}

#[tokio::test(start_paused = true)]
async fn restart_cancels_pending_advance() {
    let h = harness(three_countries(), StubFetcher::ok());
    h.controller.start().await.expect("start");
    h.controller.reveal().await.expect("reveal");

    let view = h.controller.restart().await;
    assert!(!view.started);
    assert_eq!(view.shown, 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.controller.snapshot().await, RoundState::default());
    assert_eq!(h.fetcher.calls.lock().expect("calls").len(), 1);
    assert_eq!(h.effects.deactivations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn restart_discards_in_flight_fetch() {
    let h = harness(three_countries(), StubFetcher::slow(Duration::from_secs(1)));
    h.controller.start().await.expect("start");

    let controller = h.controller.clone();
    let pending = tokio::spawn(async move { controller.next().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.controller.restart().await;

    let advance = pending.await.expect("join").expect("next");
    assert_eq!(advance, Advance::Superseded);
    assert_eq!(h.controller.snapshot().await, RoundState::default());
}

#[tokio::test(start_paused = true)]
async fn concurrent_draws_commit_only_once() {
    let h = harness(three_countries(), StubFetcher::slow(Duration::from_millis(100)));
    h.controller.start().await.expect("start");

    let (first, second) = tokio::join!(h.controller.next(), h.controller.next());
    let outcomes = [first.expect("first"), second.expect("second")];
    let presented = outcomes
        .iter()
        .filter(|advance| matches!(advance, Advance::Presented(_)))
        .count();
    assert_eq!(presented, 1);
    assert!(outcomes.contains(&Advance::Superseded));
    assert_eq!(h.controller.snapshot().await.shown.len(), 2);
}

#[tokio::test]
async fn restart_resets_finished_game_and_allows_a_new_one() {
    let h = harness(three_countries(), StubFetcher::ok());
    for intent in [UserIntent::Start, UserIntent::Advance, UserIntent::Advance] {
        h.controller.apply(intent).await.expect("intent");
    }
    assert!(h.controller.view().await.finished);

    let view = h.controller.apply(UserIntent::Restart).await.expect("restart");
    assert_eq!(view, RoundState::default().view(3));
    assert_eq!(h.controller.snapshot().await, RoundState::default());
    assert_eq!(h.effects.deactivations.load(Ordering::SeqCst), 1);

    for intent in [UserIntent::Start, UserIntent::Advance, UserIntent::Advance] {
        h.controller.apply(intent).await.expect("intent");
    }
    assert_eq!(h.effects.notices.lock().expect("notices").len(), 2);
    assert_eq!(h.effects.activations.load(Ordering::SeqCst), 2);
}

#[test]
fn state_view_hides_label_until_revealed_and_elapsed_until_finished() {
    let mut state = RoundState::default();
    let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp");
    state.present(
        Country::new("Chile", "Chili"),
        "https://flags.test/Chile.png".into(),
        now,
    );

    let view = state.view(3);
    assert_eq!(view.label, None);
    assert_eq!(view.elapsed_secs, None);

    state.revealed = true;
    assert_eq!(state.view(3).label.as_deref(), Some("Chili"));
    assert_eq!(state.complete_if_exhausted(&three_countries(), now), None);
}

#[test]
fn elapsed_time_keeps_sub_millisecond_precision() {
    let started = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp");
    let state = RoundState {
        started_at: Some(started),
        finished_at: Some(started + chrono::Duration::microseconds(1_234_567)),
        ..RoundState::default()
    };

    assert_eq!(state.elapsed_secs(), Some(1.234567));
    assert_eq!(state.view(3).elapsed_label().as_deref(), Some("1.23"));
}

/// Completion effects that block inside `notify`, signalling when they are entered.
#[derive(Default)]
struct BlockingEffects {
    entered: tokio::sync::Notify,
    log: StdMutex<Vec<&'static str>>,
}

impl CompletionNotifier for BlockingEffects {
    fn notify(&self, _notice: &CompletionNotice) {
        self.entered.notify_one();
        std::thread::sleep(Duration::from_millis(200));
        self.log.lock().expect("log").push("notify");
    }
}

impl Celebration for BlockingEffects {
    fn activate(&self) {
        self.log.lock().expect("log").push("activate");
    }

    fn deactivate(&self) {
        self.log.lock().expect("log").push("deactivate");
    }
}

fn event_kind(event: &RoundEvent) -> &'static str {
    match event {
        RoundEvent::Snapshot { .. } => "snapshot",
        RoundEvent::Presented { .. } => "presented",
        RoundEvent::Revealed { .. } => "revealed",
        RoundEvent::Completed { .. } => "completed",
        RoundEvent::Restarted { .. } => "restarted",
        RoundEvent::FetchFailed { .. } => "fetch_failed",
        RoundEvent::Error(_) => "error",
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_during_completion_effects_is_ordered_after_them() {
    let catalog = Catalog::new(vec![Country::new("Peru", "Pérou")]).expect("catalog");
    let effects = Arc::new(BlockingEffects::default());
    let controller = RoundController::new_with_dependencies(
        Arc::new(catalog),
        RoundDependencies {
            fetcher: Arc::new(StubFetcher::ok()),
            notifier: effects.clone(),
            celebration: effects.clone(),
            clock: Arc::new(ManualClock::new()),
        },
        RoundSettings::default(),
    );
    let mut rx = controller.subscribe_events();

    let starter = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start().await })
    };
    effects.entered.notified().await;
    controller.restart().await;
    starter.await.expect("join").expect("start");

    assert_eq!(controller.snapshot().await, RoundState::default());
    assert_eq!(
        *effects.log.lock().expect("log"),
        ["notify", "activate", "deactivate"]
    );
    let kinds: Vec<_> = drain(&mut rx).iter().map(event_kind).collect();
    assert_eq!(kinds, ["presented", "completed", "restarted"]);
}
