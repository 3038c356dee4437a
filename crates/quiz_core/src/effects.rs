//! Side-effect collaborators the controller drives but never reads back.

use chrono::{DateTime, Utc};
use shared::protocol::CompletionNotice;
use tracing::{debug, info};

pub trait CompletionNotifier: Send + Sync {
    fn notify(&self, notice: &CompletionNotice);
}

pub trait Celebration: Send + Sync {
    fn activate(&self);
    fn deactivate(&self);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct TracingNotifier;

impl CompletionNotifier for TracingNotifier {
    fn notify(&self, notice: &CompletionNotice) {
        info!(
            message = %notice.message,
            duration_ms = notice.duration_ms,
            position = ?notice.position,
            elapsed_secs = notice.elapsed_secs,
            "game completed"
        );
    }
}

pub struct NoopCelebration;

impl Celebration for NoopCelebration {
    fn activate(&self) {
        debug!("celebration activated");
    }

    fn deactivate(&self) {
        debug!("celebration deactivated");
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
