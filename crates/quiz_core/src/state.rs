use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{catalog::Catalog, domain::Country, protocol::RoundView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentRound {
    pub country: Country,
    pub image: String,
}

/// Progress of one game. Only the controller mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    /// Country names in the order they were presented.
    pub shown: Vec<String>,
    pub current: Option<CurrentRound>,
    pub revealed: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RoundState {
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Catalog entries not presented yet, in catalog order.
    pub fn available<'a>(&self, catalog: &'a Catalog) -> Vec<&'a Country> {
        let shown: HashSet<&str> = self.shown.iter().map(String::as_str).collect();
        catalog
            .iter()
            .filter(|country| !shown.contains(country.name.as_str()))
            .collect()
    }

    /// Seconds between the first presentation and completion, unrounded.
    pub fn elapsed_secs(&self) -> Option<f64> {
        let (started, finished) = (self.started_at?, self.finished_at?);
        let micros = (finished - started).num_microseconds()?;
        Some(micros as f64 / 1_000_000.0)
    }

    pub(crate) fn present(&mut self, country: Country, image: String, now: DateTime<Utc>) {
        self.shown.push(country.name.clone());
        self.current = Some(CurrentRound { country, image });
        self.revealed = false;
        self.started_at.get_or_insert(now);
    }

    /// Marks completion once every catalog entry has been shown. Returns the
    /// elapsed time the first time only.
    pub(crate) fn complete_if_exhausted(
        &mut self,
        catalog: &Catalog,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        if self.finished_at.is_some() || self.shown.len() != catalog.len() {
            return None;
        }
        self.finished_at = Some(now);
        self.elapsed_secs()
    }

    pub fn view(&self, total: usize) -> RoundView {
        let current = self.current.as_ref();
        RoundView {
            started: self.is_started(),
            image: current.map(|round| round.image.clone()),
            label: current
                .filter(|_| self.revealed)
                .map(|round| round.country.display_name.clone()),
            revealed: self.revealed,
            shown: self.shown.len(),
            total,
            finished: self.is_finished(),
            elapsed_secs: self.elapsed_secs(),
        }
    }
}
