use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use config::{Config, Environment, File};
use quiz_core::{RoundSettings, DEFAULT_COMPLETION_MESSAGE};
use serde::Deserialize;
use shared::{catalog::Catalog, domain::NoticePosition};

pub const SETTINGS_FILE: &str = "flagquiz.toml";
const ENV_PREFIX: &str = "APP";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_bind: String,
    /// Image endpoint queried with `?countryName=`.
    pub flags_endpoint: String,
    /// Optional TOML catalog replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    pub reveal_delay_ms: u64,
    pub completion_message: String,
    pub notice_duration_ms: u64,
    pub notice_position: NoticePosition,
    /// Sessions untouched for this long are dropped. `0` keeps them forever.
    pub session_idle_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            flags_endpoint: "http://127.0.0.1:3000/api/flags".into(),
            catalog_path: None,
            reveal_delay_ms: 2000,
            completion_message: DEFAULT_COMPLETION_MESSAGE.into(),
            notice_duration_ms: 3000,
            notice_position: NoticePosition::BottomCenter,
            session_idle_secs: 30 * 60,
        }
    }
}

impl Settings {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server_bind
            .parse()
            .with_context(|| format!("invalid server_bind '{}'", self.server_bind))
    }

    pub fn catalog(&self) -> anyhow::Result<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::load(path)
                .with_context(|| format!("failed to load catalog '{}'", path.display())),
            None => Ok(Catalog::flags()),
        }
    }

    pub fn session_idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }

    pub fn round_settings(&self) -> RoundSettings {
        RoundSettings {
            reveal_delay: Duration::from_millis(self.reveal_delay_ms),
            completion_message: self.completion_message.clone(),
            notice_duration: Duration::from_millis(self.notice_duration_ms),
            notice_position: self.notice_position,
        }
    }
}

/// Defaults, then `flagquiz.toml` if present, then `APP__*` variables, then
/// the `SERVER_BIND` shorthand.
pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = read_settings(Path::new(SETTINGS_FILE), Some(app_environment()))?;
    Ok(with_bind_override(settings, std::env::var("SERVER_BIND").ok()))
}

fn app_environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn with_bind_override(mut settings: Settings, server_bind: Option<String>) -> Settings {
    if let Some(v) = server_bind {
        settings.server_bind = v;
    }
    settings
}

fn read_settings(path: &Path, env: Option<Environment>) -> anyhow::Result<Settings> {
    let mut builder = Config::builder().add_source(File::from(path).required(false));
    if let Some(env) = env {
        builder = builder.add_source(env);
    }

    builder
        .build()
        .with_context(|| format!("failed to read settings from '{}'", path.display()))?
        .try_deserialize()
        .context("invalid server settings")
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
