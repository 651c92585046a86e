use serde::Deserialize;

use std::path::PathBuf;
use std::time::Duration;

/// Application settings, read from `Rocket.toml` and `ROCKET_*` variables
/// alongside Rocket's own configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default = "default_remote_path")]
    pub path: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl RemoteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("rtracker.db")
}

fn default_remote_path() -> String {
    "polData".to_string()
}

fn default_poll_interval() -> u64 {
    5
}
