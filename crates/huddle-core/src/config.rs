use std::time::Duration;

use url::Url;

use crate::errors::HuddleError;
use crate::settings::Settings;

pub const API_URL_VAR: &str = "HUDDLE_API_URL";
pub const API_REGION_VAR: &str = "HUDDLE_API_REGION";
pub const DISPLAY_NAME_VAR: &str = "HUDDLE_DISPLAY_NAME";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_DISPLAY_NAME: &str = "Attendee";

/// Where and as whom to request session credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub api_url: Url,
    pub region: String,
    pub display_name: String,
}

impl ProvisioningConfig {
    pub fn new(api_url: &str) -> Result<Self, HuddleError> {
        let api_url = Url::parse(api_url)
            .map_err(|e| HuddleError::Config(format!("invalid api url '{api_url}': {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(HuddleError::Config(format!(
                "api url '{api_url}' cannot carry a path"
            )));
        }
        Ok(Self {
            api_url,
            region: DEFAULT_REGION.to_string(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        })
    }

    /// Read `HUDDLE_API_URL`, `HUDDLE_API_REGION` and `HUDDLE_DISPLAY_NAME`.
    pub fn from_env() -> Result<Self, HuddleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HuddleError> {
        let api_url = lookup(API_URL_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| HuddleError::Config(format!("{API_URL_VAR} is not set")))?;
        let mut config = Self::new(api_url.trim())?;
        if let Some(region) = lookup(API_REGION_VAR).filter(|v| !v.trim().is_empty()) {
            config.region = region.trim().to_string();
        }
        if let Some(name) = lookup(DISPLAY_NAME_VAR).filter(|v| !v.trim().is_empty()) {
            config.display_name = name.trim().to_string();
        }
        Ok(config)
    }

    /// Apply user overrides persisted in the settings store.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(name) = settings.display_name.as_ref().filter(|n| !n.is_empty()) {
            self.display_name = name.clone();
        }
        if let Some(region) = settings.region.as_ref().filter(|r| !r.is_empty()) {
            self.region = region.clone();
        }
        self
    }

    /// `<api_url>/join`, keeping any path prefix the service is mounted under.
    pub fn join_url(&self) -> Url {
        let mut url = self.api_url.clone();
        let path = format!("{}/join", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }
}

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_COMMAND_CAPACITY: usize = 32;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tuning for a session controller instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// How long cleanup waits for the engine to confirm `stop()`.
    pub stop_timeout: Duration,
    pub command_capacity: usize,
    pub event_capacity: usize,
    /// Start local video as soon as the session becomes active.
    pub video_enabled_on_join: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            video_enabled_on_join: false,
        }
    }
}

impl ControllerOptions {
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.video_enabled_on_join = settings.video_enabled_on_join;
        self
    }
}
