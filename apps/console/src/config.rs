use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use client_core::{ClientResult, RealtimeConfig};
use tracing::warn;

pub const CONFIG_FILE: &str = "botdesk.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub ws_url: Option<String>,
    pub state_db_url: String,
    pub page_size: u64,
    pub mailing_poll_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000".into(),
            ws_url: None,
            state_db_url: "sqlite://./data/botdesk.db".into(),
            page_size: 10,
            mailing_poll_secs: 5,
        }
    }
}

/// Defaults, then `botdesk.toml` (or `path`), then the environment.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    if let Ok(raw) = fs::read_to_string(&path) {
        settings.apply_file(&raw);
    }
    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

impl Settings {
    fn apply_file(&mut self, raw: &str) {
        let file_cfg = match toml::from_str::<HashMap<String, toml::Value>>(raw) {
            Ok(file_cfg) => file_cfg,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable config file");
                return;
            }
        };
        let get = |key: &str| file_cfg.get(key).map(value_string);

        if let Some(v) = get("api_url") {
            self.api_base_url = v;
        }
        if let Some(v) = get("ws_url") {
            self.ws_url = Some(v);
        }
        if let Some(v) = get("state_db") {
            self.state_db_url = v;
        }
        if let Some(v) = get("page_size").and_then(|v| v.parse().ok()) {
            self.page_size = v;
        }
        if let Some(v) = get("mailing_poll_secs").and_then(|v| v.parse().ok()) {
            self.mailing_poll_secs = v;
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BOTDESK_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("APP__API_URL") {
            self.api_base_url = v;
        }

        if let Some(v) = lookup("BOTDESK_WS_URL") {
            self.ws_url = Some(v);
        }
        if let Some(v) = lookup("APP__WS_URL") {
            self.ws_url = Some(v);
        }

        if let Some(v) = lookup("BOTDESK_STATE_DB") {
            self.state_db_url = v;
        }
        if let Some(v) = lookup("APP__STATE_DB") {
            self.state_db_url = v;
        }

        if let Some(v) = lookup("APP__PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.page_size = v;
        }
        if let Some(v) = lookup("APP__MAILING_POLL_SECS").and_then(|v| v.parse().ok()) {
            self.mailing_poll_secs = v;
        }
    }

    /// Command-line flags win over everything else.
    pub fn apply_overrides(
        &mut self,
        api_url: Option<String>,
        ws_url: Option<String>,
        state_db: Option<String>,
    ) {
        if let Some(v) = api_url {
            self.api_base_url = v;
        }
        if let Some(v) = ws_url {
            self.ws_url = Some(v);
        }
        if let Some(v) = state_db {
            self.state_db_url = v;
        }
    }

    pub fn state_db_url(&self) -> String {
        normalize_state_db_url(&self.state_db_url)
    }

    pub fn realtime_config(&self) -> ClientResult<RealtimeConfig> {
        match &self.ws_url {
            Some(url) => Ok(RealtimeConfig::new(url.clone())),
            None => RealtimeConfig::from_api_base(&self.api_base_url),
        }
    }
}

fn value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_state_db_url(raw: &str) -> String {
    let raw = raw.trim();

    if raw.is_empty() {
        return Settings::default().state_db_url;
    }

    if raw.starts_with("sqlite::memory:") || raw.contains("://") {
        return raw.to_string();
    }

    if let Some(path) = raw.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw.replace('\\', "/"))
}
