use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::warn;

use shared::domain::BotId;

const STATE_KEY: &str = "global";

/// The durable client record: session token and last selected bot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_bot: Option<BotId>,
}

/// Partial update; `None` leaves a field untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedStatePatch {
    pub token: Option<Option<String>>,
    pub current_bot: Option<Option<BotId>>,
}

impl PersistedStatePatch {
    pub fn token(token: Option<String>) -> Self {
        Self {
            token: Some(token),
            ..Self::default()
        }
    }

    pub fn current_bot(bot_id: BotId) -> Self {
        Self {
            current_bot: Some(Some(bot_id)),
            ..Self::default()
        }
    }

    pub fn apply(self, state: &mut PersistedState) {
        if let Some(token) = self.token {
            state.token = token;
        }
        if let Some(current_bot) = self.current_bot {
            state.current_bot = current_bot;
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState>;
    async fn update(&self, patch: PersistedStatePatch) -> Result<PersistedState>;

    async fn token(&self) -> Result<Option<String>> {
        Ok(self.load().await?.token)
    }
}

#[derive(Clone)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
    // held from read through write so patches never interleave
    update_lock: Arc<Mutex<()>>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open client state database {database_url}"))?;
        let storage = Self {
            pool,
            update_lock: Arc::new(Mutex::new(())),
        };
        storage.ensure_state_table().await?;
        Ok(storage)
    }

    async fn ensure_state_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS client_state (
                key        TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure client_state table exists")?;
        Ok(())
    }

    async fn read_raw(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM client_state WHERE key = ?")
            .bind(STATE_KEY)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read client state")?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn write(&self, state: &PersistedState) -> Result<()> {
        let value = serde_json::to_string(state)?;
        sqlx::query(
            "INSERT INTO client_state (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(STATE_KEY)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("failed to write client state")?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn load(&self) -> Result<PersistedState> {
        let Some(raw) = self.read_raw().await? else {
            return Ok(PersistedState::default());
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(err) => {
                warn!(error = %err, "stored client state is malformed; starting empty");
                Ok(PersistedState::default())
            }
        }
    }

    async fn update(&self, patch: PersistedStatePatch) -> Result<PersistedState> {
        let _guard = self.update_lock.lock().await;
        let mut state = self.load().await?;
        patch.apply(&mut state);
        self.write(&state).await?;
        Ok(state)
    }
}

/// Non-durable store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<PersistedState>,
}

impl MemoryStorage {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(PersistedState {
            token: Some(token.into()),
            current_bot: None,
        })
    }
}

#[async_trait]
impl SessionStore for MemoryStorage {
    async fn load(&self) -> Result<PersistedState> {
        Ok(self.state.lock().await.clone())
    }

    async fn update(&self, patch: PersistedStatePatch) -> Result<PersistedState> {
        let mut guard = self.state.lock().await;
        patch.apply(&mut guard);
        Ok(guard.clone())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
