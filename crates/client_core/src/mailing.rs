//! Broadcast control and progress polling for one bot.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::{BotId, MailingStatus};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{Attachment, ClientError, ClientResult, ConsoleApi};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct MailingController {
    api: Arc<dyn ConsoleApi>,
    bot_id: BotId,
    interval: Duration,
    audience: AtomicU64,
    status: Arc<watch::Sender<MailingStatus>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MailingController {
    pub fn new(api: Arc<dyn ConsoleApi>, bot_id: BotId) -> Self {
        Self::with_interval(api, bot_id, POLL_INTERVAL)
    }

    pub fn with_interval(api: Arc<dyn ConsoleApi>, bot_id: BotId, interval: Duration) -> Self {
        let (status, _) = watch::channel(MailingStatus::Idle);
        Self {
            api,
            bot_id,
            interval,
            audience: AtomicU64::new(0),
            status: Arc::new(status),
            poller: Mutex::new(None),
        }
    }

    pub fn bot_id(&self) -> BotId {
        self.bot_id
    }

    /// Number of chats the bot can reach, as reported by the chat list.
    pub async fn load_audience(&self) -> ClientResult<u64> {
        let page = self.api.chats(self.bot_id, 0, crate::reconcile::PAGE_SIZE).await?;
        self.audience.store(page.count, Ordering::Relaxed);
        Ok(page.count)
    }

    pub fn audience(&self) -> u64 {
        self.audience.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> MailingStatus {
        *self.status.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<MailingStatus> {
        self.status.subscribe()
    }

    pub async fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Fetches the current status; polling follows while a mailing runs.
    pub async fn refresh(&self) -> ClientResult<MailingStatus> {
        let status = self.api.mailing_status(self.bot_id).await?;
        self.status.send_replace(status);
        if status.is_running() {
            self.arm().await;
        } else {
            self.disarm().await;
        }
        Ok(status)
    }

    /// Starts a broadcast to the first `user_count` chats.
    pub async fn start(
        &self,
        text: &str,
        user_count: u64,
        attachment: Option<Attachment>,
    ) -> ClientResult<bool> {
        if text.trim().is_empty() {
            return Err(ClientError::invalid("mailing text is empty"));
        }
        let audience = self.audience();
        if user_count == 0 || user_count > audience {
            return Err(ClientError::invalid(format!(
                "user count must be between 1 and {audience}, got {user_count}"
            )));
        }

        let accepted = self
            .api
            .start_mailing(self.bot_id, text, user_count, attachment)
            .await?;
        if !accepted {
            warn!(bot_id = self.bot_id.0, "mailing start refused");
            return Ok(false);
        }
        info!(bot_id = self.bot_id.0, user_count, "mailing started");
        self.refresh().await?;
        Ok(true)
    }

    pub async fn stop(&self) -> ClientResult<bool> {
        let accepted = self.api.stop_mailing(self.bot_id).await?;
        if accepted {
            info!(bot_id = self.bot_id.0, "mailing stopped");
        } else {
            warn!(bot_id = self.bot_id.0, "mailing stop refused");
        }
        self.refresh().await?;
        Ok(accepted)
    }

    /// Replaces any running poll task with a fresh one.
    async fn arm(&self) {
        let mut poller = self.poller.lock().await;
        if let Some(previous) = poller.take() {
            previous.abort();
        }

        let api = Arc::clone(&self.api);
        let status = Arc::clone(&self.status);
        let bot_id = self.bot_id;
        let period = self.interval;
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match api.mailing_status(bot_id).await {
                    Ok(current) => {
                        status.send_replace(current);
                        if !current.is_running() {
                            debug!(bot_id = bot_id.0, status = current.label(), "mailing poll finished");
                            break;
                        }
                    }
                    Err(err) => warn!(bot_id = bot_id.0, error = %err, "mailing status poll failed"),
                }
            }
        }));
    }

    async fn disarm(&self) {
        if let Some(previous) = self.poller.lock().await.take() {
            previous.abort();
        }
    }
}

impl Drop for MailingController {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/mailing_tests.rs"]
mod tests;
