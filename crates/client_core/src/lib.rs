use async_trait::async_trait;
use shared::domain::{Bot, BotId, ChatId, ChatPage, MailingStatus, Message, MessagePage};

pub mod conversation;
pub mod drafts;
pub mod error;
pub mod format;
pub mod mailing;
pub mod notify;
pub mod realtime;
pub mod reconcile;
pub mod rest;

pub use conversation::{ConversationView, ViewSnapshot};
pub use drafts::{Draft, DraftCache};
pub use error::{ClientError, ClientResult};
pub use mailing::MailingController;
pub use notify::{LogSink, NoopNotifier, Notifier, Permission, PermissionGate};
pub use realtime::{ConnectionState, RealtimeClient, RealtimeConfig, Subscription};
pub use rest::ApiClient;

/// A file queued for upload with a message or a mailing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// The console endpoints the synchronisation layer depends on.
#[async_trait]
pub trait ConsoleApi: Send + Sync {
    async fn bots(&self) -> ClientResult<Vec<Bot>>;
    async fn chats(&self, bot_id: BotId, offset: u64, limit: u64) -> ClientResult<ChatPage>;
    async fn messages(&self, chat_id: ChatId, offset: u64, limit: u64)
        -> ClientResult<MessagePage>;
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        attachment: Option<Attachment>,
    ) -> ClientResult<Message>;
    async fn set_read(&self, chat_id: ChatId) -> ClientResult<()>;
    async fn start_mailing(
        &self,
        bot_id: BotId,
        text: &str,
        user_count: u64,
        attachment: Option<Attachment>,
    ) -> ClientResult<bool>;
    async fn mailing_status(&self, bot_id: BotId) -> ClientResult<MailingStatus>;
    async fn stop_mailing(&self, bot_id: BotId) -> ClientResult<bool>;
}

#[cfg(test)]
#[path = "tests/fake_api.rs"]
mod fake_api;
