//! State behind the chats screen for one bot.
//!
//! Every fetch captures a generation number before suspending and only
//! commits its result if the number is unchanged when it resolves, so a slow
//! response for a chat the operator already left is discarded.

use std::sync::Arc;

use shared::{
    domain::{BotId, Chat, ChatId, Message},
    protocol::PushedMessage,
};
use storage::{PersistedStatePatch, SessionStore};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    drafts::{Draft, DraftCache},
    realtime::Subscription,
    reconcile::{ChatList, MessageWindow, Pagination, PAGE_SIZE},
    Attachment, ClientError, ClientResult, ConsoleApi,
};

/// A consistent copy of the view for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub bot: Option<BotId>,
    pub open_chat: Option<ChatId>,
    pub chats: Vec<Chat>,
    pub total_chats: u64,
    pub messages: Vec<Message>,
    pub no_more_history: bool,
    pub loading: bool,
    pub compose: Draft,
}

#[derive(Default)]
struct ViewState {
    bot: Option<BotId>,
    chats: ChatList,
    total_chats: u64,
    chats_generation: u64,
    open: Option<ChatId>,
    generation: u64,
    window: MessageWindow,
    pagination: Pagination,
    loading: bool,
    compose: Draft,
}

pub struct ConversationView {
    api: Arc<dyn ConsoleApi>,
    store: Arc<dyn SessionStore>,
    drafts: Arc<Mutex<DraftCache>>,
    page_size: u64,
    state: Mutex<ViewState>,
}

impl ConversationView {
    pub fn new(
        api: Arc<dyn ConsoleApi>,
        store: Arc<dyn SessionStore>,
        drafts: Arc<Mutex<DraftCache>>,
    ) -> Arc<Self> {
        Self::with_page_size(api, store, drafts, PAGE_SIZE)
    }

    pub fn with_page_size(
        api: Arc<dyn ConsoleApi>,
        store: Arc<dyn SessionStore>,
        drafts: Arc<Mutex<DraftCache>>,
        page_size: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            store,
            drafts,
            page_size: page_size.max(1),
            state: Mutex::new(ViewState::default()),
        })
    }

    /// Picks up the bot selected in a previous session, if any.
    pub async fn restore_bot(&self) -> ClientResult<Option<BotId>> {
        let bot = self.store.load().await?.current_bot;
        self.state.lock().await.bot = bot;
        Ok(bot)
    }

    pub async fn snapshot(&self) -> ViewSnapshot {
        let state = self.state.lock().await;
        ViewSnapshot {
            bot: state.bot,
            open_chat: state.open,
            chats: state.chats.chats().to_vec(),
            total_chats: state.total_chats,
            messages: state.window.messages().to_vec(),
            no_more_history: state.pagination.is_exhausted(),
            loading: state.loading,
            compose: state.compose.clone(),
        }
    }

    /// Switches bots, remembers the choice and reloads the chat list.
    pub async fn switch_bot(&self, bot_id: BotId) -> ClientResult<()> {
        self.store
            .update(PersistedStatePatch::current_bot(bot_id))
            .await?;
        {
            let mut state = self.state.lock().await;
            let mut drafts = self.drafts.lock().await;
            if let Some(previous) = state.open.take() {
                drafts.store(previous, std::mem::take(&mut state.compose));
            }
            state.bot = Some(bot_id);
            state.generation += 1;
            state.window = MessageWindow::new();
            state.pagination.reset();
            state.loading = false;
            state.chats = ChatList::default();
            state.total_chats = 0;
        }
        info!(bot_id = bot_id.0, "switched bot");
        self.load_chats().await
    }

    /// Loads the first page of chats for the current bot.
    pub async fn load_chats(&self) -> ClientResult<()> {
        let (bot_id, generation) = {
            let mut state = self.state.lock().await;
            let Some(bot_id) = state.bot else {
                return Ok(());
            };
            state.chats_generation += 1;
            (bot_id, state.chats_generation)
        };

        let page = self.api.chats(bot_id, 0, self.page_size).await;

        let mut state = self.state.lock().await;
        if state.chats_generation != generation {
            debug!(bot_id = bot_id.0, "discarding stale chat page");
            return Ok(());
        }
        let page = page?;
        state.total_chats = page.count;
        state.chats = ChatList::new(page.chats);
        Ok(())
    }

    /// Opens `chat_id`: parks the outgoing draft, resets pagination, loads the
    /// newest page and restores the incoming draft.
    pub async fn open_chat(&self, chat_id: ChatId) -> ClientResult<()> {
        let generation = {
            let mut state = self.state.lock().await;
            let mut drafts = self.drafts.lock().await;
            if let Some(previous) = state.open {
                drafts.store(previous, std::mem::take(&mut state.compose));
            }
            state.generation += 1;
            state.open = Some(chat_id);
            state.window = MessageWindow::new();
            state.pagination.reset();
            state.loading = true;
            state.compose = drafts.get_or_create(chat_id).clone();
            state.generation
        };

        let page = self.api.messages(chat_id, 0, self.page_size).await;

        let mark_read = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                debug!(chat_id = chat_id.0, "discarding stale history page");
                return Ok(());
            }
            state.loading = false;
            let page = page?;
            state.pagination.record_page(page.messages.len());
            state.window.merge(page.messages);
            if let Some(last) = state.window.last().cloned() {
                state.chats.touch(chat_id, &last);
            }
            let unread = state.window.has_unread();
            if unread {
                state.window.mark_all_read();
                state.chats.mark_read(chat_id);
            }
            unread
        };

        if mark_read {
            self.mark_read_in_background(chat_id);
        }
        Ok(())
    }

    pub async fn close_chat(&self) {
        let mut state = self.state.lock().await;
        let mut drafts = self.drafts.lock().await;
        if let Some(previous) = state.open.take() {
            drafts.store(previous, std::mem::take(&mut state.compose));
        }
        state.generation += 1;
        state.window = MessageWindow::new();
        state.pagination.reset();
        state.loading = false;
    }

    /// Fetches the next older page. Returns whether anything was added.
    pub async fn load_older(&self) -> ClientResult<bool> {
        let (chat_id, generation, offset) = {
            let mut state = self.state.lock().await;
            let Some(chat_id) = state.open else {
                return Ok(false);
            };
            if state.loading {
                return Ok(false);
            }
            let Some(offset) = state.pagination.next_offset(&state.window) else {
                return Ok(false);
            };
            state.loading = true;
            (chat_id, state.generation, offset)
        };

        let page = self.api.messages(chat_id, offset, self.page_size).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(chat_id = chat_id.0, offset, "discarding stale older page");
            return Ok(false);
        }
        state.loading = false;
        let page = page?;
        state.pagination.record_page(page.messages.len());
        if page.messages.is_empty() {
            debug!(chat_id = chat_id.0, "history exhausted");
            return Ok(false);
        }
        state.window.prepend_page(page.messages);
        Ok(true)
    }

    /// Applies a message pushed over the realtime channel.
    pub async fn handle_push(&self, pushed: PushedMessage) {
        let mark_read = {
            let mut state = self.state.lock().await;
            if state.bot != Some(pushed.bot_id) {
                return;
            }
            state.chats.insert_if_missing(pushed.chat);
            state.chats.touch(pushed.chat_id, &pushed.message);
            if state.open != Some(pushed.chat_id) {
                return;
            }
            let mut message = pushed.message;
            let unread = message.unread;
            message.unread = false;
            state.window.append(message);
            if unread {
                state.chats.mark_read(pushed.chat_id);
            }
            unread
        };

        if mark_read {
            self.mark_read_in_background(pushed.chat_id);
        }
    }

    /// Feeds pushed messages into the view until the subscription ends or the
    /// returned task is aborted; dropping the task drops the subscription.
    pub fn attach(self: &Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        let view = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(pushed) = subscription.recv().await {
                view.handle_push(pushed).await;
            }
        })
    }

    pub async fn set_compose_text(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.state.lock().await;
        state.compose.text = text.clone();
        if let Some(chat_id) = state.open {
            self.drafts.lock().await.get_or_create(chat_id).text = text;
        }
    }

    pub async fn set_compose_attachment(&self, attachment: Option<Attachment>) {
        let mut state = self.state.lock().await;
        state.compose.attachment = attachment.clone();
        if let Some(chat_id) = state.open {
            self.drafts.lock().await.get_or_create(chat_id).attachment = attachment;
        }
    }

    pub async fn compose(&self) -> Draft {
        self.state.lock().await.compose.clone()
    }

    /// Sends the open chat's draft. The window only gains the message once
    /// the server has confirmed it; on failure the draft is kept.
    pub async fn send(&self) -> ClientResult<Message> {
        let (chat_id, draft) = {
            let state = self.state.lock().await;
            let Some(chat_id) = state.open else {
                return Err(ClientError::invalid("no chat selected"));
            };
            if state.compose.is_empty() {
                return Err(ClientError::invalid("message is empty"));
            }
            (chat_id, state.compose.clone())
        };

        let message = match self
            .api
            .send_message(chat_id, &draft.text, draft.attachment.clone())
            .await
        {
            Ok(message) => message,
            Err(err) => {
                warn!(chat_id = chat_id.0, error = %err, "message send failed");
                return Err(ClientError::SendFailed(err.to_string()));
            }
        };

        let mut state = self.state.lock().await;
        state.chats.touch(chat_id, &message);
        if state.open == Some(chat_id) {
            state.window.append(message.clone());
            // keep anything typed while the send was in flight
            if state.compose == draft {
                state.compose = Draft::default();
            }
        }
        let mut drafts = self.drafts.lock().await;
        if drafts.get(chat_id).map_or(true, |cached| *cached == draft) {
            drafts.clear(chat_id);
        }
        info!(chat_id = chat_id.0, message_id = message.id.0, "message sent");
        Ok(message)
    }

    fn mark_read_in_background(&self, chat_id: ChatId) {
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(err) = api.set_read(chat_id).await {
                warn!(chat_id = chat_id.0, error = %err, "failed to mark chat read");
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
