//! Merging of history pages, pushed messages and local sends.

use std::collections::HashSet;

use shared::domain::{Chat, ChatId, Message, MessageId};

/// History and chat pages are requested in chunks of this size.
pub const PAGE_SIZE: u64 = 10;

/// The loaded slice of one chat's history.
///
/// Always holds each message id once, ordered by ascending timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageWindow {
    messages: Vec<Message>,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut window = Self::new();
        window.merge(messages);
        window
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|message| message.id == id)
    }

    /// Folds `incoming` into the window. The copy already loaded wins over a
    /// later duplicate; equal timestamps keep arrival order.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) {
        let mut seen = HashSet::with_capacity(self.messages.len());
        let mut merged = Vec::with_capacity(self.messages.len());
        for message in self.messages.drain(..).chain(incoming) {
            if seen.insert(message.id) {
                merged.push(message);
            }
        }
        merged.sort_by_key(|message| message.timestamp);
        self.messages = merged;
    }

    /// A live or locally sent message.
    pub fn append(&mut self, message: Message) {
        self.merge(std::iter::once(message));
    }

    /// An older history page from backward pagination.
    pub fn prepend_page(&mut self, page: Vec<Message>) {
        self.merge(page);
    }

    pub fn has_unread(&self) -> bool {
        self.messages.iter().any(|message| message.unread)
    }

    pub fn mark_all_read(&mut self) {
        for message in &mut self.messages {
            message.unread = false;
        }
    }
}

/// Backward pagination cursor for one open chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    exhausted: bool,
}

impl Pagination {
    pub fn reset(&mut self) {
        self.exhausted = false;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Offset of the next older page, `None` once history ran out.
    pub fn next_offset(&self, window: &MessageWindow) -> Option<u64> {
        if self.exhausted {
            None
        } else {
            Some(window.len() as u64)
        }
    }

    pub fn record_page(&mut self, page_len: usize) {
        if page_len == 0 {
            self.exhausted = true;
        }
    }
}

/// Chat summaries, most recent activity first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatList {
    chats: Vec<Chat>,
}

impl ChatList {
    pub fn new(chats: Vec<Chat>) -> Self {
        let mut list = Self { chats };
        list.sort();
        list
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn get(&self, chat_id: ChatId) -> Option<&Chat> {
        self.chats.iter().find(|chat| chat.id == chat_id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Adds a chat first seen through a push event. Returns whether it was new.
    pub fn insert_if_missing(&mut self, chat: Chat) -> bool {
        if self.get(chat.id).is_some() {
            return false;
        }
        self.chats.insert(0, chat);
        self.sort();
        true
    }

    /// Records `message` as the chat's latest activity and resorts.
    pub fn touch(&mut self, chat_id: ChatId, message: &Message) -> bool {
        let found = match self.chats.iter_mut().find(|chat| chat.id == chat_id) {
            Some(chat) => {
                chat.last_message_text = message.text.clone();
                chat.last_message_at = message.timestamp;
                chat.last_message_direction = message.direction;
                chat.last_message_unread = message.unread;
                true
            }
            None => false,
        };
        self.sort();
        found
    }

    pub fn mark_read(&mut self, chat_id: ChatId) {
        if let Some(chat) = self.chats.iter_mut().find(|chat| chat.id == chat_id) {
            chat.last_message_unread = false;
        }
    }

    fn sort(&mut self) {
        self.chats
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
