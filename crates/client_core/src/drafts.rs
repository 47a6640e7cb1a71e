use std::collections::HashMap;

use shared::domain::ChatId;

use crate::Attachment;

/// Unsent compose state of one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl Draft {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}

/// Per-chat drafts, kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct DraftCache {
    drafts: HashMap<ChatId, Draft>,
}

impl DraftCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat_id: ChatId) -> Option<&Draft> {
        self.drafts.get(&chat_id)
    }

    pub fn get_or_create(&mut self, chat_id: ChatId) -> &mut Draft {
        self.drafts.entry(chat_id).or_default()
    }

    pub fn store(&mut self, chat_id: ChatId, draft: Draft) {
        self.drafts.insert(chat_id, draft);
    }

    pub fn clear(&mut self, chat_id: ChatId) -> Option<Draft> {
        self.drafts.remove(&chat_id)
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drafts_are_created_lazily_and_isolated() {
        let mut cache = DraftCache::new();
        assert!(cache.get(ChatId(1)).is_none());

        cache.get_or_create(ChatId(1)).text = "hello".into();
        cache.get_or_create(ChatId(2)).text = "world".into();

        assert_eq!(cache.get(ChatId(1)).map(|d| d.text.as_str()), Some("hello"));
        assert_eq!(cache.get(ChatId(2)).map(|d| d.text.as_str()), Some("world"));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.clear(ChatId(1)).map(|d| d.text), Some("hello".to_string()));
        assert_eq!(*cache.get_or_create(ChatId(1)), Draft::default());
    }

    #[test]
    fn whitespace_only_draft_is_empty() {
        let mut draft = Draft {
            text: "  \n".into(),
            attachment: None,
        };
        assert!(draft.is_empty());
        draft.attachment = Some(Attachment {
            filename: "a.png".into(),
            mime_type: Some("image/png".into()),
            bytes: vec![1, 2, 3],
        });
        assert!(!draft.is_empty());
    }
}
