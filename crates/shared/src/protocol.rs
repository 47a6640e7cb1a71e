//! Wire shapes of the console API and the realtime socket.
//!
//! Raw types mirror the JSON exactly (camelCase, timestamps as strings). Each
//! converts into its `domain` counterpart with `TryFrom`, which is where
//! timestamps are normalised.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        Bot, BotId, Chat, ChatId, ChatPage, Direction, FileId, MailingStatus, Media, MediaKind,
        Message, MessageId, MessagePage,
    },
    error::DecodeError,
};

pub const MEDIA_TYPE_IMAGE: u8 = 1;
pub const MEDIA_TYPE_VIDEO: u8 = 2;

/// Parses a server timestamp. RFC 3339 first; naive date-times are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(DecodeError::Timestamp(raw.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOk {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRaw {
    pub id: BotId,
    pub username: String,
    pub active: bool,
}

impl From<BotRaw> for Bot {
    fn from(raw: BotRaw) -> Self {
        Self {
            id: raw.id,
            username: raw.username,
            active: raw.active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRaw {
    #[serde(rename = "type")]
    pub media_type: u8,
    pub id: FileId,
}

impl TryFrom<MediaRaw> for Media {
    type Error = DecodeError;

    fn try_from(raw: MediaRaw) -> Result<Self, Self::Error> {
        let kind = match raw.media_type {
            MEDIA_TYPE_IMAGE => MediaKind::Image,
            MEDIA_TYPE_VIDEO => MediaKind::Video,
            other => return Err(DecodeError::MediaType(other)),
        };
        Ok(Self {
            kind,
            file_id: raw.id,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRaw {
    pub id: MessageId,
    pub timestamp: String,
    pub text: String,
    pub from: bool,
    pub new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRaw>,
}

impl TryFrom<MessageRaw> for Message {
    type Error = DecodeError;

    fn try_from(raw: MessageRaw) -> Result<Self, Self::Error> {
        Ok(Self {
            id: raw.id,
            timestamp: parse_timestamp(&raw.timestamp)?,
            text: raw.text,
            direction: Direction::from_wire(raw.from),
            unread: raw.new,
            media: raw.media.map(Media::try_from).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRaw {
    pub id: ChatId,
    pub first_name: String,
    #[serde(default)]
    pub username: String,
    pub last_message_text: String,
    pub last_message_date: String,
    pub last_message_from: bool,
    pub last_message_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl TryFrom<ChatRaw> for Chat {
    type Error = DecodeError;

    fn try_from(raw: ChatRaw) -> Result<Self, Self::Error> {
        Ok(Self {
            id: raw.id,
            display_name: raw.first_name,
            username: raw.username,
            last_message_text: raw.last_message_text,
            last_message_at: parse_timestamp(&raw.last_message_date)?,
            last_message_direction: Direction::from_wire(raw.last_message_from),
            last_message_unread: raw.last_message_new,
            avatar_ref: raw.avatar_url,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatsRaw {
    pub chats: Vec<ChatRaw>,
    pub count: u64,
}

impl TryFrom<ChatsRaw> for ChatPage {
    type Error = DecodeError;

    fn try_from(raw: ChatsRaw) -> Result<Self, Self::Error> {
        Ok(Self {
            count: raw.count,
            chats: raw
                .chats
                .into_iter()
                .map(Chat::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// History pages arrive newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRaw {
    pub messages: Vec<MessageRaw>,
    pub count: u64,
}

impl TryFrom<MessagesRaw> for MessagePage {
    type Error = DecodeError;

    fn try_from(raw: MessagesRaw) -> Result<Self, Self::Error> {
        let mut messages = raw
            .messages
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(Self {
            count: raw.count,
            messages,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MailingStatusRaw {
    Idle,
    Running {
        processed: u64,
        total: u64,
        started: String,
    },
    Stopped {
        processed: u64,
        total: u64,
        started: String,
        stopped: String,
    },
}

impl TryFrom<MailingStatusRaw> for MailingStatus {
    type Error = DecodeError;

    fn try_from(raw: MailingStatusRaw) -> Result<Self, Self::Error> {
        Ok(match raw {
            MailingStatusRaw::Idle => Self::Idle,
            MailingStatusRaw::Running {
                processed,
                total,
                started,
            } => Self::Running {
                processed,
                total,
                started_at: parse_timestamp(&started)?,
            },
            MailingStatusRaw::Stopped {
                processed,
                total,
                started,
                stopped,
            } => Self::Stopped {
                processed,
                total,
                started_at: parse_timestamp(&started)?,
                stopped_at: parse_timestamp(&stopped)?,
            },
        })
    }
}

/// Frames the client writes to the realtime socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WsEventOut {
    Authorize { token: String },
}

/// Frames the server pushes over the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WsEventIn {
    Authorized,
    Error {
        message: String,
    },
    Message {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        #[serde(rename = "botId")]
        bot_id: BotId,
        message: MessageRaw,
        chat: ChatRaw,
    },
}

pub const WS_UNAUTHORIZED: &str = "unauthorized";

/// A pushed message with its chat summary, normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedMessage {
    pub chat_id: ChatId,
    pub bot_id: BotId,
    pub message: Message,
    pub chat: Chat,
}

impl PushedMessage {
    pub fn from_raw(
        chat_id: ChatId,
        bot_id: BotId,
        message: MessageRaw,
        chat: ChatRaw,
    ) -> Result<Self, DecodeError> {
        Ok(Self {
            chat_id,
            bot_id,
            message: Message::try_from(message)?,
            chat: Chat::try_from(chat)?,
        })
    }
}
