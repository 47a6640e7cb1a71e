use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(BotId);
id_newtype!(ChatId);
id_newtype!(MessageId);

/// Server-side file handle; opaque string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Written by the end user to the bot.
    Inbound,
    /// Written by an operator through the bot.
    Outbound,
}

impl Direction {
    pub fn from_wire(from_user: bool) -> Self {
        if from_user {
            Self::Inbound
        } else {
            Self::Outbound
        }
    }

    pub fn is_inbound(self) -> bool {
        self == Self::Inbound
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub username: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub display_name: String,
    pub username: String,
    pub last_message_text: String,
    pub last_message_at: DateTime<Utc>,
    pub last_message_direction: Direction,
    pub last_message_unread: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub direction: Direction,
    pub unread: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPage {
    pub count: u64,
    pub chats: Vec<Chat>,
}

/// A page of history, already in ascending timestamp order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub count: u64,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MailingStatus {
    Idle,
    Running {
        processed: u64,
        total: u64,
        started_at: DateTime<Utc>,
    },
    Stopped {
        processed: u64,
        total: u64,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
    },
}

impl MailingStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// A stopped mailing that reached every recipient.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Stopped { processed, total, .. } if processed == total)
    }

    pub fn progress(&self) -> Option<(u64, u64)> {
        match *self {
            Self::Idle => None,
            Self::Running {
                processed, total, ..
            }
            | Self::Stopped {
                processed, total, ..
            } => Some((processed, total)),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match *self {
            Self::Idle => None,
            Self::Running { started_at, .. } | Self::Stopped { started_at, .. } => {
                Some(started_at)
            }
        }
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        match *self {
            Self::Stopped { stopped_at, .. } => Some(stopped_at),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::Stopped { .. } if self.is_completed() => "completed",
            Self::Stopped { .. } => "stopped",
        }
    }
}
