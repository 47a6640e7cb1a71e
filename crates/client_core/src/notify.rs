//! Desktop-style alerts for pushed messages.

use async_trait::async_trait;
use shared::domain::{Chat, Message};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
}

impl Notification {
    pub fn for_message(chat: &Chat, message: &Message) -> Self {
        Self {
            title: chat.display_name.clone(),
            body: message.text.clone(),
            icon: chat.avatar_ref.clone(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, chat: &Chat, message: &Message);
}

/// Where granted notifications end up.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, notification: Notification);
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _chat: &Chat, _message: &Message) {}
}

pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn show(&self, notification: Notification) {
        info!(
            title = %notification.title,
            body = %notification.body,
            "new message"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Undecided,
    Granted,
    Denied,
}

/// Holds notifications back until the operator has granted or denied them.
pub struct PermissionGate<S> {
    sink: S,
    permission: watch::Sender<Permission>,
}

impl<S: NotificationSink> PermissionGate<S> {
    pub fn new(sink: S, permission: Permission) -> Self {
        let (permission, _) = watch::channel(permission);
        Self { sink, permission }
    }

    pub fn decide(&self, granted: bool) {
        let decision = if granted {
            Permission::Granted
        } else {
            Permission::Denied
        };
        self.permission.send_replace(decision);
    }

    pub fn permission(&self) -> Permission {
        *self.permission.borrow()
    }
}

#[async_trait]
impl<S: NotificationSink> Notifier for PermissionGate<S> {
    async fn notify(&self, chat: &Chat, message: &Message) {
        let mut permission = self.permission.subscribe();
        let decided = match permission
            .wait_for(|permission| *permission != Permission::Undecided)
            .await
        {
            Ok(decided) => *decided,
            Err(_) => return,
        };
        if decided == Permission::Granted {
            self.sink.show(Notification::for_message(chat, message)).await;
        }
    }
}
