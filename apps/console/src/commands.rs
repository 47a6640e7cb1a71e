//! Subcommand handlers.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use client_core::{
    format::{ellipsize, format_time, mailing_progress},
    Attachment, ConsoleApi, ConversationView, DraftCache, LogSink, MailingController,
    NoopNotifier, Notifier, Permission, PermissionGate, RealtimeClient,
};
use shared::{
    domain::{BotId, Chat, ChatId, FileId, MailingStatus, MediaKind, Message},
    protocol::PushedMessage,
};
use storage::PersistedStatePatch;
use tokio::sync::Mutex;
use tracing::info;

use crate::Console;

const PREVIEW_LEN: usize = 48;

pub async fn login(console: &Console, token: Option<String>, payload: Option<String>) -> Result<()> {
    match (token, payload) {
        (Some(token), _) => {
            console
                .store
                .update(PersistedStatePatch::token(Some(token)))
                .await?;
            println!("token stored");
        }
        (None, Some(payload)) => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("login payload must be JSON")?;
            if console.api.login(&payload).await?.is_none() {
                bail!("login rejected by server");
            }
            println!("logged in");
        }
        (None, None) => bail!("pass --token or --payload"),
    }
    Ok(())
}

pub async fn logout(console: &Console) -> Result<()> {
    console.api.logout().await?;
    println!("logged out");
    Ok(())
}

pub async fn bots(console: &Console) -> Result<()> {
    let current = console.store.load().await?.current_bot;
    for bot in console.api.bots().await? {
        let marker = if Some(bot.id) == current { "*" } else { " " };
        let state = if bot.active { "" } else { " (inactive)" };
        println!("{marker} {:>8}  @{}{state}", bot.id.0, bot.username);
    }
    Ok(())
}

pub async fn use_bot(console: &Console, bot_id: i64) -> Result<()> {
    let bot_id = BotId(bot_id);
    let bots = console.api.bots().await?;
    let Some(bot) = bots.iter().find(|bot| bot.id == bot_id) else {
        bail!("bot {bot_id} is not available to this account");
    };
    let view = new_view(console);
    view.switch_bot(bot_id).await?;
    let snapshot = view.snapshot().await;
    println!("using @{} ({} chats)", bot.username, snapshot.total_chats);
    Ok(())
}

pub async fn chats(console: &Console) -> Result<()> {
    let view = bot_view(console).await?;
    let snapshot = view.snapshot().await;
    println!("{} chats", snapshot.total_chats);
    for chat in &snapshot.chats {
        print_chat(chat);
    }
    Ok(())
}

pub async fn messages(console: &Console, chat_id: i64, pages: u32) -> Result<()> {
    let view = bot_view(console).await?;
    view.open_chat(ChatId(chat_id)).await?;
    for _ in 1..pages {
        if !view.load_older().await? {
            break;
        }
    }

    let snapshot = view.snapshot().await;
    if snapshot.no_more_history {
        println!("(beginning of history)");
    }
    for message in &snapshot.messages {
        print_message(console, message);
    }
    Ok(())
}

pub async fn send(console: &Console, chat_id: i64, text: String, file: Option<PathBuf>) -> Result<()> {
    let view = bot_view(console).await?;
    view.open_chat(ChatId(chat_id)).await?;
    view.set_compose_text(text).await;
    if let Some(path) = file {
        view.set_compose_attachment(Some(load_attachment(&path).await?))
            .await;
    }
    let message = view.send().await?;
    println!("sent message {}", message.id);
    Ok(())
}

pub async fn read(console: &Console, chat_id: i64) -> Result<()> {
    console.api.set_read(ChatId(chat_id)).await?;
    println!("chat {chat_id} marked read");
    Ok(())
}

pub async fn file(console: &Console, file_id: String, out: &Path) -> Result<()> {
    let bytes = console.api.download_file(&FileId(file_id)).await?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("saved {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

pub async fn mailing_status(console: &Console) -> Result<()> {
    let controller = mailing_controller(console).await?;
    let status = controller.refresh().await?;
    print_status(&status);
    Ok(())
}

pub async fn mailing_start(
    console: &Console,
    text: String,
    users: Option<u64>,
    file: Option<PathBuf>,
) -> Result<()> {
    let controller = mailing_controller(console).await?;
    let audience = controller.load_audience().await?;
    let attachment = match file {
        Some(path) => Some(load_attachment(&path).await?),
        None => None,
    };
    if !controller
        .start(&text, users.unwrap_or(audience), attachment)
        .await?
    {
        bail!("server refused to start the mailing");
    }
    print_status(&controller.status());
    Ok(())
}

pub async fn mailing_stop(console: &Console) -> Result<()> {
    let controller = mailing_controller(console).await?;
    if !controller.stop().await? {
        bail!("server refused to stop the mailing");
    }
    print_status(&controller.status());
    Ok(())
}

pub async fn mailing_watch(console: &Console) -> Result<()> {
    let controller = mailing_controller(console).await?;
    let mut updates = controller.watch();
    let status = controller.refresh().await?;
    updates.borrow_and_update();
    print_status(&status);
    if !status.is_running() {
        return Ok(());
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *updates.borrow_and_update();
                print_status(&status);
                if !status.is_running() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

pub async fn listen(console: &Console, chat: Option<i64>, notify: bool) -> Result<()> {
    let notifier: Arc<dyn Notifier> = if notify {
        Arc::new(PermissionGate::new(LogSink, Permission::Granted))
    } else {
        Arc::new(NoopNotifier)
    };
    let realtime = RealtimeClient::new(
        console.settings.realtime_config()?,
        console.store.clone(),
        notifier,
    );
    let mut pushed = realtime.subscribe().await;

    let pump = match chat {
        Some(chat_id) => {
            let view = bot_view(console).await?;
            view.open_chat(ChatId(chat_id)).await?;
            Some(view.attach(realtime.subscribe().await))
        }
        None => None,
    };

    realtime.start().await;
    if !realtime.authorize().await? {
        realtime.shutdown().await;
        bail!("realtime session rejected; run `botdesk login` again");
    }
    info!("listening for messages, press Ctrl-C to stop");

    loop {
        tokio::select! {
            next = pushed.recv() => match next {
                Some(next) => print_pushed(console, &next),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Some(pump) = pump {
        pump.abort();
    }
    realtime.shutdown().await;
    Ok(())
}

fn new_view(console: &Console) -> Arc<ConversationView> {
    ConversationView::with_page_size(
        console.console_api(),
        console.store.clone(),
        Arc::new(Mutex::new(DraftCache::new())),
        console.settings.page_size,
    )
}

async fn bot_view(console: &Console) -> Result<Arc<ConversationView>> {
    let view = new_view(console);
    if view.restore_bot().await?.is_none() {
        return Err(no_bot());
    }
    view.load_chats().await?;
    Ok(view)
}

async fn mailing_controller(console: &Console) -> Result<MailingController> {
    let bot_id = console.store.load().await?.current_bot.ok_or_else(no_bot)?;
    Ok(MailingController::with_interval(
        console.console_api(),
        bot_id,
        Duration::from_secs(console.settings.mailing_poll_secs.max(1)),
    ))
}

fn no_bot() -> anyhow::Error {
    anyhow!("no bot selected; run `botdesk use-bot <id>` first")
}

async fn load_attachment(path: &Path) -> Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read attachment {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();
    let mime_type = mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string());
    Ok(Attachment {
        filename,
        mime_type,
        bytes,
    })
}

fn print_chat(chat: &Chat) {
    let unread = if chat.last_message_unread { "●" } else { " " };
    let who = if chat.last_message_direction.is_inbound() {
        ""
    } else {
        "you: "
    };
    println!(
        "{unread} {:>10}  {:<24} {:>20}  {who}{}",
        chat.id.0,
        ellipsize(&chat.display_name, 24),
        format_time(chat.last_message_at, Utc::now()),
        ellipsize(&chat.last_message_text, PREVIEW_LEN),
    );
}

fn print_message(console: &Console, message: &Message) {
    let who = if message.direction.is_inbound() {
        "user"
    } else {
        "bot"
    };
    let media = match &message.media {
        Some(media) => {
            let kind = match media.kind {
                MediaKind::Image => "image",
                MediaKind::Video => "video",
            };
            format!(" [{kind}: {}]", console.api.file_url(&media.file_id))
        }
        None => String::new(),
    };
    println!(
        "[{}] {who}: {}{media}",
        format_time(message.timestamp, Utc::now()),
        message.text
    );
}

fn print_pushed(console: &Console, pushed: &PushedMessage) {
    print!("{} ({}) ", pushed.chat.display_name, pushed.chat_id);
    print_message(console, &pushed.message);
}

fn print_status(status: &MailingStatus) {
    let now = Utc::now();
    let started = status
        .started_at()
        .map(|ts| format_time(ts, now))
        .unwrap_or_else(|| "-".into());
    let stopped = status
        .stopped_at()
        .map(|ts| format_time(ts, now))
        .unwrap_or_else(|| "-".into());
    println!(
        "mailing {}: {} (started {started}, stopped {stopped})",
        status.label(),
        mailing_progress(status)
    );
}
