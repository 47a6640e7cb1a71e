use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{ApiClient, ConsoleApi};
use storage::{SessionStore, SqliteStorage};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser, Debug)]
#[command(name = "botdesk", about = "Operator console for Telegram bots")]
struct Cli {
    /// Settings file; defaults to ./botdesk.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    ws_url: Option<String>,
    #[arg(long, global = true)]
    state_db: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a session token, or exchange a login widget payload for one.
    Login {
        #[arg(long, conflicts_with = "payload", required_unless_present = "payload")]
        token: Option<String>,
        #[arg(long)]
        payload: Option<String>,
    },
    Logout,
    Bots,
    UseBot {
        bot_id: i64,
    },
    Chats,
    Messages {
        chat_id: i64,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    Send {
        chat_id: i64,
        text: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Read {
        chat_id: i64,
    },
    /// Download a message attachment.
    File {
        file_id: String,
        #[arg(long)]
        out: PathBuf,
    },
    Mailing {
        #[command(subcommand)]
        action: MailingCommand,
    },
    /// Print pushed messages until interrupted.
    Listen {
        /// Keep this chat open so its new messages are marked read.
        #[arg(long)]
        chat: Option<i64>,
        #[arg(long)]
        notify: bool,
    },
}

#[derive(Subcommand, Debug)]
enum MailingCommand {
    Status,
    Start {
        text: String,
        /// Recipients; defaults to every chat of the bot.
        #[arg(long)]
        users: Option<u64>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Stop,
    Watch,
}

pub struct Console {
    pub settings: config::Settings,
    pub store: Arc<dyn SessionStore>,
    pub api: Arc<ApiClient>,
}

impl Console {
    pub fn console_api(&self) -> Arc<dyn ConsoleApi> {
        self.api.clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = config::load_settings(cli.config.as_deref());
    settings.apply_overrides(cli.api_url, cli.ws_url, cli.state_db);

    let store: Arc<dyn SessionStore> = Arc::new(SqliteStorage::new(&settings.state_db_url()).await?);
    let api = Arc::new(ApiClient::new(settings.api_base_url.clone(), store.clone()));
    api.set_unauthorized_handler(|| warn!("session cleared; run `botdesk login` again"))
        .await;
    let console = Console {
        settings,
        store,
        api,
    };

    match cli.command {
        Command::Login { token, payload } => commands::login(&console, token, payload).await,
        Command::Logout => commands::logout(&console).await,
        Command::Bots => commands::bots(&console).await,
        Command::UseBot { bot_id } => commands::use_bot(&console, bot_id).await,
        Command::Chats => commands::chats(&console).await,
        Command::Messages { chat_id, pages } => commands::messages(&console, chat_id, pages).await,
        Command::Send {
            chat_id,
            text,
            file,
        } => commands::send(&console, chat_id, text, file).await,
        Command::Read { chat_id } => commands::read(&console, chat_id).await,
        Command::File { file_id, out } => commands::file(&console, file_id, &out).await,
        Command::Mailing { action } => match action {
            MailingCommand::Status => commands::mailing_status(&console).await,
            MailingCommand::Start { text, users, file } => {
                commands::mailing_start(&console, text, users, file).await
            }
            MailingCommand::Stop => commands::mailing_stop(&console).await,
            MailingCommand::Watch => commands::mailing_watch(&console).await,
        },
        Command::Listen { chat, notify } => commands::listen(&console, chat, notify).await,
    }
}
