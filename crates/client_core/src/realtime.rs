//! Persistent socket to the console's push channel.
//!
//! A background task owns the connection. It reconnects with exponential
//! backoff and re-sends `authorize` after every successful connect while a
//! token is stored. Pushed messages fan out to every live [`Subscription`] and
//! always raise a notification.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use shared::protocol::{PushedMessage, WsEventIn, WsEventOut, WS_UNAUTHORIZED};
use storage::SessionStore;
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{notify::Notifier, ClientError, ClientResult};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Derives `ws(s)://host/api/ws` from the HTTP base URL.
    pub fn from_api_base(base_url: &str) -> ClientResult<Self> {
        let mut url = url::Url::parse(base_url)
            .map_err(|err| ClientError::invalid(format!("bad api url {base_url}: {err}")))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ClientError::invalid(format!(
                    "api url must be http or https, got {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::invalid("cannot derive websocket url"))?;
        url.set_path("/api/ws");
        Ok(Self::new(url.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Receives pushed messages until dropped.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<PushedMessage>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<PushedMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushedMessage> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

#[derive(Default)]
struct Link {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    closed: bool,
    authorized: bool,
    auth_in_flight: bool,
    auth_waiters: Vec<oneshot::Sender<bool>>,
}

impl Link {
    fn settle_authorization(&mut self, authorized: bool) {
        self.authorized = authorized;
        self.auth_in_flight = false;
        for waiter in self.auth_waiters.drain(..) {
            let _ = waiter.send(authorized);
        }
    }
}

pub struct RealtimeClient {
    config: RealtimeConfig,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PushedMessage>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeClient {
    pub fn new(
        config: RealtimeConfig,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            store,
            notifier,
            state,
            link: Mutex::new(Link::default()),
            subscribers: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        })
    }

    /// Starts the connection task; a second call is a no-op while it runs.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        self.link.lock().await.closed = false;
        let client = Arc::clone(self);
        *task = Some(tokio::spawn(async move { client.run().await }));
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        {
            let mut link = self.link.lock().await;
            link.outbound = None;
            link.closed = true;
            link.settle_authorization(false);
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn is_authorized(&self) -> bool {
        self.link.lock().await.authorized
    }

    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        Subscription { rx }
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Writes a frame, suspending until the socket is connected.
    pub async fn send_event(&self, event: &WsEventOut) -> ClientResult<()> {
        let text = serde_json::to_string(event)
            .map_err(|err| ClientError::invalid(format!("unserialisable event: {err}")))?;
        let mut state = self.state.subscribe();
        loop {
            {
                let link = self.link.lock().await;
                if link.closed {
                    return Err(ClientError::NotConnected);
                }
                if let Some(outbound) = link.outbound.as_ref() {
                    if outbound.send(Message::Text(text.clone())).is_ok() {
                        return Ok(());
                    }
                }
            }
            if state.changed().await.is_err() {
                return Err(ClientError::NotConnected);
            }
        }
    }

    /// Resolves once the server acknowledges the stored token.
    ///
    /// Callers arriving while an attempt is in flight share its outcome. While
    /// disconnected the attempt is made by the connection task on connect.
    pub async fn authorize(&self) -> ClientResult<bool> {
        let Some(token) = self.store.token().await? else {
            return Ok(false);
        };
        let (tx, rx) = oneshot::channel();
        {
            let mut link = self.link.lock().await;
            if link.closed {
                return Err(ClientError::NotConnected);
            }
            link.auth_waiters.push(tx);
            if !link.auth_in_flight {
                if let Some(outbound) = link.outbound.clone() {
                    link.auth_in_flight = true;
                    let frame = authorize_frame(token)?;
                    if outbound.send(frame).is_err() {
                        link.auth_in_flight = false;
                    }
                }
            }
        }
        Ok(rx.await.unwrap_or(false))
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = self.config.initial_backoff;
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!(url = %self.config.url, "connecting realtime socket");
            match connect_async(self.config.url.as_str()).await {
                Ok((socket, _)) => {
                    info!(url = %self.config.url, "realtime socket connected");
                    backoff = self.config.initial_backoff;
                    self.serve(socket).await;
                    self.on_disconnected().await;
                    warn!("realtime socket closed, reconnecting");
                }
                Err(err) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    warn!(error = %err, retry_in_ms = backoff.as_millis() as u64, "realtime connect failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    async fn serve(&self, socket: Socket) {
        let (mut writer, mut reader) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        self.on_connected(&tx).await;

        let write = async {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = writer.send(frame).await {
                    debug!(error = %err, "realtime write failed");
                    break;
                }
            }
        };
        let read = async {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => self.handle_frame(&text).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "realtime receive failed");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = write => {}
            _ = read => {}
        }
    }

    async fn on_connected(&self, tx: &mpsc::UnboundedSender<Message>) {
        let token = match self.store.token().await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "failed to read session token");
                None
            }
        };
        {
            let mut link = self.link.lock().await;
            link.outbound = Some(tx.clone());
            link.authorized = false;
            match token {
                Some(token) => match authorize_frame(token) {
                    Ok(frame) => {
                        link.auth_in_flight = tx.send(frame).is_ok();
                    }
                    Err(err) => warn!(error = %err, "failed to encode authorize frame"),
                },
                None => link.settle_authorization(false),
            }
        }
        self.state.send_replace(ConnectionState::Connected);
    }

    async fn on_disconnected(&self) {
        {
            let mut link = self.link.lock().await;
            link.outbound = None;
            link.authorized = false;
            link.auth_in_flight = false;
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn handle_frame(&self, text: &str) {
        let event = match serde_json::from_str::<WsEventIn>(text) {
            Ok(event) => event,
            Err(err) => {
                debug!(error = %err, "dropping malformed realtime frame");
                return;
            }
        };
        match event {
            WsEventIn::Authorized => {
                info!("realtime session authorized");
                self.link.lock().await.settle_authorization(true);
            }
            WsEventIn::Error { message } if message == WS_UNAUTHORIZED => {
                warn!("realtime session rejected");
                self.link.lock().await.settle_authorization(false);
            }
            WsEventIn::Error { message } => {
                warn!(%message, "realtime error event");
            }
            WsEventIn::Message {
                chat_id,
                bot_id,
                message,
                chat,
            } => match PushedMessage::from_raw(chat_id, bot_id, message, chat) {
                Ok(pushed) => self.dispatch(pushed).await,
                Err(err) => debug!(error = %err, "dropping undecodable message event"),
            },
        }
    }

    async fn dispatch(&self, pushed: PushedMessage) {
        {
            let mut subscribers = self.subscribers.lock().await;
            subscribers.retain(|tx| tx.send(pushed.clone()).is_ok());
            debug!(
                chat_id = pushed.chat_id.0,
                message_id = pushed.message.id.0,
                subscribers = subscribers.len(),
                "pushed message delivered"
            );
        }
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(&pushed.chat, &pushed.message).await;
        });
    }
}

fn authorize_frame(token: String) -> ClientResult<Message> {
    let text = serde_json::to_string(&WsEventOut::Authorize { token })
        .map_err(|err| ClientError::invalid(format!("unserialisable authorize frame: {err}")))?;
    Ok(Message::Text(text))
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
