//! Typed HTTP client for the console API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Bot, BotId, ChatId, ChatPage, FileId, MailingStatus, Message, MessagePage},
    error::ApiResponse,
    protocol::{AuthOk, BotRaw, ChatsRaw, MailingStatusRaw, MessageRaw, MessagesRaw},
};
use storage::{PersistedStatePatch, SessionStore};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Attachment, ClientError, ClientResult, ConsoleApi};

pub type UnauthorizedHandler = Arc<dyn Fn() + Send + Sync>;

pub struct ApiClient {
    http: Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    unauthorized: RwLock<Option<UnauthorizedHandler>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_http(Client::new(), base_url, store)
    }

    pub fn with_http(http: Client, base_url: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            unauthorized: RwLock::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Registers the callback run whenever the server rejects the session.
    pub async fn set_unauthorized_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.unauthorized.write().await = Some(Arc::new(handler));
    }

    /// Exchanges the login widget payload for a token and stores it.
    pub async fn login(&self, widget_payload: &serde_json::Value) -> ClientResult<Option<String>> {
        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(widget_payload)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            info!(status = response.status().as_u16(), "login rejected");
            return Ok(None);
        }
        let body: AuthOk = response.json().await?;
        self.store
            .update(PersistedStatePatch::token(Some(body.token.clone())))
            .await?;
        Ok(Some(body.token))
    }

    /// Ends the server session and forgets the local token.
    pub async fn logout(&self) -> ClientResult<()> {
        let result = self
            .authorized(self.http.get(self.url("/api/auth/logout")))
            .await;
        self.store.update(PersistedStatePatch::token(None)).await?;
        match result {
            Ok(_) | Err(ClientError::Unauthorized) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn file_url(&self, file_id: &FileId) -> String {
        self.url(&format!("/api/file/{}", file_id.0))
    }

    /// Avatar references are server-relative unless already absolute.
    pub fn avatar_url(&self, avatar_ref: &str) -> String {
        if avatar_ref.starts_with("http://") || avatar_ref.starts_with("https://") {
            avatar_ref.to_string()
        } else {
            self.url(avatar_ref)
        }
    }

    pub async fn download_file(&self, file_id: &FileId) -> ClientResult<Vec<u8>> {
        let response = self
            .authorized(self.http.get(self.file_url(file_id)))
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn notify_unauthorized(&self) {
        let handler = self.unauthorized.read().await.clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Sends with the bearer token. A missing token or a 401 trips the unauthorized
    /// handler; a 401 also forgets the stored token.
    async fn authorized(&self, request: RequestBuilder) -> ClientResult<Response> {
        let Some(token) = self.store.token().await? else {
            self.notify_unauthorized().await;
            return Err(ClientError::Unauthorized);
        };
        let response = request.bearer_auth(token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %response.url(), "session rejected by server; dropping token");
            self.store.update(PersistedStatePatch::token(None)).await?;
            self.notify_unauthorized().await;
            return Err(ClientError::Unauthorized);
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = ensure_success(self.authorized(request).await?).await?;
        Ok(response.json().await?)
    }

    /// Control endpoints only report success as `{"message": "ok"}`.
    async fn control(&self, request: RequestBuilder, operation: &str) -> ClientResult<bool> {
        let response = self.authorized(request).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let parsed = ApiResponse::parse_lenient(&body);
        if parsed.is_ok() {
            return Ok(true);
        }
        if let Some(err) = parsed.into_api_error(status) {
            warn!(operation, status, code = ?err.code, message = %err.message, "control request refused");
        }
        Ok(false)
    }
}

async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

fn multipart_file(attachment: Attachment) -> ClientResult<Part> {
    let part = Part::bytes(attachment.bytes).file_name(attachment.filename);
    match attachment.mime_type {
        Some(mime) => Ok(part.mime_str(&mime)?),
        None => Ok(part),
    }
}

#[async_trait]
impl ConsoleApi for ApiClient {
    async fn bots(&self) -> ClientResult<Vec<Bot>> {
        let bots: Vec<BotRaw> = self.get_json(self.http.get(self.url("/api/bots"))).await?;
        Ok(bots.into_iter().map(Bot::from).collect())
    }

    async fn chats(&self, bot_id: BotId, offset: u64, limit: u64) -> ClientResult<ChatPage> {
        let raw: ChatsRaw = self
            .get_json(self.http.get(self.url("/api/chats")).query(&[
                ("botId", bot_id.0.to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ]))
            .await?;
        Ok(ChatPage::try_from(raw)?)
    }

    async fn messages(
        &self,
        chat_id: ChatId,
        offset: u64,
        limit: u64,
    ) -> ClientResult<MessagePage> {
        let raw: MessagesRaw = self
            .get_json(
                self.http
                    .get(self.url(&format!("/api/chats/{}/messages", chat_id.0)))
                    .query(&[("offset", offset), ("limit", limit)]),
            )
            .await?;
        debug!(chat_id = chat_id.0, offset, count = raw.messages.len(), "history page loaded");
        Ok(MessagePage::try_from(raw)?)
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        attachment: Option<Attachment>,
    ) -> ClientResult<Message> {
        let mut form = Form::new().text("text", text.to_string());
        if let Some(attachment) = attachment {
            form = form.part("file", multipart_file(attachment)?);
        }
        let raw: MessageRaw = self
            .get_json(
                self.http
                    .post(self.url(&format!("/api/chats/{}/messages", chat_id.0)))
                    .multipart(form),
            )
            .await?;
        Ok(Message::try_from(raw)?)
    }

    async fn set_read(&self, chat_id: ChatId) -> ClientResult<()> {
        let response = self
            .authorized(
                self.http
                    .get(self.url(&format!("/api/chats/{}/setRead", chat_id.0))),
            )
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn start_mailing(
        &self,
        bot_id: BotId,
        text: &str,
        user_count: u64,
        attachment: Option<Attachment>,
    ) -> ClientResult<bool> {
        let mut form = Form::new()
            .text("text", text.to_string())
            .text("userCount", user_count.to_string());
        if let Some(attachment) = attachment {
            form = form.part("file", multipart_file(attachment)?);
        }
        self.control(
            self.http
                .post(self.url(&format!("/api/bots/{}/mail", bot_id.0)))
                .multipart(form),
            "start_mailing",
        )
        .await
    }

    async fn mailing_status(&self, bot_id: BotId) -> ClientResult<MailingStatus> {
        let raw: MailingStatusRaw = self
            .get_json(
                self.http
                    .get(self.url(&format!("/api/bots/{}/mail/status", bot_id.0))),
            )
            .await?;
        Ok(MailingStatus::try_from(raw)?)
    }

    async fn stop_mailing(&self, bot_id: BotId) -> ClientResult<bool> {
        self.control(
            self.http
                .post(self.url(&format!("/api/bots/{}/mail/stop", bot_id.0))),
            "stop_mailing",
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
