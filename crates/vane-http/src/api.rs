use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;
use url::Url;
use vane_core::{ChatError, ChatErrorCategory, ChatRequest, HttpReply, LoginRequest};

use crate::sse::{EventFeed, event_feed};

const LOGIN_PATH: &str = "api/login";
const EVENTS_PATH: &str = "api/events";
const CHAT_PATH: &str = "api/chat";

/// Transport used by the controller runtime.
///
/// Implementations return every HTTP status as a reply; only failures that
/// produce no status are errors.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET` the login endpoint.
    async fn login_check(&self) -> Result<HttpReply, ChatError>;

    /// `POST` credentials to the login endpoint.
    async fn login_submit(&self, request: &LoginRequest) -> Result<HttpReply, ChatError>;

    /// Open the server-push channel.
    async fn open_events(&self) -> Result<EventFeed, ChatError>;

    /// Send one chat message.
    async fn send_chat(&self, request: &ChatRequest) -> Result<HttpReply, ChatError>;
}

/// Absolute URLs of the endpoints the controller talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: Url,
    pub events: Url,
    pub chat: Url,
}

impl Endpoints {
    /// Resolve the standard endpoint paths against `base`.
    pub fn from_base(base: &str) -> Result<Self, ChatError> {
        let mut base = parse_endpoint(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            login: join_endpoint(&base, LOGIN_PATH)?,
            events: join_endpoint(&base, EVENTS_PATH)?,
            chat: join_endpoint(&base, CHAT_PATH)?,
        })
    }

    /// Replace the chat endpoint, for example with an external reply service.
    pub fn with_chat_endpoint(mut self, endpoint: &str) -> Result<Self, ChatError> {
        self.chat = parse_endpoint(endpoint)?;
        Ok(self)
    }
}

fn parse_endpoint(value: &str) -> Result<Url, ChatError> {
    let url = Url::parse(value.trim()).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Config,
            "invalid_endpoint",
            format!("'{value}' is not a valid URL: {err}"),
        )
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ChatError::new(
            ChatErrorCategory::Config,
            "invalid_endpoint",
            format!("'{value}' uses unsupported scheme '{other}'"),
        )),
    }
}

fn join_endpoint(base: &Url, path: &str) -> Result<Url, ChatError> {
    base.join(path).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Config,
            "invalid_endpoint",
            format!("cannot resolve '{path}' against '{base}': {err}"),
        )
    })
}

/// `reqwest`-backed transport with an in-memory cookie store.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpChatApi {
    pub fn new(endpoints: Endpoints) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|err| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn login_check(&self) -> Result<HttpReply, ChatError> {
        let response = self
            .client
            .get(self.endpoints.login.clone())
            .send()
            .await
            .map_err(map_transport_error)?;
        into_reply(response).await
    }

    async fn login_submit(&self, request: &LoginRequest) -> Result<HttpReply, ChatError> {
        let response = self
            .client
            .post(self.endpoints.login.clone())
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        into_reply(response).await
    }

    async fn open_events(&self) -> Result<EventFeed, ChatError> {
        let response = self
            .client
            .get(self.endpoints.events.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| {
                ChatError::new(
                    ChatErrorCategory::Channel,
                    "event_channel_failed",
                    format!("event source didn't open: {err}"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut error = ChatError::new(
                ChatErrorCategory::Channel,
                "event_channel_failed",
                format!(
                    "event source didn't open: {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default()
                )
                .trim_end()
                .to_owned(),
            );
            error.status = Some(status.as_u16());
            return Err(error);
        }

        debug!(url = %self.endpoints.events, "event channel opened");
        Ok(event_feed(response.bytes_stream().map_err(|err| err.to_string())))
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<HttpReply, ChatError> {
        let builder = match request {
            ChatRequest::Post(post) => self.client.post(self.endpoints.chat.clone()).json(post),
            ChatRequest::External(body) => {
                let encoded = serde_json::to_string(body).map_err(|err| {
                    ChatError::new(
                        ChatErrorCategory::Serialization,
                        "invalid_request_body",
                        err.to_string(),
                    )
                })?;
                self.client
                    .post(self.endpoints.chat.clone())
                    .header(CONTENT_TYPE, "text/plain")
                    .body(encoded)
            }
        };

        let response = builder.send().await.map_err(map_transport_error)?;
        into_reply(response).await
    }
}

async fn into_reply(response: reqwest::Response) -> Result<HttpReply, ChatError> {
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or_default().to_owned();
    let body = response.text().await.map_err(map_transport_error)?;
    Ok(HttpReply::new(status.as_u16(), status_text, body))
}

fn map_transport_error(err: reqwest::Error) -> ChatError {
    ChatError::transport(err.to_string())
}
