use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// High-level controller lifecycle state reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerState {
    /// Nothing has been requested yet.
    Cold,
    /// The login-check request is in flight.
    CheckingSession,
    /// The server wants credentials; the login form is shown.
    AwaitingCredentials,
    /// A credential submission is in flight.
    SubmittingCredentials,
    /// A session exists and the event channel is being opened.
    Authenticated,
    /// The event channel is open and the input surface is unlocked.
    Live,
    /// Login or the event channel failed; nothing further happens until reload.
    Fatal,
}

/// Origin of a chat message, which also selects its rendering style.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageSender {
    /// Typed by the local user.
    #[serde(rename = "user")]
    User,
    /// Produced by the remote chat backend.
    #[serde(rename = "hive", alias = "remote")]
    Remote,
    /// Generated locally to report a failure.
    #[serde(rename = "error")]
    Error,
}

impl MessageSender {
    /// Wire name, also used as the `from-*` style suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Remote => "hive",
            Self::Error => "error",
        }
    }
}

/// Chat message as carried by the event channel and rendered by the message view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Stable identifier used for in-place updates. `None` always inserts.
    #[serde(rename = "uuid", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Who produced the message.
    pub sender: MessageSender,
    /// Plain text body, rendered literally.
    #[serde(default)]
    pub text: String,
    /// Rich body; sanitized before rendering and preferred over `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// When the server recorded the message.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp_format"
    )]
    pub timestamp: Option<DateTime<FixedOffset>>,
}

impl Message {
    /// Outgoing user message with a client-assigned identifier.
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            sender: MessageSender::User,
            text: text.into(),
            html: None,
            timestamp: None,
        }
    }

    /// Reply text from the remote side without an identifier.
    pub fn remote(text: impl Into<String>) -> Self {
        Self {
            id: None,
            sender: MessageSender::Remote,
            text: text.into(),
            html: None,
            timestamp: None,
        }
    }

    /// Locally generated error report; never deduplicated.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            id: None,
            sender: MessageSender::Error,
            text: text.into(),
            html: None,
            timestamp: None,
        }
    }

    /// Reconciliation key; empty identifiers count as absent.
    pub fn key(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Ephemeral status tags attached to a rendered message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DisplayStatus {
    /// The send request has not completed successfully.
    Unsent,
    /// The server has not echoed the message back yet.
    Unseen,
    /// A synchronous reply is still outstanding.
    Waiting,
}

impl DisplayStatus {
    /// Class-style name used by renderers.
    pub fn as_class(&self) -> &'static str {
        match self {
            Self::Unsent => "unsent",
            Self::Unseen => "unseen",
            Self::Waiting => "waiting",
        }
    }
}

/// Which chat-send backend sits behind the dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChatBackend {
    /// Same-origin endpoint answering 204; the reply arrives over the event channel.
    #[default]
    Acknowledge,
    /// External endpoint answering 200 with the reply text in the body.
    SyncReply,
}

/// Memory-resident session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Set once a login check or submission succeeds; never reset.
    pub authenticated: bool,
    /// Current single-use anti-forgery token, if the server issued one.
    pub anti_forgery_token: Option<String>,
}

/// Result of a login check or credential submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    /// The session is usable.
    Authenticated,
    /// Credentials must be (re)submitted with the fresh token.
    AwaitingCredentials,
}

/// Status line, status text and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            body: body.into(),
        }
    }

    /// Reply without a body.
    pub fn empty(status: u16, status_text: impl Into<String>) -> Self {
        Self::new(status, status_text, String::new())
    }
}

/// Body of a 200 login response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsrfPayload {
    pub csrf: String,
}

/// Body of a login submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub user: String,
    pub pass: String,
    pub csrf: String,
}

/// Body posted to the same-origin chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPost {
    pub sender: MessageSender,
    pub text: String,
    pub uuid: String,
}

/// Body posted to the external chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalChatRequest {
    pub user_input: String,
}

/// Body returned by the external chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalChatReply {
    pub niall_output: String,
}

/// Request issued for one outgoing message, shaped by the configured backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRequest {
    /// JSON post acknowledged with 204.
    Post(ChatPost),
    /// Plain-text post answered with the reply.
    External(ExternalChatRequest),
}

/// One server-push event as framed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// Event name; `message` when the server gave none.
    pub event: String,
    /// Concatenated `data:` lines.
    pub data: String,
}

/// Command channel input accepted by the controller runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Ask the login endpoint whether a session exists.
    CheckSession,
    /// Submit the login form using the current anti-forgery token.
    SubmitCredentials { user: String, pass: String },
    /// Send raw user input; blank input is dropped silently.
    SendMessage { input: String },
}

/// Acknowledgement for one outgoing message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Client-assigned message identifier.
    pub message_id: String,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Event channel output emitted by the controller runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Lifecycle transition.
    StateChanged { state: ControllerState },
    /// The login form must be shown; `rejected` marks a failed attempt.
    CredentialsRequired { rejected: bool },
    /// The event channel opened and input may be sent.
    InputUnlocked,
    /// An inbound batch was reconciled into the view.
    BatchApplied { count: usize },
    /// A send request resolved.
    SendAck(SendAck),
    /// A command was rejected or a flow failed.
    Error {
        code: String,
        message: String,
        /// The controller is now in `Fatal`.
        fatal: bool,
    },
}

/// Parse the timestamp forms used by the chat servers.
///
/// Accepts RFC 3339 and `YYYY-MM-DD HH:MM:SS[.ffffff]+HH:MM`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .ok()
        .or_else(|| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z").ok())
}

mod timestamp_format {
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S>(
        value: &Option<DateTime<FixedOffset>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<RawTimestamp>::deserialize(deserializer)? else {
            return Ok(None);
        };
        match raw {
            RawTimestamp::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(|ts| Some(ts.fixed_offset()))
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
            RawTimestamp::Text(text) => super::parse_timestamp(&text)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("unrecognised timestamp '{text}'"))),
        }
    }
}
