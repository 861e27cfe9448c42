use crate::{
    error::{ChatError, ChatErrorCategory},
    types::{ChatBackend, ControllerEvent, ExternalChatReply, HttpReply, Message, SendAck},
};

const STATUS_ACCEPTED: u16 = 204;
const STATUS_REPLIED: u16 = 200;

/// Result of one chat-send request after status mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Receipt acknowledged; any reply arrives over the event channel.
    Accepted,
    /// The endpoint answered with the reply text directly.
    Replied { text: String },
    /// Anything else.
    Failed { error: ChatError },
}

/// Map a chat-send reply to an outcome according to the configured backend.
pub fn classify_send_reply(
    backend: ChatBackend,
    reply: Result<HttpReply, ChatError>,
) -> SendOutcome {
    let reply = match reply {
        Ok(reply) => reply,
        Err(error) => return SendOutcome::Failed { error },
    };

    match (backend, reply.status) {
        (ChatBackend::Acknowledge, STATUS_ACCEPTED) => SendOutcome::Accepted,
        (ChatBackend::SyncReply, STATUS_REPLIED) => {
            match serde_json::from_str::<ExternalChatReply>(&reply.body) {
                Ok(body) => SendOutcome::Replied {
                    text: body.niall_output,
                },
                Err(err) => SendOutcome::Failed {
                    error: ChatError::new(
                        ChatErrorCategory::Serialization,
                        "invalid_reply_body",
                        format!("chat reply could not be decoded: {err}"),
                    ),
                },
            }
        }
        (_, status) => SendOutcome::Failed {
            error: ChatError::unexpected_status(status, &reply.status_text),
        },
    }
}

/// Convert a send outcome to a stable `ControllerEvent::SendAck`.
pub fn normalize_send_outcome(
    message_id: impl Into<String>,
    outcome: &SendOutcome,
) -> ControllerEvent {
    let error_code = match outcome {
        SendOutcome::Accepted | SendOutcome::Replied { .. } => None,
        SendOutcome::Failed { error } => Some(error.code.clone()),
    };
    ControllerEvent::SendAck(SendAck {
        message_id: message_id.into(),
        error_code,
    })
}

/// Convert an error into a `ControllerEvent::Error`.
pub fn normalize_error(error: &ChatError, fatal: bool) -> ControllerEvent {
    ControllerEvent::Error {
        code: error.code.clone(),
        message: error.message.clone(),
        fatal,
    }
}

/// Error-kind message rendered for a failure.
pub fn error_message(error: &ChatError) -> Message {
    Message::error(error.display_text())
}

/// Decode the JSON array carried by one `message` event.
pub fn parse_batch(data: &str) -> Result<Vec<Message>, ChatError> {
    serde_json::from_str(data).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "invalid_batch",
            format!("event batch could not be decoded: {err}"),
        )
    })
}
