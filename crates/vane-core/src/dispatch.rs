//! Outgoing message dispatch with optimistic rendering and status tracking.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::ChatError,
    normalization::{SendOutcome, classify_send_reply, error_message, normalize_send_outcome},
    timeline::{ElementHandle, MessageView},
    types::{
        ChatBackend, ChatPost, ChatRequest, ControllerEvent, DisplayStatus, ExternalChatRequest,
        HttpReply, Message, MessageSender,
    },
};

/// A message that has been rendered optimistically and now needs sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Client-assigned identifier, also the key of the rendered element.
    pub message_id: String,
    /// Request body for the configured backend.
    pub request: ChatRequest,
}

#[derive(Debug)]
pub struct ChatDispatcher {
    backend: ChatBackend,
    in_flight: HashMap<String, ElementHandle>,
    awaiting_echo: HashMap<String, ElementHandle>,
}

impl ChatDispatcher {
    pub fn new(backend: ChatBackend) -> Self {
        Self {
            backend,
            in_flight: HashMap::new(),
            awaiting_echo: HashMap::new(),
        }
    }

    pub fn backend(&self) -> ChatBackend {
        self.backend
    }

    /// Number of sends whose network result has not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Trim `raw_input`, render it tagged as pending, and build its request.
    ///
    /// Returns `None` for blank input; nothing is rendered or sent then.
    pub fn prepare(&mut self, view: &mut MessageView, raw_input: &str) -> Option<OutgoingMessage> {
        let text = raw_input.trim();
        if text.is_empty() {
            return None;
        }

        let message_id = Uuid::new_v4().to_string();
        let handle = view.reconcile(&Message::user(message_id.clone(), text));
        view.tag(handle, DisplayStatus::Unsent);

        let request = match self.backend {
            ChatBackend::Acknowledge => {
                view.tag(handle, DisplayStatus::Unseen);
                self.awaiting_echo.insert(message_id.clone(), handle);
                ChatRequest::Post(ChatPost {
                    sender: MessageSender::User,
                    text: text.to_owned(),
                    uuid: message_id.clone(),
                })
            }
            ChatBackend::SyncReply => {
                view.tag(handle, DisplayStatus::Waiting);
                ChatRequest::External(ExternalChatRequest {
                    user_input: text.to_owned(),
                })
            }
        };

        self.in_flight.insert(message_id.clone(), handle);
        debug!(%message_id, backend = ?self.backend, "outgoing message rendered");
        Some(OutgoingMessage {
            message_id,
            request,
        })
    }

    /// Apply the network result of a send and return its acknowledgement.
    pub fn resolve(
        &mut self,
        view: &mut MessageView,
        message_id: &str,
        reply: Result<HttpReply, ChatError>,
    ) -> Option<ControllerEvent> {
        let Some(handle) = self.in_flight.remove(message_id) else {
            warn!(%message_id, "send result for unknown message ignored");
            return None;
        };

        let outcome = classify_send_reply(self.backend, reply);
        match &outcome {
            SendOutcome::Accepted => {
                view.untag(handle, DisplayStatus::Unsent);
            }
            SendOutcome::Replied { text } => {
                view.untag(handle, DisplayStatus::Unsent);
                view.untag(handle, DisplayStatus::Waiting);
                view.reconcile(&Message::remote(text.clone()));
            }
            SendOutcome::Failed { error } => {
                warn!(
                    %message_id,
                    code = %error.code,
                    detail = %error.message,
                    "send failed"
                );
                view.reconcile(&error_message(error));
            }
        }

        Some(normalize_send_outcome(message_id, &outcome))
    }

    /// Clear `unseen` when the server echoes one of our messages back.
    pub fn observe_inbound(&mut self, view: &mut MessageView, message: &Message) {
        if let Some(message_id) = message.key()
            && let Some(handle) = self.awaiting_echo.remove(message_id)
        {
            debug!(%message_id, "outgoing message echoed by server");
            view.untag(handle, DisplayStatus::Unseen);
        }
    }
}
