//! Core chat-controller contract shared between the runtime and frontends.
//!
//! This crate holds the IO-free pieces of the controller: the command/event
//! protocol, the lifecycle model, login negotiation, outgoing dispatch and the
//! message view that reconciles messages by identifier.

/// Async command/event channel primitives.
pub mod channel;
/// Outgoing message dispatch with optimistic rendering.
pub mod dispatch;
/// Stable controller error types and HTTP classification helpers.
pub mod error;
/// Send outcome mapping, acknowledgements and batch decoding.
pub mod normalization;
/// Login-check and credential submission handling.
pub mod session;
/// Controller lifecycle state machine.
pub mod state_machine;
/// Message view, render surfaces and sanitizer seam.
pub mod timeline;
/// Frontend-facing protocol types (commands, events, wire payloads).
pub mod types;

pub use channel::{ControllerChannelError, ControllerChannels, EventStream};
pub use dispatch::{ChatDispatcher, OutgoingMessage};
pub use error::{ChatError, ChatErrorCategory, classify_http_status};
pub use normalization::{
    SendOutcome, classify_send_reply, error_message, normalize_error, normalize_send_outcome,
    parse_batch,
};
pub use session::SessionNegotiator;
pub use state_machine::ControllerStateMachine;
pub use timeline::{
    DisplayZone, ElementHandle, InMemorySurface, MessageSurface, MessageView, RenderedBody,
    RenderedMessage, Sanitizer, SurfaceEntry, format_timestamp,
};
pub use types::{
    ChatBackend, ChatCommand, ChatPost, ChatRequest, ControllerEvent, ControllerState,
    CsrfPayload, DisplayStatus, ExternalChatReply, ExternalChatRequest, HttpReply, LoginRequest,
    Message, MessageSender, SendAck, ServerEvent, Session, SessionState, parse_timestamp,
};
