//! HTTP transport and controller runtime for the chat client.
//!
//! [`HttpChatApi`] talks to the login, chat and event endpoints with `reqwest`;
//! [`spawn_runtime`] drives the core components from a single tokio task.

mod api;
mod runtime;
pub mod sse;

pub use api::{ChatApi, Endpoints, HttpChatApi};
pub use runtime::{ChatRuntimeHandle, RuntimeConfig, spawn_runtime};
pub use sse::{EventFeed, SseDecoder, event_feed};
