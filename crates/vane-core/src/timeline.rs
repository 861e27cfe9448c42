use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{DisplayStatus, Message, MessageSender};

/// en-GB `toLocaleString` layout.
const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

/// Opaque handle to a rendered message element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(pub u64);

/// Body content ready for insertion into a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedBody {
    /// Literal text; never interpreted as markup.
    Text(String),
    /// Markup that has already passed through a [`Sanitizer`].
    SafeHtml(String),
}

/// Fully rendered message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub sender: MessageSender,
    pub body: RenderedBody,
    /// Formatted timestamp nested under the body.
    pub timestamp: Option<String>,
}

/// Time zone used for rendered timestamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DisplayZone {
    #[default]
    Local,
    Utc,
}

/// Markup cleaning capability injected into the message view.
pub trait Sanitizer: Send + Sync {
    /// Strip script-executing content, keeping safe formatting markup.
    fn sanitize(&self, html: &str) -> String;
}

/// View registry mapping message identifiers to rendered elements.
pub trait MessageSurface: Send {
    /// Element currently registered for `message_id`.
    fn find(&self, message_id: &str) -> Option<ElementHandle>;

    /// Create a new element, register it under `message_id` when given, and append it.
    fn append(&mut self, message_id: Option<&str>, content: RenderedMessage) -> ElementHandle;

    /// Clear an element's content and fill it again, keeping its identity and status tags.
    fn repopulate(&mut self, handle: ElementHandle, content: RenderedMessage);

    /// Add or remove one status tag.
    fn set_status(&mut self, handle: ElementHandle, status: DisplayStatus, enabled: bool);

    /// Reveal the newest content.
    fn scroll_to_latest(&mut self);
}

/// One element held by [`InMemorySurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceEntry {
    pub handle: ElementHandle,
    pub message_id: Option<String>,
    pub content: RenderedMessage,
    pub statuses: BTreeSet<DisplayStatus>,
}

#[derive(Debug, Default)]
struct SurfaceInner {
    entries: Vec<SurfaceEntry>,
    by_id: HashMap<String, ElementHandle>,
    next_handle: u64,
    scroll_requests: usize,
}

impl SurfaceInner {
    fn entry_mut(&mut self, handle: ElementHandle) -> Option<&mut SurfaceEntry> {
        self.entries.iter_mut().find(|entry| entry.handle == handle)
    }
}

/// Shared in-memory surface; clones observe the same elements.
#[derive(Debug, Clone, Default)]
pub struct InMemorySurface {
    inner: Arc<Mutex<SurfaceInner>>,
}

impl InMemorySurface {
    /// Elements in display order.
    pub fn entries(&self) -> Vec<SurfaceEntry> {
        self.lock().entries.clone()
    }

    /// Element by handle.
    pub fn entry(&self, handle: ElementHandle) -> Option<SurfaceEntry> {
        self.lock()
            .entries
            .iter()
            .find(|entry| entry.handle == handle)
            .cloned()
    }

    /// How many times the surface was asked to scroll.
    pub fn scroll_requests(&self) -> usize {
        self.lock().scroll_requests
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SurfaceInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageSurface for InMemorySurface {
    fn find(&self, message_id: &str) -> Option<ElementHandle> {
        self.lock().by_id.get(message_id).copied()
    }

    fn append(&mut self, message_id: Option<&str>, content: RenderedMessage) -> ElementHandle {
        let mut inner = self.lock();
        let handle = ElementHandle(inner.next_handle);
        inner.next_handle += 1;
        if let Some(message_id) = message_id {
            inner.by_id.insert(message_id.to_owned(), handle);
        }
        inner.entries.push(SurfaceEntry {
            handle,
            message_id: message_id.map(ToOwned::to_owned),
            content,
            statuses: BTreeSet::new(),
        });
        handle
    }

    fn repopulate(&mut self, handle: ElementHandle, content: RenderedMessage) {
        if let Some(entry) = self.lock().entry_mut(handle) {
            entry.content = content;
        }
    }

    fn set_status(&mut self, handle: ElementHandle, status: DisplayStatus, enabled: bool) {
        if let Some(entry) = self.lock().entry_mut(handle) {
            if enabled {
                entry.statuses.insert(status);
            } else {
                entry.statuses.remove(&status);
            }
        }
    }

    fn scroll_to_latest(&mut self) {
        self.lock().scroll_requests += 1;
    }
}

/// Reconciles messages against the displayed list by identifier.
pub struct MessageView {
    surface: Box<dyn MessageSurface>,
    sanitizer: Arc<dyn Sanitizer>,
    zone: DisplayZone,
}

impl MessageView {
    pub fn new(
        surface: Box<dyn MessageSurface>,
        sanitizer: Arc<dyn Sanitizer>,
        zone: DisplayZone,
    ) -> Self {
        Self {
            surface,
            sanitizer,
            zone,
        }
    }

    /// Insert `message`, or update the element already registered for its identifier.
    ///
    /// Updates keep the element's status tags. Only insertions scroll.
    pub fn reconcile(&mut self, message: &Message) -> ElementHandle {
        let content = self.render(message);
        let key = message.key();

        if let Some(handle) = key.and_then(|id| self.surface.find(id)) {
            trace!(message_id = ?key, ?handle, "updating rendered message in place");
            self.surface.repopulate(handle, content);
            return handle;
        }

        let handle = self.surface.append(key, content);
        trace!(message_id = ?key, ?handle, "appended rendered message");
        self.surface.scroll_to_latest();
        handle
    }

    pub fn tag(&mut self, handle: ElementHandle, status: DisplayStatus) {
        self.surface.set_status(handle, status, true);
    }

    pub fn untag(&mut self, handle: ElementHandle, status: DisplayStatus) {
        self.surface.set_status(handle, status, false);
    }

    fn render(&self, message: &Message) -> RenderedMessage {
        let body = match &message.html {
            Some(html) => RenderedBody::SafeHtml(self.sanitizer.sanitize(html)),
            None => RenderedBody::Text(message.text.clone()),
        };
        RenderedMessage {
            sender: message.sender,
            body,
            timestamp: message
                .timestamp
                .map(|ts| format_timestamp(ts, self.zone)),
        }
    }
}

/// Format a timestamp the way the web client shows it (`DD/MM/YYYY, HH:MM:SS`).
pub fn format_timestamp(ts: DateTime<FixedOffset>, zone: DisplayZone) -> String {
    match zone {
        DisplayZone::Local => ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string(),
        DisplayZone::Utc => ts.with_timezone(&Utc).format(TIMESTAMP_FORMAT).to_string(),
    }
}
