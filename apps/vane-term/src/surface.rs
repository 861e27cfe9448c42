//! Message surface that prints every change to a terminal.

use std::io::Write;

use tracing::warn;
use vane_core::{
    DisplayStatus, ElementHandle, InMemorySurface, MessageSender, MessageSurface, RenderedBody,
    RenderedMessage, SurfaceEntry,
};

/// Keeps the element registry in memory and echoes inserts and updates as lines.
pub struct TerminalSurface<W> {
    elements: InMemorySurface,
    out: W,
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            elements: InMemorySurface::default(),
            out,
        }
    }

    #[cfg(test)]
    fn into_writer(self) -> W {
        self.out
    }

    fn print(&mut self, marker: &str, handle: ElementHandle) {
        let Some(entry) = self.elements.entry(handle) else {
            return;
        };
        if let Err(err) = writeln!(self.out, "{marker} {}", render_line(&entry)) {
            warn!(error = %err, "terminal write failed");
        }
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> MessageSurface for TerminalSurface<W> {
    fn find(&self, message_id: &str) -> Option<ElementHandle> {
        self.elements.find(message_id)
    }

    fn append(&mut self, message_id: Option<&str>, content: RenderedMessage) -> ElementHandle {
        let handle = self.elements.append(message_id, content);
        self.print(">", handle);
        handle
    }

    fn repopulate(&mut self, handle: ElementHandle, content: RenderedMessage) {
        self.elements.repopulate(handle, content);
        self.print("~", handle);
    }

    fn set_status(&mut self, handle: ElementHandle, status: DisplayStatus, enabled: bool) {
        self.elements.set_status(handle, status, enabled);
        if !enabled && status == DisplayStatus::Unsent {
            self.print("~", handle);
        }
    }

    fn scroll_to_latest(&mut self) {
        self.elements.scroll_to_latest();
    }
}

fn render_line(entry: &SurfaceEntry) -> String {
    let label = match entry.content.sender {
        MessageSender::User => "you",
        MessageSender::Remote => "hive",
        MessageSender::Error => "error",
    };
    let body = match &entry.content.body {
        RenderedBody::Text(text) | RenderedBody::SafeHtml(text) => text.as_str(),
    };

    let mut line = format!("{label}: {body}");
    if let Some(timestamp) = &entry.content.timestamp {
        line.push_str(&format!("  ({timestamp})"));
    }
    if !entry.statuses.is_empty() {
        let tags = entry
            .statuses
            .iter()
            .map(DisplayStatus::as_class)
            .collect::<Vec<_>>()
            .join(", ");
        line.push_str(&format!("  [{tags}]"));
    }
    line
}
