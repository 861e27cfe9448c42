//! Server-sent events framing.

use std::{collections::VecDeque, fmt::Display, pin::Pin};

use futures::{Stream, StreamExt, stream::BoxStream};
use tracing::trace;
use vane_core::{ChatError, ChatErrorCategory, ServerEvent};

const DEFAULT_EVENT: &str = "message";

/// Stream of framed events; ends after the first error.
pub type EventFeed = BoxStream<'static, Result<ServerEvent, ChatError>>;

/// Incremental decoder turning raw chunks into dispatched events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line_buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.line_buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline_index) = self.line_buffer.iter().position(|byte| *byte == b'\n') {
            let mut line = self.line_buffer.drain(..=newline_index).collect::<Vec<_>>();
            line.pop();
            if matches!(line.last(), Some(b'\r')) {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => trace!(field, "ignoring event field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            data,
        })
    }
}

struct FeedState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<ServerEvent>,
    finished: bool,
}

/// Decode a byte stream into an [`EventFeed`].
///
/// A read error yields `event_channel_failed`; the end of the stream yields
/// `event_channel_closed`. Either one is the last item.
pub fn event_feed<S, B, E>(bytes: S) -> EventFeed
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = FeedState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    let error = ChatError::new(
                        ChatErrorCategory::Channel,
                        "event_channel_failed",
                        format!("event stream read failed: {err}"),
                    );
                    return Some((Err(error), state));
                }
                None => {
                    state.finished = true;
                    return Some((Err(ChatError::channel_closed()), state));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use futures::stream;

    use super::*;

    fn event(name: &str, data: &str) -> ServerEvent {
        ServerEvent {
            event: name.to_owned(),
            data: data.to_owned(),
        }
    }

    #[test]
    fn decodes_named_and_default_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: keepalive\ndata: \n\ndata: [1]\n\n");

        assert_eq!(events, vec![event("keepalive", ""), event("message", "[1]")]);
    }

    #[test]
    fn joins_multi_line_data_and_tolerates_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: message\r\ndata: [\r\ndata:  1]\r\n\r\n");

        assert_eq!(events, vec![event("message", "[\n 1]")]);
    }

    #[test]
    fn buffers_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [{\"sender\"").is_empty());
        assert!(decoder.push(b":\"hive\"}]\n").is_empty());

        let events = decoder.push(b"\n");
        assert_eq!(events, vec![event("message", r#"[{"sender":"hive"}]"#)]);
    }

    #[test]
    fn skips_comments_and_unknown_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": ping\nid: 7\nretry: 1000\n\n");

        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn feed_reports_closure_after_last_event() {
        let chunks: Vec<Result<&'static [u8], Infallible>> =
            vec![Ok(&b"data: [1]\n"[..]), Ok(&b"\ndata: [2]\n\n"[..])];
        let items = event_feed(stream::iter(chunks)).collect::<Vec<_>>().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(event("message", "[1]")));
        assert_eq!(items[1], Ok(event("message", "[2]")));
        match &items[2] {
            Err(err) => assert_eq!(err.code, "event_channel_closed"),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn feed_stops_at_read_error() {
        let chunks: Vec<Result<&'static [u8], &'static str>> =
            vec![
            Ok(&b"data: [1]\n\n"[..]),
            Err("connection reset"),
            Ok(&b"data: [2]\n\n"[..]),
        ];
        let items = event_feed(stream::iter(chunks)).collect::<Vec<_>>().await;

        assert_eq!(items.len(), 2);
        match &items[1] {
            Err(err) => {
                assert_eq!(err.code, "event_channel_failed");
                assert!(err.message.contains("connection reset"));
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
