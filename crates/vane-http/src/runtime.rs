//! Single-task controller runtime.
//!
//! One task owns the state machine, the negotiator, the dispatcher and the
//! message view. Network work runs in spawned tasks that report back through
//! [`LoopEvent`]s, so every view mutation happens on the runtime task.

use std::{future::Future, sync::Arc};

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vane_core::{
    ChatBackend, ChatCommand, ChatDispatcher, ChatError, ControllerChannelError,
    ControllerChannels, ControllerEvent, ControllerStateMachine, DisplayZone, EventStream,
    HttpReply, Message, MessageSurface, MessageView, Sanitizer, SessionNegotiator, SessionState,
    error_message, normalize_error, parse_batch,
};

use crate::api::ChatApi;

const MESSAGE_EVENT: &str = "message";
const KEEPALIVE_EVENT: &str = "keepalive";

/// Runtime tuning and backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub backend: ChatBackend,
    pub zone: DisplayZone,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: ChatBackend::default(),
            zone: DisplayZone::default(),
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatRuntimeHandle {
    channels: ControllerChannels,
}

impl ChatRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), ControllerChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Start the controller on the current tokio runtime.
///
/// The runtime stops once every handle is dropped.
pub fn spawn_runtime(
    api: Arc<dyn ChatApi>,
    config: RuntimeConfig,
    surface: Box<dyn MessageSurface>,
    sanitizer: Arc<dyn Sanitizer>,
) -> ChatRuntimeHandle {
    let (channels, command_rx) =
        ControllerChannels::new(config.command_buffer, config.event_buffer);
    let view = MessageView::new(surface, sanitizer, config.zone);
    let runtime = ChatRuntime::new(
        api,
        channels.event_sender(),
        command_rx,
        view,
        config.backend,
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    ChatRuntimeHandle { channels }
}

/// Completion signals posted by spawned network tasks.
enum LoopEvent {
    SessionChecked(Result<HttpReply, ChatError>),
    CredentialsChecked(Result<HttpReply, ChatError>),
    ChannelOpened,
    BatchReceived(Vec<Message>),
    ChannelFailed(ChatError),
    SendResolved {
        message_id: String,
        reply: Result<HttpReply, ChatError>,
    },
}

struct ChatRuntime {
    api: Arc<dyn ChatApi>,
    events: broadcast::Sender<ControllerEvent>,
    command_rx: mpsc::Receiver<ChatCommand>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
    loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
    state_machine: ControllerStateMachine,
    negotiator: SessionNegotiator,
    dispatcher: ChatDispatcher,
    view: MessageView,
    stop: CancellationToken,
}

impl ChatRuntime {
    fn new(
        api: Arc<dyn ChatApi>,
        events: broadcast::Sender<ControllerEvent>,
        command_rx: mpsc::Receiver<ChatCommand>,
        view: MessageView,
        backend: ChatBackend,
    ) -> Self {
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        Self {
            api,
            events,
            command_rx,
            loop_tx,
            loop_rx,
            state_machine: ControllerStateMachine::default(),
            negotiator: SessionNegotiator::new(),
            dispatcher: ChatDispatcher::new(backend),
            view,
            stop: CancellationToken::new(),
        }
    }

    async fn run(mut self) {
        debug!(backend = ?self.dispatcher.backend(), "controller runtime started");
        loop {
            tokio::select! {
                Some(event) = self.loop_rx.recv() => self.handle_loop_event(event),
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        debug!("controller runtime stopped");
        self.stop.cancel();
    }

    fn handle_command(&mut self, command: ChatCommand) {
        let (candidate, events) = match self.validate_transition(&command) {
            Ok(transition) => transition,
            Err(err) => {
                warn!(code = %err.code, detail = %err.message, "command rejected");
                self.emit(normalize_error(&err, false));
                return;
            }
        };

        match command {
            ChatCommand::CheckSession => {
                self.commit_transition(candidate, events);
                self.spawn_request(|api| async move {
                    LoopEvent::SessionChecked(api.login_check().await)
                });
            }
            ChatCommand::SubmitCredentials { user, pass } => {
                let request = match self.negotiator.credentials_request(user, pass) {
                    Ok(request) => request,
                    Err(err) => {
                        warn!(code = %err.code, "credential submission rejected");
                        self.emit(normalize_error(&err, false));
                        return;
                    }
                };
                self.commit_transition(candidate, events);
                self.spawn_request(move |api| async move {
                    LoopEvent::CredentialsChecked(api.login_submit(&request).await)
                });
            }
            ChatCommand::SendMessage { input } => {
                self.commit_transition(candidate, events);
                let Some(outgoing) = self.dispatcher.prepare(&mut self.view, &input) else {
                    trace!("blank input dropped");
                    return;
                };
                self.spawn_request(move |api| async move {
                    let reply = api.send_chat(&outgoing.request).await;
                    LoopEvent::SendResolved {
                        message_id: outgoing.message_id,
                        reply,
                    }
                });
            }
        }
    }

    fn handle_loop_event(&mut self, event: LoopEvent) {
        if self.state_machine.is_fatal() && !matches!(event, LoopEvent::SendResolved { .. }) {
            trace!("ignoring loop event after fatal error");
            return;
        }

        match event {
            LoopEvent::SessionChecked(reply) => {
                let result = reply.and_then(|reply| self.negotiator.on_check_reply(&reply));
                self.finish_session_step(result, false);
            }
            LoopEvent::CredentialsChecked(reply) => {
                let result = reply.and_then(|reply| self.negotiator.on_submit_reply(&reply));
                self.finish_session_step(result, true);
            }
            LoopEvent::ChannelOpened => match self.state_machine.on_channel_opened() {
                Ok(state_event) => {
                    self.emit(state_event);
                    self.emit(ControllerEvent::InputUnlocked);
                }
                Err(err) => {
                    warn!(code = %err.code, detail = %err.message, "unexpected channel open");
                }
            },
            LoopEvent::BatchReceived(batch) => {
                let count = batch.len();
                for message in &batch {
                    self.view.reconcile(message);
                    self.dispatcher.observe_inbound(&mut self.view, message);
                }
                trace!(count, "inbound batch reconciled");
                self.emit(ControllerEvent::BatchApplied { count });
            }
            LoopEvent::ChannelFailed(err) => self.fail(err),
            LoopEvent::SendResolved { message_id, reply } => {
                if let Some(ack) = self.dispatcher.resolve(&mut self.view, &message_id, reply) {
                    self.emit(ack);
                }
            }
        }
    }

    fn finish_session_step(&mut self, result: Result<SessionState, ChatError>, submitted: bool) {
        let state = match result {
            Ok(state) => state,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        match self.state_machine.on_session_result(state) {
            Ok(state_event) => self.emit(state_event),
            Err(err) => {
                warn!(code = %err.code, detail = %err.message, "unexpected session result");
                return;
            }
        }

        match state {
            SessionState::AwaitingCredentials => {
                debug!(rejected = submitted, "credentials required");
                self.emit(ControllerEvent::CredentialsRequired { rejected: submitted });
            }
            SessionState::Authenticated => self.open_channel(),
        }
    }

    fn open_channel(&self) {
        let api = Arc::clone(&self.api);
        let loop_tx = self.loop_tx.clone();
        let stop = self.stop.child_token();

        tokio::spawn(async move {
            let opened = tokio::select! {
                _ = stop.cancelled() => return,
                opened = api.open_events() => opened,
            };
            let mut feed = match opened {
                Ok(feed) => feed,
                Err(err) => {
                    let _ = loop_tx.send(LoopEvent::ChannelFailed(err));
                    return;
                }
            };
            if loop_tx.send(LoopEvent::ChannelOpened).is_err() {
                return;
            }

            loop {
                let next = tokio::select! {
                    _ = stop.cancelled() => break,
                    next = feed.next() => next,
                };
                let signal = match next {
                    Some(Ok(event)) => match event.event.as_str() {
                        MESSAGE_EVENT => match parse_batch(&event.data) {
                            Ok(batch) => LoopEvent::BatchReceived(batch),
                            Err(err) => {
                                warn!(detail = %err.message, "skipping malformed batch");
                                continue;
                            }
                        },
                        KEEPALIVE_EVENT => continue,
                        other => {
                            trace!(event = other, "ignoring event");
                            continue;
                        }
                    },
                    Some(Err(err)) => {
                        let _ = loop_tx.send(LoopEvent::ChannelFailed(err));
                        break;
                    }
                    None => {
                        if !stop.is_cancelled() {
                            let closed = ChatError::channel_closed();
                            let _ = loop_tx.send(LoopEvent::ChannelFailed(closed));
                        }
                        break;
                    }
                };
                if loop_tx.send(signal).is_err() {
                    break;
                }
            }
        });
    }

    fn fail(&mut self, error: ChatError) {
        if self.state_machine.is_fatal() {
            return;
        }

        warn!(code = %error.code, detail = %error.message, "controller failed");
        self.view.reconcile(&error_message(&error));
        let state_event = self.state_machine.on_fatal();
        self.emit(state_event);
        self.emit(normalize_error(&error, true));
        self.stop.cancel();
    }

    /// Best-effort fan-out; events are dropped while nobody subscribes.
    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    fn spawn_request<F, Fut>(&self, request: F)
    where
        F: FnOnce(Arc<dyn ChatApi>) -> Fut,
        Fut: Future<Output = LoopEvent> + Send + 'static,
    {
        let pending = request(Arc::clone(&self.api));
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            let _ = loop_tx.send(pending.await);
        });
    }

    fn validate_transition(
        &self,
        command: &ChatCommand,
    ) -> Result<(ControllerStateMachine, Vec<ControllerEvent>), ChatError> {
        let mut candidate = self.state_machine.clone();
        let events = candidate.apply(command)?;
        Ok((candidate, events))
    }

    fn commit_transition(
        &mut self,
        candidate: ControllerStateMachine,
        events: Vec<ControllerEvent>,
    ) {
        self.state_machine = candidate;
        for event in events {
            debug!(?event, "controller transition");
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use futures::channel::mpsc as feed_mpsc;
    use tokio::{sync::oneshot, time::timeout};
    use vane_core::{
        ChatErrorCategory, ChatRequest, ControllerState, DisplayStatus, InMemorySurface,
        LoginRequest, MessageSender, RenderedBody, ServerEvent, SurfaceEntry,
    };
    use vane_platform::platform_sanitizer;

    use super::*;
    use crate::sse::EventFeed;

    type FeedSender = feed_mpsc::UnboundedSender<Result<ServerEvent, ChatError>>;

    #[derive(Default)]
    struct ScriptedApi {
        login_replies: Mutex<VecDeque<Result<HttpReply, ChatError>>>,
        chat_replies: Mutex<VecDeque<Result<HttpReply, ChatError>>>,
        feed: Mutex<Option<EventFeed>>,
        login_submissions: Mutex<Vec<LoginRequest>>,
        chat_requests: Mutex<Vec<ChatRequest>>,
        chat_gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl ScriptedApi {
        fn with_login(replies: Vec<HttpReply>) -> Self {
            let api = Self::default();
            api.login_replies
                .lock()
                .expect("lock")
                .extend(replies.into_iter().map(Ok));
            api
        }

        fn queue_chat(&self, reply: Result<HttpReply, ChatError>) {
            self.chat_replies.lock().expect("lock").push_back(reply);
        }

        /// Hold the next chat reply until the returned sender fires.
        fn hold_chat(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.chat_gate.lock().expect("lock") = Some(rx);
            tx
        }

        fn attach_feed(&self) -> FeedSender {
            let (tx, rx) = feed_mpsc::unbounded();
            *self.feed.lock().expect("lock") = Some(rx.boxed());
            tx
        }

        fn submissions(&self) -> Vec<LoginRequest> {
            self.login_submissions.lock().expect("lock").clone()
        }

        fn chat_requests(&self) -> Vec<ChatRequest> {
            self.chat_requests.lock().expect("lock").clone()
        }

        fn next_login(&self) -> Result<HttpReply, ChatError> {
            self.login_replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(ChatError::transport("no scripted login reply")))
        }
    }

    #[async_trait]
    impl ChatApi for ScriptedApi {
        async fn login_check(&self) -> Result<HttpReply, ChatError> {
            self.next_login()
        }

        async fn login_submit(&self, request: &LoginRequest) -> Result<HttpReply, ChatError> {
            self.login_submissions
                .lock()
                .expect("lock")
                .push(request.clone());
            self.next_login()
        }

        async fn open_events(&self) -> Result<EventFeed, ChatError> {
            self.feed.lock().expect("lock").take().ok_or_else(|| {
                ChatError::new(
                    ChatErrorCategory::Channel,
                    "event_channel_failed",
                    "event source didn't open: 502 Bad Gateway",
                )
            })
        }

        async fn send_chat(&self, request: &ChatRequest) -> Result<HttpReply, ChatError> {
            self.chat_requests.lock().expect("lock").push(request.clone());
            let gate = self.chat_gate.lock().expect("lock").take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.chat_replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(ChatError::transport("no scripted chat reply")))
        }
    }

    struct Harness {
        api: Arc<ScriptedApi>,
        surface: InMemorySurface,
        handle: ChatRuntimeHandle,
        events: EventStream,
    }

    fn start(api: ScriptedApi, backend: ChatBackend) -> Harness {
        let api = Arc::new(api);
        let surface = InMemorySurface::default();
        let handle = spawn_runtime(
            api.clone(),
            RuntimeConfig {
                backend,
                zone: DisplayZone::Utc,
                ..RuntimeConfig::default()
            },
            Box::new(surface.clone()),
            platform_sanitizer(),
        );
        let events = handle.subscribe();
        Harness {
            api,
            surface,
            handle,
            events,
        }
    }

    impl Harness {
        async fn send(&self, command: ChatCommand) {
            self.handle.send(command).await.expect("command should enqueue");
        }

        async fn next_event(&mut self) -> ControllerEvent {
            timeout(Duration::from_secs(2), self.events.recv())
                .await
                .expect("event timeout")
                .expect("event receive")
        }

        /// Collect events up to and including the first one matching `done`.
        async fn collect_until(
            &mut self,
            done: impl Fn(&ControllerEvent) -> bool,
        ) -> Vec<ControllerEvent> {
            let mut seen = Vec::new();
            loop {
                let event = self.next_event().await;
                let finished = done(&event);
                seen.push(event);
                if finished {
                    return seen;
                }
            }
        }

        async fn go_live(&mut self) -> Vec<ControllerEvent> {
            self.send(ChatCommand::CheckSession).await;
            self.collect_until(|event| matches!(event, ControllerEvent::InputUnlocked))
                .await
        }

        async fn send_text(&mut self, input: &str) -> vane_core::SendAck {
            self.send(ChatCommand::SendMessage {
                input: input.to_owned(),
            })
            .await;
            let events = self
                .collect_until(|event| matches!(event, ControllerEvent::SendAck(_)))
                .await;
            match events.into_iter().last() {
                Some(ControllerEvent::SendAck(ack)) => ack,
                other => panic!("unexpected event: {other:?}"),
            }
        }

        async fn await_chat_requests(&self, count: usize) {
            timeout(Duration::from_secs(2), async {
                while self.api.chat_requests().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("chat request timeout");
        }

        async fn await_batch(&mut self) -> usize {
            let events = self
                .collect_until(|event| matches!(event, ControllerEvent::BatchApplied { .. }))
                .await;
            match events.into_iter().last() {
                Some(ControllerEvent::BatchApplied { count }) => count,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    fn batch(data: &str) -> Result<ServerEvent, ChatError> {
        Ok(ServerEvent {
            event: "message".to_owned(),
            data: data.to_owned(),
        })
    }

    fn csrf(token: &str) -> HttpReply {
        HttpReply::new(200, "OK", format!(r#"{{"csrf":"{token}"}}"#))
    }

    fn text_of(entry: &SurfaceEntry) -> &str {
        match &entry.content.body {
            RenderedBody::Text(text) | RenderedBody::SafeHtml(text) => text,
        }
    }

    fn states(events: &[ControllerEvent]) -> Vec<ControllerState> {
        events
            .iter()
            .filter_map(|event| match event {
                ControllerEvent::StateChanged { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn existing_session_unlocks_input_without_credentials() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let _feed = api.attach_feed();
        let mut harness = start(api, ChatBackend::Acknowledge);

        let events = harness.go_live().await;

        assert!(
            !events
                .iter()
                .any(|event| matches!(event, ControllerEvent::CredentialsRequired { .. }))
        );
        assert_eq!(
            states(&events),
            vec![
                ControllerState::CheckingSession,
                ControllerState::Authenticated,
                ControllerState::Live,
            ]
        );
        assert!(harness.surface.entries().is_empty());
    }

    #[tokio::test]
    async fn rejected_login_rotates_token_and_never_reuses_it() {
        let api = ScriptedApi::with_login(vec![
            csrf("t1"),
            csrf("t2"),
            HttpReply::empty(204, "No Content"),
        ]);
        let _feed = api.attach_feed();
        let mut harness = start(api, ChatBackend::Acknowledge);

        harness.send(ChatCommand::CheckSession).await;
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::CredentialsRequired { .. }))
            .await;
        assert_eq!(
            events.last(),
            Some(&ControllerEvent::CredentialsRequired { rejected: false })
        );

        harness
            .send(ChatCommand::SubmitCredentials {
                user: "gary".into(),
                pass: "wrong".into(),
            })
            .await;
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::CredentialsRequired { .. }))
            .await;
        assert_eq!(
            events.last(),
            Some(&ControllerEvent::CredentialsRequired { rejected: true })
        );

        harness
            .send(ChatCommand::SubmitCredentials {
                user: "gary".into(),
                pass: "password".into(),
            })
            .await;
        harness
            .collect_until(|event| matches!(event, ControllerEvent::InputUnlocked))
            .await;

        let tokens = harness
            .api
            .submissions()
            .into_iter()
            .map(|request| request.csrf)
            .collect::<Vec<_>>();
        assert_eq!(tokens, vec!["t1".to_owned(), "t2".to_owned()]);
    }

    #[tokio::test]
    async fn accepted_send_clears_pending_and_echo_updates_in_place() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let feed = api.attach_feed();
        api.queue_chat(Ok(HttpReply::empty(204, "No Content")));
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        let ack = harness.send_text("  hello  ").await;
        assert_eq!(ack.error_code, None);
        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].statuses.contains(&DisplayStatus::Unsent));

        feed.unbounded_send(batch(&format!(
            r#"[{{"sender":"user","text":"hello, edited","uuid":"{}"}}]"#,
            ack.message_id
        )))
        .expect("feed open");
        assert_eq!(harness.await_batch().await, 1);

        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(text_of(&entries[0]), "hello, edited");
        assert!(entries[0].statuses.is_empty());
        match &harness.api.chat_requests()[0] {
            ChatRequest::Post(post) => {
                assert_eq!(post.text, "hello");
                assert_eq!(post.uuid, ack.message_id);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_send_renders_status_and_keeps_pending_tag() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let _feed = api.attach_feed();
        api.queue_chat(Ok(HttpReply::empty(500, "Internal Server Error")));
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        let ack = harness.send_text("hello").await;
        assert_eq!(ack.error_code.as_deref(), Some("unexpected_status"));

        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].statuses.contains(&DisplayStatus::Unsent));
        assert_eq!(entries[1].content.sender, MessageSender::Error);
        assert!(text_of(&entries[1]).contains("500"));
    }

    #[tokio::test]
    async fn sync_reply_backend_renders_reply_from_response() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let _feed = api.attach_feed();
        api.queue_chat(Ok(HttpReply::new(200, "OK", r#"{"niall_output":"pong"}"#)));
        let mut harness = start(api, ChatBackend::SyncReply);
        harness.go_live().await;

        let ack = harness.send_text("ping").await;
        assert_eq!(ack.error_code, None);

        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].statuses.is_empty());
        assert_eq!(entries[1].content.sender, MessageSender::Remote);
        assert_eq!(text_of(&entries[1]), "pong");
        assert!(matches!(
            harness.api.chat_requests()[0],
            ChatRequest::External(ref body) if body.user_input == "ping"
        ));
    }

    #[tokio::test]
    async fn blank_input_issues_no_request() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let _feed = api.attach_feed();
        api.queue_chat(Ok(HttpReply::empty(204, "No Content")));
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        harness
            .send(ChatCommand::SendMessage {
                input: "   ".into(),
            })
            .await;
        harness.send_text("real").await;

        assert_eq!(harness.api.chat_requests().len(), 1);
        assert_eq!(harness.surface.entries().len(), 1);
    }

    #[tokio::test]
    async fn batches_apply_in_order_and_skip_noise() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let feed = api.attach_feed();
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        feed.unbounded_send(Ok(ServerEvent {
            event: "keepalive".into(),
            data: String::new(),
        }))
        .expect("feed open");
        feed.unbounded_send(batch("not json")).expect("feed open");
        feed.unbounded_send(batch(
            r#"[{"sender":"hive","text":"1","uuid":"a"},{"sender":"hive","text":"2","uuid":"a"},{"sender":"hive","html":"<img src=x onerror=alert(1)>"}]"#,
        ))
        .expect("feed open");

        assert_eq!(harness.await_batch().await, 3);
        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(text_of(&entries[0]), "2");
        assert!(!text_of(&entries[1]).contains("onerror"));
    }

    #[tokio::test]
    async fn channel_failure_is_fatal_and_reported_once() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let feed = api.attach_feed();
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        feed.unbounded_send(Err(ChatError::new(
            ChatErrorCategory::Channel,
            "event_channel_closed",
            "server closed the event stream",
        )))
        .expect("feed open");
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::Error { .. }))
            .await;
        assert_eq!(states(&events), vec![ControllerState::Fatal]);
        assert!(matches!(
            events.last(),
            Some(ControllerEvent::Error { code, fatal: true, .. }) if code == "event_channel_closed"
        ));

        harness
            .send(ChatCommand::SendMessage {
                input: "anyone?".into(),
            })
            .await;
        match harness.next_event().await {
            ControllerEvent::Error { code, fatal, .. } => {
                assert_eq!(code, "invalid_state_transition");
                assert!(!fatal);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content.sender, MessageSender::Error);
        assert_eq!(
            text_of(&entries[0]),
            "Event channel failed: server closed the event stream"
        );
    }

    #[tokio::test]
    async fn channel_that_never_opens_is_fatal() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let mut harness = start(api, ChatBackend::Acknowledge);

        harness.send(ChatCommand::CheckSession).await;
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::Error { .. }))
            .await;

        assert!(!events.contains(&ControllerEvent::InputUnlocked));
        assert_eq!(
            states(&events),
            vec![
                ControllerState::CheckingSession,
                ControllerState::Authenticated,
                ControllerState::Fatal,
            ]
        );
        assert_eq!(harness.surface.entries().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_login_status_is_fatal() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(503, "Service Unavailable")]);
        let mut harness = start(api, ChatBackend::Acknowledge);

        harness.send(ChatCommand::CheckSession).await;
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::Error { .. }))
            .await;
        assert!(matches!(
            events.last(),
            Some(ControllerEvent::Error { fatal: true, .. })
        ));

        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(text_of(&entries[0]), "503 Service Unavailable");
    }

    #[tokio::test]
    async fn send_before_live_is_rejected_without_render() {
        let api = ScriptedApi::default();
        let mut harness = start(api, ChatBackend::Acknowledge);

        harness
            .send(ChatCommand::SendMessage {
                input: "too early".into(),
            })
            .await;
        match harness.next_event().await {
            ControllerEvent::Error { code, fatal, .. } => {
                assert_eq!(code, "invalid_state_transition");
                assert!(!fatal);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(harness.surface.entries().is_empty());
        assert!(harness.api.chat_requests().is_empty());
    }

    #[tokio::test]
    async fn quiet_end_of_feed_is_fatal() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let feed = api.attach_feed();
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        drop(feed);
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::Error { .. }))
            .await;
        assert_eq!(states(&events), vec![ControllerState::Fatal]);
        assert!(matches!(
            events.last(),
            Some(ControllerEvent::Error { code, fatal: true, .. }) if code == "event_channel_closed"
        ));

        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content.sender, MessageSender::Error);
        assert_eq!(
            text_of(&entries[0]),
            "Event channel failed: server closed the event stream"
        );
    }

    #[tokio::test]
    async fn send_result_after_fatal_still_clears_pending_tag() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let feed = api.attach_feed();
        api.queue_chat(Ok(HttpReply::empty(204, "No Content")));
        let release = api.hold_chat();
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        harness
            .send(ChatCommand::SendMessage {
                input: "hello".into(),
            })
            .await;
        harness.await_chat_requests(1).await;

        feed.unbounded_send(Err(ChatError::new(
            ChatErrorCategory::Channel,
            "event_channel_failed",
            "connection reset",
        )))
        .expect("feed open");
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::Error { .. }))
            .await;
        assert_eq!(states(&events), vec![ControllerState::Fatal]);

        release.send(()).expect("send should still be pending");
        let events = harness
            .collect_until(|event| matches!(event, ControllerEvent::SendAck(_)))
            .await;
        match events.last() {
            Some(ControllerEvent::SendAck(ack)) => assert_eq!(ack.error_code, None),
            other => panic!("unexpected event: {other:?}"),
        }

        let entries = harness.surface.entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].statuses.contains(&DisplayStatus::Unsent));
        assert_eq!(entries[1].content.sender, MessageSender::Error);
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_runtime_and_reader() {
        let api = ScriptedApi::with_login(vec![HttpReply::empty(204, "No Content")]);
        let feed = api.attach_feed();
        let mut harness = start(api, ChatBackend::Acknowledge);
        harness.go_live().await;

        let Harness {
            api,
            surface,
            handle,
            events,
        } = harness;
        drop(handle);
        drop(events);
        drop(surface);

        timeout(Duration::from_secs(2), async {
            while !feed.is_closed() || Arc::strong_count(&api) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("runtime should release the event feed and the api");
    }
}
