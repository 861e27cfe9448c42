use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ChatCommand, ControllerEvent};

/// Broadcast event stream handed to frontend subscribers.
pub type EventStream = broadcast::Receiver<ControllerEvent>;

/// Errors returned by controller channel operations.
#[derive(Debug, Error)]
pub enum ControllerChannelError {
    /// The runtime stopped reading commands.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair shared by the runtime and its frontends.
#[derive(Clone, Debug)]
pub struct ControllerChannels {
    command_tx: mpsc::Sender<ChatCommand>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl ControllerChannels {
    /// Create a channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ChatCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Emitting half only; holding it does not keep the command channel open.
    pub fn event_sender(&self) -> broadcast::Sender<ControllerEvent> {
        self.event_tx.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Queue one command for the runtime.
    pub async fn send_command(&self, command: ChatCommand) -> Result<(), ControllerChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ControllerChannelError::CommandChannelClosed)
    }

    /// Emit an event to every subscriber.
    ///
    /// Best-effort: with no subscribers the event is dropped, and slow
    /// subscribers observe `Lagged`.
    pub fn emit(&self, event: ControllerEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ControllerState;

    #[tokio::test]
    async fn delivers_commands_in_order() {
        let (channels, mut rx) = ControllerChannels::new(8, 8);
        channels
            .send_command(ChatCommand::CheckSession)
            .await
            .expect("command send should work");
        channels
            .send_command(ChatCommand::SendMessage {
                input: "hello".into(),
            })
            .await
            .expect("command send should work");

        assert_eq!(rx.recv().await, Some(ChatCommand::CheckSession));
        match rx.recv().await {
            Some(ChatCommand::SendMessage { input }) => assert_eq!(input, "hello"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let (channels, _) = ControllerChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.emit(ControllerEvent::StateChanged {
            state: ControllerState::Live,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[tokio::test]
    async fn event_sender_does_not_keep_commands_open() {
        let (channels, mut rx) = ControllerChannels::new(4, 4);
        let events = channels.event_sender();
        let mut subscriber = channels.subscribe();
        drop(channels);

        assert_eq!(rx.recv().await, None);
        let _ = events.send(ControllerEvent::InputUnlocked);
        assert_eq!(
            subscriber.recv().await.expect("event should arrive"),
            ControllerEvent::InputUnlocked
        );
    }

    #[tokio::test]
    async fn reports_closed_command_channel() {
        let (channels, rx) = ControllerChannels::new(1, 1);
        drop(rx);

        let err = channels
            .send_command(ChatCommand::CheckSession)
            .await
            .expect_err("receiver is gone");
        assert!(matches!(err, ControllerChannelError::CommandChannelClosed));
    }
}
