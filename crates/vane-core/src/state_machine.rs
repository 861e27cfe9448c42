use crate::{
    error::ChatError,
    types::{ChatCommand, ControllerEvent, ControllerState, SessionState},
};

#[derive(Debug, Clone)]
pub struct ControllerStateMachine {
    state: ControllerState,
}

impl Default for ControllerStateMachine {
    fn default() -> Self {
        Self {
            state: ControllerState::Cold,
        }
    }
}

impl ControllerStateMachine {
    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_fatal(&self) -> bool {
        self.state == ControllerState::Fatal
    }

    pub fn apply(&mut self, command: &ChatCommand) -> Result<Vec<ControllerEvent>, ChatError> {
        match command {
            ChatCommand::CheckSession => self.transition_from_state(
                ControllerState::Cold,
                ControllerState::CheckingSession,
                "check_session",
            ),
            ChatCommand::SubmitCredentials { .. } => self.transition_from_state(
                ControllerState::AwaitingCredentials,
                ControllerState::SubmittingCredentials,
                "submit_credentials",
            ),
            ChatCommand::SendMessage { .. } => {
                if self.state == ControllerState::Live {
                    Ok(Vec::new())
                } else {
                    Err(ChatError::invalid_state(self.state, "send_message"))
                }
            }
        }
    }

    /// Apply the outcome of a login check or credential submission.
    pub fn on_session_result(
        &mut self,
        result: SessionState,
    ) -> Result<ControllerEvent, ChatError> {
        if !matches!(
            self.state,
            ControllerState::CheckingSession | ControllerState::SubmittingCredentials
        ) {
            return Err(ChatError::invalid_state(self.state, "on_session_result"));
        }

        let next = match result {
            SessionState::Authenticated => ControllerState::Authenticated,
            SessionState::AwaitingCredentials => ControllerState::AwaitingCredentials,
        };
        self.state = next;
        Ok(ControllerEvent::StateChanged { state: next })
    }

    pub fn on_channel_opened(&mut self) -> Result<ControllerEvent, ChatError> {
        if self.state != ControllerState::Authenticated {
            return Err(ChatError::invalid_state(self.state, "on_channel_opened"));
        }
        self.state = ControllerState::Live;
        Ok(ControllerEvent::StateChanged {
            state: ControllerState::Live,
        })
    }

    pub fn on_fatal(&mut self) -> ControllerEvent {
        self.state = ControllerState::Fatal;
        ControllerEvent::StateChanged {
            state: ControllerState::Fatal,
        }
    }

    fn transition_from_state(
        &mut self,
        expected: ControllerState,
        next: ControllerState,
        action: &str,
    ) -> Result<Vec<ControllerEvent>, ChatError> {
        if self.state != expected {
            return Err(ChatError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![ControllerEvent::StateChanged { state: next }])
    }
}
