//! Login negotiation against the login-check / login-submit endpoint.
//!
//! The negotiator is IO-free: the runtime performs the requests and feeds the
//! replies back in. Every reply either authenticates the session or supplies a
//! fresh anti-forgery token; a token is handed out at most once.

use tracing::debug;

use crate::{
    error::{ChatError, ChatErrorCategory},
    types::{CsrfPayload, HttpReply, LoginRequest, Session, SessionState},
};

const STATUS_SESSION_EXISTS: u16 = 204;
const STATUS_CREDENTIALS_REQUIRED: u16 = 200;

#[derive(Debug, Default)]
pub struct SessionNegotiator {
    session: Session,
}

impl SessionNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Apply the reply to `GET login`.
    pub fn on_check_reply(&mut self, reply: &HttpReply) -> Result<SessionState, ChatError> {
        self.apply_reply(reply)
    }

    /// Build a login submission, consuming the current token.
    pub fn credentials_request(
        &mut self,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Result<LoginRequest, ChatError> {
        let csrf = self.session.anti_forgery_token.take().ok_or_else(|| {
            ChatError::new(
                ChatErrorCategory::Internal,
                "login_token_missing",
                "no unused anti-forgery token is available for this submission",
            )
        })?;

        Ok(LoginRequest {
            user: user.into(),
            pass: pass.into(),
            csrf,
        })
    }

    /// Apply the reply to `POST login`.
    pub fn on_submit_reply(&mut self, reply: &HttpReply) -> Result<SessionState, ChatError> {
        self.apply_reply(reply)
    }

    fn apply_reply(&mut self, reply: &HttpReply) -> Result<SessionState, ChatError> {
        match reply.status {
            STATUS_SESSION_EXISTS => {
                self.session.authenticated = true;
                self.session.anti_forgery_token = None;
                debug!("session established");
                Ok(SessionState::Authenticated)
            }
            STATUS_CREDENTIALS_REQUIRED => {
                let payload: CsrfPayload = serde_json::from_str(&reply.body).map_err(|err| {
                    ChatError::new(
                        ChatErrorCategory::Serialization,
                        "invalid_login_body",
                        format!("login response did not carry a token: {err}"),
                    )
                })?;
                self.session.anti_forgery_token = Some(payload.csrf);
                debug!("login endpoint issued a fresh anti-forgery token");
                Ok(SessionState::AwaitingCredentials)
            }
            status => Err(ChatError::unexpected_status(status, &reply.status_text)),
        }
    }
}
