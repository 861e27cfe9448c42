mod config;
mod logging;
mod surface;

use std::{
    io::{self, Write},
    process::ExitCode,
    sync::Arc,
};

use config::TermConfig;
use surface::TerminalSurface;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, error, info, trace, warn};
use vane_core::{ChatCommand, ControllerEvent};
use vane_http::{HttpChatApi, spawn_runtime};
use vane_platform::platform_sanitizer;

/// What the next stdin line means.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InputMode {
    Idle,
    User,
    Password { user: String },
    Chat,
}

/// Turn one stdin line into a command, advancing the login prompt.
fn route_line(mode: &mut InputMode, line: String) -> Option<ChatCommand> {
    match std::mem::replace(mode, InputMode::Idle) {
        InputMode::Idle => None,
        InputMode::User => {
            *mode = InputMode::Password {
                user: line.trim().to_owned(),
            };
            prompt("password: ");
            None
        }
        InputMode::Password { user } => Some(ChatCommand::SubmitCredentials { user, pass: line }),
        InputMode::Chat => {
            *mode = InputMode::Chat;
            Some(ChatCommand::SendMessage { input: line })
        }
    }
}

fn prompt(label: &str) {
    print!("{label}");
    let _ = io::stdout().flush();
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting vane-term");

    let config = match TermConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    let api = match HttpChatApi::new(config.endpoints.clone()) {
        Ok(api) => api,
        Err(err) => {
            eprintln!("failed to build HTTP client: {err}");
            return ExitCode::from(2);
        }
    };
    debug!(login = %config.endpoints.login, chat = %config.endpoints.chat, "endpoints resolved");

    let handle = spawn_runtime(
        Arc::new(api),
        config.runtime,
        Box::new(TerminalSurface::new(io::stdout())),
        platform_sanitizer(),
    );
    let mut events = handle.subscribe();
    if let Err(err) = handle.send(ChatCommand::CheckSession).await {
        error!(error = %err, "controller runtime is not running");
        return ExitCode::FAILURE;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut mode = InputMode::Idle;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ControllerEvent::CredentialsRequired { rejected }) => {
                    if rejected {
                        println!("Login rejected.");
                    }
                    mode = InputMode::User;
                    prompt("user: ");
                }
                Ok(ControllerEvent::InputUnlocked) => {
                    println!("Connected. Type a message and press enter.");
                    mode = InputMode::Chat;
                }
                Ok(ControllerEvent::Error { code, message, fatal: true }) => {
                    debug!(%code, detail = %message, "controller stopped");
                    return ExitCode::FAILURE;
                }
                Ok(ControllerEvent::Error { code, message, fatal: false }) => {
                    warn!(%code, detail = %message, "command rejected");
                }
                Ok(other) => trace!(event = ?other, "controller event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event subscriber lagged"),
                Err(RecvError::Closed) => return ExitCode::FAILURE,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(command) = route_line(&mut mode, line)
                        && let Err(err) = handle.send(command).await
                    {
                        error!(error = %err, "controller runtime is not running");
                        return ExitCode::FAILURE;
                    }
                }
                Ok(None) => return ExitCode::SUCCESS,
                Err(err) => {
                    error!(error = %err, "failed to read stdin");
                    return ExitCode::FAILURE;
                }
            },
        }
    }
}
