use std::{env, process::ExitCode};

use vane_core::SessionNegotiator;
use vane_http::{ChatApi, Endpoints, HttpChatApi};

#[tokio::main]
async fn main() -> ExitCode {
    let base_url =
        env::var("VANE_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:5678/".to_owned());

    let api = match Endpoints::from_base(&base_url).and_then(HttpChatApi::new) {
        Ok(api) => api,
        Err(err) => {
            eprintln!("Invalid endpoint configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let reply = match api.login_check().await {
        Ok(reply) => reply,
        Err(err) => {
            eprintln!("Login check failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut negotiator = SessionNegotiator::new();
    match negotiator.on_check_reply(&reply) {
        Ok(state) => {
            println!("Login endpoint {} answered: {state:?}", api.endpoints().login);
            if negotiator.session().anti_forgery_token.is_some() {
                println!("An anti-forgery token was issued; credentials are required.");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Unexpected login response: {}", err.display_text());
            ExitCode::FAILURE
        }
    }
}
