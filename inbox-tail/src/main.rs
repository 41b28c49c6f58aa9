//! inbox-tail — follow a user's push channel from the terminal.
//!
//! Configured through the environment:
//!
//! - `INBOX_SOCKET_URL` — `ws://` or `wss://` endpoint (required)
//! - `INBOX_USER_ID` — channel to subscribe to (required)
//! - `INBOX_AUTH` — bearer token (optional)
//!
//! Set `RUST_LOG=debug` to see heartbeat and reconnect traffic.

use log::{error, info, warn};

use inbox_sync::protocol::NORMAL_CLOSURE;
use inbox_sync::{
    to_push_event, ClientError, ConnectionConfig, PushClient, SocketEvent,
};

#[derive(Debug, thiserror::Error)]
enum TailError {
    #[error("{0} is not set")]
    MissingEnv(&'static str),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Failed to wait for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

fn required_env(name: &'static str) -> Result<String, TailError> {
    std::env::var(name).map_err(|_| TailError::MissingEnv(name))
}

fn config_from_env() -> Result<ConnectionConfig, TailError> {
    let mut config = ConnectionConfig::new(
        required_env("INBOX_SOCKET_URL")?,
        required_env("INBOX_USER_ID")?,
    );
    if let Ok(auth) = std::env::var("INBOX_AUTH") {
        config = config.with_auth(auth);
    }
    Ok(config)
}

async fn run() -> Result<(), TailError> {
    let config = config_from_env()?;
    info!("Tailing inbox for {}", config.user_id);

    let client = PushClient::spawn(config)?;
    let _lifecycle = client.on_lifecycle(|event| match event {
        SocketEvent::Opened => info!("connected"),
        SocketEvent::Closed { code, reason } => info!("closed ({code}) {reason}"),
        SocketEvent::Error(e) => warn!("socket error: {e}"),
        SocketEvent::RetriesExhausted => error!("giving up, no more reconnect attempts"),
        SocketEvent::Message(_) => {}
    });
    let _messages = client.on_message(|event| match to_push_event(event) {
        Some(push) => info!("{push:?}"),
        None => info!("{:?} (ignored)", event.event),
    });

    client.connect()?;
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    client.close(NORMAL_CLOSURE, "bye")?;
    client.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}
