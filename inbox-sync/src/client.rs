//! WebSocket push client.
//!
//! [`PushClient`] is a cheap handle; the socket itself lives in a background
//! task that owns an [`InboxSocket`] state machine and carries out its
//! effects: dialing, writing frames, and arming the retry and ping timers.
//! Handles talk to the task over a command channel, so every method is
//! non-blocking and safe to call from listeners.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use inbox_core::{Listeners, Subscription};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{ConfigError, ConnectionConfig};
use crate::connection::{Effect, SocketEvent, SocketState};
use crate::protocol::{ClientEnvelope, MessageEvent};
use crate::router::MessageRouter;
use crate::socket::InboxSocket;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Dial = Pin<Box<dyn Future<Output = Result<WsStream, WsError>> + Send>>;

/// Stand-in deadline for a timer that is not armed.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// `delay` from now, saturating at [`FAR_FUTURE`].
fn deadline_after(delay: Duration) -> Instant {
    Instant::now() + delay.min(FAR_FUTURE)
}

/// Close code reported when the transport drops without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Push client has shut down")]
    Shutdown,
}

#[derive(Debug)]
enum Command {
    Connect,
    Close { code: u16, reason: String },
    Send(ClientEnvelope),
    Shutdown,
}

/// Handle to the push socket task.
#[derive(Clone)]
pub struct PushClient {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<SocketState>>,
    router: MessageRouter,
    lifecycle: Listeners<SocketEvent>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PushClient {
    /// Validate `config` and start the socket task. The socket stays idle
    /// until [`connect`](Self::connect). Must be called inside a Tokio runtime.
    pub fn spawn(config: ConnectionConfig) -> Result<Self, ClientError> {
        let url = config.socket_url()?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(SocketState::Idle));
        let router = MessageRouter::new();
        let lifecycle = Listeners::new();

        let driver = Driver {
            url,
            socket: InboxSocket::new(&config),
            state: state.clone(),
            router: router.clone(),
            lifecycle: lifecycle.clone(),
            stream: None,
            dialing: None,
            retry_at: None,
            ping_at: None,
        };
        let task = tokio::spawn(driver.run(command_rx));

        Ok(Self {
            commands,
            state,
            router,
            lifecycle,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    pub fn state(&self) -> SocketState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SocketState::Open
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        self.command(Command::Connect)
    }

    /// Close the socket. No reconnect happens until the next `connect`.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::Close {
            code,
            reason: reason.into(),
        })
    }

    /// Send a request; dropped with a warning if the socket is not open.
    pub fn send(&self, envelope: ClientEnvelope) -> Result<(), ClientError> {
        self.command(Command::Send(envelope))
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Receive every message event pushed by the server.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.router.subscribe(callback)
    }

    /// Receive lifecycle notifications (open, close, error, exhaustion) and
    /// message events.
    pub fn on_lifecycle<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.lifecycle.subscribe(callback)
    }

    /// Stop the socket task and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("Push client task failed: {e}");
            }
        }
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Shutdown)
    }
}

enum Wake {
    Command(Option<Command>),
    Dialed(Result<WsStream, WsError>),
    Frame(Option<Result<WsMessage, WsError>>),
    RetryElapsed,
    PingElapsed,
}

struct Driver {
    url: Url,
    socket: InboxSocket,
    state: Arc<RwLock<SocketState>>,
    router: MessageRouter,
    lifecycle: Listeners<SocketEvent>,
    stream: Option<WsStream>,
    dialing: Option<Dial>,
    retry_at: Option<Instant>,
    ping_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::debug!("Push client task started for {}", self.url.path());
        loop {
            let effects = match self.next_wake(&mut commands).await {
                Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => break,
                Wake::Command(Some(Command::Connect)) => self.socket.connect(),
                Wake::Command(Some(Command::Close { code, reason })) => {
                    self.socket.close(code, &reason)
                }
                Wake::Command(Some(Command::Send(envelope))) => self.socket.send(envelope),
                Wake::Dialed(result) => {
                    self.dialing = None;
                    match result {
                        Ok(stream) => {
                            self.stream = Some(stream);
                            self.socket.handle_open()
                        }
                        Err(e) => self.socket.handle_error(&e.to_string()),
                    }
                }
                Wake::Frame(frame) => self.handle_frame(frame),
                Wake::RetryElapsed => {
                    self.retry_at = None;
                    self.socket.retry_elapsed()
                }
                Wake::PingElapsed => {
                    self.ping_at = None;
                    self.socket.ping_elapsed()
                }
            };
            self.apply(effects).await;
            self.sync_state();
        }

        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
        *self.state.write() = SocketState::Idle;
        log::debug!("Push client task stopped");
    }

    async fn next_wake(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Wake {
        let retry_deadline = self.retry_at.unwrap_or_else(|| deadline_after(FAR_FUTURE));
        let ping_deadline = self.ping_at.unwrap_or_else(|| deadline_after(FAR_FUTURE));
        let dialing = &mut self.dialing;
        let stream = &mut self.stream;

        tokio::select! {
            command = commands.recv() => Wake::Command(command),
            result = async {
                match dialing.as_mut() {
                    Some(dial) => dial.await,
                    None => std::future::pending().await,
                }
            } => Wake::Dialed(result),
            frame = async {
                match stream.as_mut() {
                    Some(stream) => stream.next().await,
                    None => std::future::pending().await,
                }
            } => Wake::Frame(frame),
            _ = tokio::time::sleep_until(retry_deadline) => Wake::RetryElapsed,
            _ = tokio::time::sleep_until(ping_deadline) => Wake::PingElapsed,
        }
    }

    fn handle_frame(&mut self, frame: Option<Result<WsMessage, WsError>>) -> Vec<Effect> {
        match frame {
            Some(Ok(WsMessage::Text(text))) => self.socket.handle_text(text.as_str()),
            Some(Ok(WsMessage::Close(frame))) => {
                self.stream = None;
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                    .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                self.socket.handle_close(code, &reason)
            }
            Some(Ok(_)) => Vec::new(),
            Some(Err(e)) => {
                self.stream = None;
                let mut effects = self.socket.handle_error(&e.to_string());
                effects.extend(self.socket.handle_close(ABNORMAL_CLOSURE, ""));
                effects
            }
            None => {
                self.stream = None;
                self.socket.handle_close(ABNORMAL_CLOSURE, "")
            }
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: std::collections::VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Open => {
                    let url = self.url.to_string();
                    log::debug!("Dialing push socket");
                    self.dialing = Some(Box::pin(async move {
                        tokio_tungstenite::connect_async(url)
                            .await
                            .map(|(stream, _)| stream)
                    }));
                }
                Effect::Send(text) => match self.stream.as_mut() {
                    Some(stream) => {
                        if let Err(e) = stream.send(WsMessage::Text(text.into())).await {
                            log::warn!("Failed to write frame: {e}");
                        }
                    }
                    None => log::warn!("Dropping outbound frame, no transport"),
                },
                Effect::Close { code, reason } => {
                    self.dialing = None;
                    if let Some(mut stream) = self.stream.take() {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        if let Err(e) = stream.close(Some(frame)).await {
                            log::debug!("Close handshake failed: {e}");
                        }
                    }
                    queue.extend(self.socket.handle_close(code, &reason));
                }
                Effect::ScheduleRetry(delay) => self.retry_at = Some(deadline_after(delay)),
                Effect::CancelRetry => self.retry_at = None,
                Effect::SchedulePing(delay) => self.ping_at = Some(deadline_after(delay)),
                Effect::CancelPing => self.ping_at = None,
                Effect::Notify(event) => {
                    self.sync_state();
                    if let SocketEvent::Message(message) = &event {
                        self.router.dispatch(message);
                    }
                    self.lifecycle.emit(&event);
                }
            }
        }
    }

    fn sync_state(&self) {
        *self.state.write() = self.socket.state();
    }
}
