//! # inbox-sync — push transport for the inbox
//!
//! Keeps a WebSocket open to the inbox server, survives drops with jittered
//! backoff, checks liveness with pings, and feeds pushed message events into
//! an `inbox_core::Datastore`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   commands    ┌──────────────────────────────────┐
//! │ PushClient   │ ────────────► │ driver task (tokio::select!)     │
//! │ (handle)     │               │  ┌────────────────────────────┐  │
//! └──────┬───────┘               │  │ InboxSocket (sans-IO)      │  │
//!        │ listeners             │  │  ConnectionManager         │  │
//!        ▼                       │  │  Heartbeat                 │  │
//! ┌──────────────┐  PushEvent    │  │  TransactionManager        │  │
//! │ MessageRouter│ ──────────┐   │  └────────────────────────────┘  │
//! └──────────────┘           │   └───────────────┬──────────────────┘
//!                            ▼                   │ JSON text frames
//!                    ┌──────────────┐            ▼
//!                    │  Datastore   │      inbox server
//!                    └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelopes and server frame decoding
//! - [`transaction`] — request/response correlation by `tid`
//! - [`backoff`] — reconnect schedule with jitter
//! - [`connection`] — lifecycle state machine emitting effects
//! - [`heartbeat`] — ping scheduling and timeout detection
//! - [`socket`] — the three above composed
//! - [`router`] — message event fan-out and push-event mapping
//! - [`client`] — tokio-tungstenite driver task
//! - [`session`] — a signed-in user's datastore plus socket

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod heartbeat;
pub mod protocol;
pub mod router;
pub mod session;
pub mod socket;
pub mod transaction;

pub use backoff::Backoff;
pub use client::{ClientError, PushClient};
pub use config::{ConfigError, ConnectionConfig, SessionConfig};
pub use connection::{ConnectionManager, Effect, SocketEvent, SocketState};
pub use heartbeat::{Heartbeat, Tick};
pub use protocol::{
    ClientAction, ClientEnvelope, EventKind, HeartbeatConfig, MessageEvent, ProtocolError,
    ReconnectDirective, ServerFrame, ServerResponse,
};
pub use router::{to_push_event, MessageRouter};
pub use session::{InboxSession, SessionError};
pub use socket::InboxSocket;
pub use transaction::{Transaction, TransactionError, TransactionManager};
