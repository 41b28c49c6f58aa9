//! # inbox-core — message model and optimistic multi-view datastore
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!  user action ──►│          Datastore           │◄── PushEvent (from inbox-sync)
//!                 │  optimistic apply + rollback │
//!                 └──────┬───────────────┬───────┘
//!                        │               │ InboxApi (fetch / mutate)
//!          ┌─────────────┼─────────────┐ ▼
//!          ▼             ▼             ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ Dataset    │ │ Dataset    │ │ Dataset    │
//!   │ "inbox"    │ │ "archive"  │ │ "important"│
//!   └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`message`] — `Message` and copy-on-write `MessageMutation`s
//! - [`filter`] — `DatasetFilter` qualification
//! - [`dataset`] — one ordered, filtered view with its unread count
//! - [`datastore`] — the coordinator owning every dataset of a session
//! - [`api`] — the `InboxApi` collaborator trait
//! - [`listeners`] — observer registry with disposer handles

pub mod api;
pub mod dataset;
pub mod datastore;
pub mod error;
pub mod filter;
pub mod listeners;
pub mod message;

pub use api::{FetchQuery, InboxApi, MessagePage, MutationRequest};
pub use dataset::{Dataset, DatasetEvent, DatasetSnapshot};
pub use datastore::{
    Datastore, DatastoreConfig, DatastoreEvent, LoadOptions, MutationOutcome, PushEvent,
};
pub use error::{ApiError, DatastoreError};
pub use filter::{DatasetFilter, Inclusion};
pub use listeners::{Listeners, Subscription};
pub use message::{Message, MessageAction, MessageMutation, TrackingIds};
