//! Collaborator interface for the snapshot and mutation network calls.
//!
//! The datastore never builds requests itself; an application supplies an
//! [`InboxApi`] (REST, GraphQL, a test double) and the datastore treats each
//! call as succeeded-or-failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::filter::DatasetFilter;
use crate::message::{Message, MessageMutation};

/// One page of messages returned by the snapshot API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub can_paginate: bool,
    #[serde(default)]
    pub pagination_cursor: Option<String>,
    /// Server-side unread total for the whole dataset, not just this page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<usize>,
}

/// Snapshot request for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub dataset_id: String,
    pub filter: DatasetFilter,
    /// `None` requests the first page.
    pub cursor: Option<String>,
    pub limit: usize,
}

/// A server-side state change requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRequest {
    Message {
        message_id: String,
        mutation: MessageMutation,
    },
    Click {
        message_id: String,
        tracking_id: Option<String>,
    },
    ReadAll,
    ArchiveAll,
    ArchiveRead,
}

impl MutationRequest {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Message { message_id, .. } | Self::Click { message_id, .. } => Some(message_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { mutation, .. } => mutation.as_str(),
            Self::Click { .. } => "clicked",
            Self::ReadAll => "mark-all-read",
            Self::ArchiveAll => "archive-all",
            Self::ArchiveRead => "archive-read",
        }
    }
}

#[async_trait]
pub trait InboxApi: Send + Sync {
    async fn fetch_messages(&self, query: FetchQuery) -> Result<MessagePage, ApiError>;

    async fn mutate(&self, request: MutationRequest) -> Result<(), ApiError>;
}
