//! Declarative dataset filters.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// How a dataset treats messages in a given state.
///
/// An absent mode (`None` on the filter) accepts both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inclusion {
    /// Exclude messages in the state.
    Hide,
    /// Accept only messages in the state.
    Only,
}

impl Inclusion {
    fn admits(self, in_state: bool) -> bool {
        match self {
            Self::Hide => !in_state,
            Self::Only => in_state,
        }
    }
}

/// Predicate deciding whether a message belongs to a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "FilterRepr")]
pub struct DatasetFilter {
    /// The message must carry at least one of these tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<Inclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Inclusion>,
}

impl DatasetFilter {
    /// Everything that has not been archived.
    pub fn inbox() -> Self {
        Self {
            archived: Some(Inclusion::Hide),
            ..Self::default()
        }
    }

    /// Archived messages only.
    pub fn archive() -> Self {
        Self {
            archived: Some(Inclusion::Only),
            ..Self::default()
        }
    }

    /// Unread, unarchived messages.
    pub fn unread() -> Self {
        Self {
            archived: Some(Inclusion::Hide),
            read: Some(Inclusion::Hide),
            ..Self::default()
        }
    }

    /// Unarchived messages carrying any of `tags`.
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: Some(tags.into_iter().map(Into::into).collect()),
            archived: Some(Inclusion::Hide),
            ..Self::default()
        }
    }

    pub fn with_archived(mut self, mode: Option<Inclusion>) -> Self {
        self.archived = mode;
        self
    }

    pub fn with_read(mut self, mode: Option<Inclusion>) -> Self {
        self.read = mode;
        self
    }

    /// Whether `message` satisfies this filter.
    pub fn qualifies(&self, message: &Message) -> bool {
        if let Some(tags) = self.tags.as_deref() {
            if !tags.is_empty() && !tags.iter().any(|tag| message.has_tag(tag)) {
                return false;
            }
        }
        if let Some(mode) = self.archived {
            if !mode.admits(message.is_archived()) {
                return false;
            }
        }
        if let Some(mode) = self.read {
            if !mode.admits(!message.is_unread()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReadStatus {
    Read,
    Unread,
}

/// Accepted JSON shape, including the `status` shorthand.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterRepr {
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    archived: Option<Inclusion>,
    #[serde(default)]
    read: Option<Inclusion>,
    #[serde(default)]
    status: Option<ReadStatus>,
}

impl From<FilterRepr> for DatasetFilter {
    fn from(repr: FilterRepr) -> Self {
        let read = repr.read.or(match repr.status {
            Some(ReadStatus::Unread) => Some(Inclusion::Hide),
            Some(ReadStatus::Read) => Some(Inclusion::Only),
            None => None,
        });
        Self {
            tags: repr.tags,
            archived: repr.archived,
            read,
        }
    }
}
