//! Inbox message model and the state mutations applied to it.
//!
//! A message's identity (`message_id`) never changes. Everything the inbox
//! filters on is derived from the presence or absence of the four state
//! timestamps (`created`, `read`, `archived`, `opened`).
//!
//! Mutations are copy-on-write: [`MessageMutation::apply`] returns a new
//! message and leaves its input untouched, which is what makes rollback a
//! matter of putting the original copy back.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A call-to-action attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAction {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Server-issued tracking ids used by the mutation API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_tracking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_tracking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_tracking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_tracking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_tracking_id: Option<String>,
}

/// A single inbox message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<MessageAction>,
    /// Arbitrary payload supplied by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub created: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub read: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub archived: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub opened: Option<OffsetDateTime>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_ids: Option<TrackingIds>,
}

impl Message {
    /// Create a bare message with only an id and a creation time.
    pub fn new(message_id: impl Into<String>, created: OffsetDateTime) -> Self {
        Self {
            message_id: message_id.into(),
            title: None,
            body: None,
            preview: None,
            actions: Vec::new(),
            data: None,
            created: Some(created),
            read: None,
            archived: None,
            opened: None,
            tags: Vec::new(),
            tracking_ids: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Unread is defined solely by the absence of a `read` timestamp.
    pub fn is_unread(&self) -> bool {
        self.read.is_none()
    }

    pub fn is_archived(&self) -> bool {
        self.archived.is_some()
    }

    pub fn is_opened(&self) -> bool {
        self.opened.is_some()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Tracking id for the click API, if the server issued one.
    pub fn click_tracking_id(&self) -> Option<&str> {
        self.tracking_ids
            .as_ref()
            .and_then(|ids| ids.click_tracking_id.as_deref())
    }
}

/// A single-message state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageMutation {
    Read,
    Unread,
    Open,
    Unopen,
    Archive,
    Unarchive,
}

impl MessageMutation {
    /// Return a copy of `message` with this mutation applied at `at`.
    pub fn apply(self, message: &Message, at: OffsetDateTime) -> Message {
        let mut next = message.clone();
        match self {
            Self::Read => {
                next.read.get_or_insert(at);
            }
            Self::Unread => next.read = None,
            Self::Open => {
                next.opened.get_or_insert(at);
            }
            Self::Unopen => next.opened = None,
            Self::Archive => {
                next.archived.get_or_insert(at);
            }
            Self::Unarchive => next.archived = None,
        }
        next
    }

    /// Whether applying this mutation would leave `message` unchanged.
    pub fn is_noop(self, message: &Message) -> bool {
        match self {
            Self::Read => message.read.is_some(),
            Self::Unread => message.read.is_none(),
            Self::Open => message.opened.is_some(),
            Self::Unopen => message.opened.is_none(),
            Self::Archive => message.archived.is_some(),
            Self::Unarchive => message.archived.is_none(),
        }
    }

    /// Opening is one-way: a failed open is never rolled back.
    pub fn is_reversible(self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Copy `current`, putting back the field this mutation touches as it
    /// was on `original`. Other fields keep their current values.
    pub fn restore(self, current: &Message, original: &Message) -> Message {
        let mut restored = current.clone();
        match self {
            Self::Read | Self::Unread => restored.read = original.read,
            Self::Open | Self::Unopen => restored.opened = original.opened,
            Self::Archive | Self::Unarchive => restored.archived = original.archived,
        }
        restored
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Unread => "unread",
            Self::Open => "opened",
            Self::Unopen => "unopened",
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
        }
    }
}

impl std::fmt::Display for MessageMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
