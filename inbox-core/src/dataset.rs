//! A single filtered, ordered view over the message universe.
//!
//! ```text
//!            add_message / update_with_message_change / bulk ops
//!                               │
//!                               ▼
//!  ┌──────────────────────────────────────────────────────────┐
//!  │ Dataset "unread"   filter { archived: hide, read: hide } │
//!  │                                                          │
//!  │  messages (newest created first)   unread_count          │
//!  │  can_paginate / pagination_cursor  pending events        │
//!  └──────────────────────────────────────────────────────────┘
//!                               │ take_events()
//!                               ▼
//!                          DatasetEvent*
//! ```
//!
//! `unread_count` is not recomputed from `messages`: the server may report
//! a total for messages that have not been paged in yet, so the count is
//! seeded from the snapshot and moved by deltas afterwards.

use serde::Serialize;
use time::OffsetDateTime;

use crate::api::MessagePage;
use crate::filter::DatasetFilter;
use crate::message::{Message, MessageMutation};

/// Change notifications queued by a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetEvent {
    MessageAdded {
        dataset_id: String,
        index: usize,
        message: Message,
    },
    MessageRemoved {
        dataset_id: String,
        index: usize,
        message: Message,
    },
    MessageUpdated {
        dataset_id: String,
        index: usize,
        message: Message,
    },
    UnreadCountChanged {
        dataset_id: String,
        unread_count: usize,
    },
    /// Contents were replaced wholesale (snapshot load or bulk rebuild).
    Reset {
        dataset_id: String,
    },
    PageAdded {
        dataset_id: String,
        messages: Vec<Message>,
        can_paginate: bool,
    },
}

impl DatasetEvent {
    pub fn dataset_id(&self) -> &str {
        match self {
            Self::MessageAdded { dataset_id, .. }
            | Self::MessageRemoved { dataset_id, .. }
            | Self::MessageUpdated { dataset_id, .. }
            | Self::UnreadCountChanged { dataset_id, .. }
            | Self::Reset { dataset_id }
            | Self::PageAdded { dataset_id, .. } => dataset_id,
        }
    }
}

/// Owned copy of a dataset's visible state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSnapshot {
    pub id: String,
    pub filter: DatasetFilter,
    pub messages: Vec<Message>,
    pub can_paginate: bool,
    pub pagination_cursor: Option<String>,
    pub unread_count: usize,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    id: String,
    filter: DatasetFilter,
    messages: Vec<Message>,
    can_paginate: bool,
    pagination_cursor: Option<String>,
    unread_count: usize,
    loaded: bool,
    events: Vec<DatasetEvent>,
}

impl Dataset {
    pub fn new(id: impl Into<String>, filter: DatasetFilter) -> Self {
        Self {
            id: id.into(),
            filter,
            messages: Vec::new(),
            can_paginate: false,
            pagination_cursor: None,
            unread_count: 0,
            loaded: false,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filter(&self) -> &DatasetFilter {
        &self.filter
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn can_paginate(&self) -> bool {
        self.can_paginate
    }

    pub fn pagination_cursor(&self) -> Option<&str> {
        self.pagination_cursor.as_deref()
    }

    /// Whether a snapshot has been loaded since creation.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn qualifies(&self, message: &Message) -> bool {
        self.filter.qualifies(message)
    }

    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.message_id == message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.position(message_id).is_some()
    }

    pub fn snapshot(&self) -> DatasetSnapshot {
        DatasetSnapshot {
            id: self.id.clone(),
            filter: self.filter.clone(),
            messages: self.messages.clone(),
            can_paginate: self.can_paginate,
            pagination_cursor: self.pagination_cursor.clone(),
            unread_count: self.unread_count,
        }
    }

    /// Drain the queued change notifications.
    pub fn take_events(&mut self) -> Vec<DatasetEvent> {
        std::mem::take(&mut self.events)
    }

    /// Overwrite the unread count with a server-reported total.
    pub fn set_unread_count(&mut self, count: usize) {
        if self.unread_count != count {
            self.unread_count = count;
            self.push_unread_changed();
        }
    }

    /// Replace the contents with a first-page snapshot.
    pub fn replace_with_page(&mut self, page: MessagePage) {
        self.messages.clear();
        for message in page.messages {
            if self.filter.qualifies(&message) && !self.contains(&message.message_id) {
                let index = self.insert_index(&message);
                self.messages.insert(index, message);
            }
        }
        self.can_paginate = page.can_paginate;
        self.pagination_cursor = page.pagination_cursor;
        self.loaded = true;

        let counted = self.messages.iter().filter(|m| m.is_unread()).count();
        let unread = page.unread_count.unwrap_or(counted);
        self.events.push(DatasetEvent::Reset {
            dataset_id: self.id.clone(),
        });
        self.unread_count = unread;
        self.push_unread_changed();
    }

    /// Merge a subsequent page fetched with the pagination cursor.
    pub fn append_page(&mut self, page: MessagePage) {
        let mut added = Vec::with_capacity(page.messages.len());
        for message in page.messages {
            if !self.filter.qualifies(&message) || self.contains(&message.message_id) {
                continue;
            }
            let index = self.insert_index(&message);
            self.messages.insert(index, message.clone());
            added.push(message);
        }
        self.can_paginate = page.can_paginate;
        self.pagination_cursor = page.pagination_cursor;

        self.events.push(DatasetEvent::PageAdded {
            dataset_id: self.id.clone(),
            messages: added,
            can_paginate: self.can_paginate,
        });
        if let Some(count) = page.unread_count {
            self.set_unread_count(count);
        }
    }

    /// Insert a copy of `message` if it qualifies. Returns whether it did.
    ///
    /// A message already held under the same id is replaced in place, or
    /// removed when the new version no longer qualifies.
    pub fn add_message(&mut self, message: &Message) -> bool {
        if let Some(existing) = self.get(&message.message_id).cloned() {
            return self.update_with_message_change(&existing, message);
        }
        if !self.filter.qualifies(message) {
            return false;
        }

        let index = self.insert_index(message);
        self.messages.insert(index, message.clone());
        self.events.push(DatasetEvent::MessageAdded {
            dataset_id: self.id.clone(),
            index,
            message: message.clone(),
        });
        if message.is_unread() {
            self.adjust_unread(1);
        }
        true
    }

    /// Remove a message by id, returning the stored copy.
    pub fn remove_message(&mut self, message_id: &str) -> Option<Message> {
        let index = self.position(message_id)?;
        let removed = self.messages.remove(index);
        self.events.push(DatasetEvent::MessageRemoved {
            dataset_id: self.id.clone(),
            index,
            message: removed.clone(),
        });
        if removed.is_unread() {
            self.adjust_unread(-1);
        }
        Some(removed)
    }

    /// Re-evaluate membership after a message changed from `before` to
    /// `after`. Returns whether `after` qualifies for this dataset.
    ///
    /// Equal `before` and `after` change nothing but still return
    /// `qualifies(after)`, so a no-op can return `false`.
    ///
    /// The unread count moves by `counted(after) - counted(before)`, where a
    /// message is counted when it qualifies and is unread. This holds whether
    /// or not the message has been paged in, so a server-seeded count is
    /// neither double counted nor left stale.
    ///
    /// A replacement keeps its position; callers changing `created` must
    /// remove and re-add instead.
    pub fn update_with_message_change(&mut self, before: &Message, after: &Message) -> bool {
        let qualifies_after = self.filter.qualifies(after);
        if before == after {
            return qualifies_after;
        }

        let counted_before = self.filter.qualifies(before) && before.is_unread();
        let counted_after = qualifies_after && after.is_unread();

        match (self.position(&after.message_id), qualifies_after) {
            (Some(index), true) => {
                self.messages[index] = after.clone();
                self.events.push(DatasetEvent::MessageUpdated {
                    dataset_id: self.id.clone(),
                    index,
                    message: after.clone(),
                });
            }
            (Some(index), false) => {
                let removed = self.messages.remove(index);
                self.events.push(DatasetEvent::MessageRemoved {
                    dataset_id: self.id.clone(),
                    index,
                    message: removed,
                });
            }
            (None, true) => {
                let index = self.insert_index(after);
                self.messages.insert(index, after.clone());
                self.events.push(DatasetEvent::MessageAdded {
                    dataset_id: self.id.clone(),
                    index,
                    message: after.clone(),
                });
            }
            (None, false) => {}
        }

        self.adjust_unread(i64::from(counted_after) - i64::from(counted_before));
        qualifies_after
    }

    /// Archive every held message.
    pub fn archive_all_messages(&mut self, at: OffsetDateTime) {
        self.rebuild(|m| Some(MessageMutation::Archive.apply(m, at)));
        if self.filter.archived == Some(crate::filter::Inclusion::Hide) {
            self.set_unread_count(0);
        }
    }

    /// Archive every held message that has been read.
    pub fn archive_read_messages(&mut self, at: OffsetDateTime) {
        self.rebuild(|m| (!m.is_unread()).then(|| MessageMutation::Archive.apply(m, at)));
    }

    /// Mark every held message read.
    pub fn read_all_messages(&mut self, at: OffsetDateTime) {
        self.rebuild(|m| Some(MessageMutation::Read.apply(m, at)));
        self.set_unread_count(0);
    }

    /// Restore a previously taken snapshot (bulk rollback).
    pub fn restore(&mut self, snapshot: &DatasetSnapshot) {
        self.messages = snapshot.messages.clone();
        self.can_paginate = snapshot.can_paginate;
        self.pagination_cursor = snapshot.pagination_cursor.clone();
        self.events.push(DatasetEvent::Reset {
            dataset_id: self.id.clone(),
        });
        self.set_unread_count(snapshot.unread_count);
    }

    /// Apply `mutate` to every held message (returning `None` leaves it as
    /// is) and keep only the results that still qualify.
    fn rebuild<F>(&mut self, mutate: F)
    where
        F: Fn(&Message) -> Option<Message>,
    {
        let mut delta = 0i64;
        let mut kept = Vec::with_capacity(self.messages.len());
        for message in self.messages.drain(..) {
            let Some(next) = mutate(&message) else {
                kept.push(message);
                continue;
            };
            let qualifies = self.filter.qualifies(&next);
            delta += i64::from(qualifies && next.is_unread()) - i64::from(message.is_unread());
            if qualifies {
                kept.push(next);
            }
        }
        self.messages = kept;
        self.events.push(DatasetEvent::Reset {
            dataset_id: self.id.clone(),
        });
        self.adjust_unread(delta);
    }

    /// First index whose message is strictly older than `message`.
    fn insert_index(&self, message: &Message) -> usize {
        self.messages
            .iter()
            .position(|m| m.created < message.created)
            .unwrap_or(self.messages.len())
    }

    fn adjust_unread(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }
        let next = if delta > 0 {
            self.unread_count.saturating_add(delta.unsigned_abs() as usize)
        } else {
            self.unread_count.saturating_sub(delta.unsigned_abs() as usize)
        };
        if next != self.unread_count {
            self.unread_count = next;
            self.push_unread_changed();
        }
    }

    fn push_unread_changed(&mut self) {
        self.events.push(DatasetEvent::UnreadCountChanged {
            dataset_id: self.id.clone(),
            unread_count: self.unread_count,
        });
    }
}
