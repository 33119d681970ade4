//! In-memory mail store.
//!
//! Behaves like a single IMAP folder addressed by UID: ids start at 1 and are
//! never reused. Used by the test suite and by embedders that feed messages
//! in from elsewhere. [`MemoryStore::set_offline`] makes every call fail, to
//! exercise error propagation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{MailbotError, Result};
use crate::model::flag::{Flag, FlagQuery};
use crate::model::message::MessageId;

use super::{FetchItem, Fetched, MailStore};

#[derive(Debug, Clone)]
struct StoredMessage {
    raw: Vec<u8>,
    flags: BTreeSet<Flag>,
    internal_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    messages: BTreeMap<MessageId, StoredMessage>,
    next_uid: u32,
    offline: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            messages: BTreeMap::new(),
            next_uid: 1,
            offline: false,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message with no flags.
    pub fn append(&mut self, raw: impl Into<Vec<u8>>, internal_date: DateTime<Utc>) -> MessageId {
        self.append_with_flags(raw, internal_date, &[])
    }

    /// Append a message carrying `flags`.
    pub fn append_with_flags(
        &mut self,
        raw: impl Into<Vec<u8>>,
        internal_date: DateTime<Utc>,
        flags: &[Flag],
    ) -> MessageId {
        let id = MessageId(self.next_uid);
        self.next_uid += 1;
        self.messages.insert(
            id,
            StoredMessage {
                raw: raw.into(),
                flags: flags.iter().copied().collect(),
                internal_date,
            },
        );
        id
    }

    /// Remove a message, as an expunge would.
    pub fn expunge(&mut self, id: MessageId) -> bool {
        self.messages.remove(&id).is_some()
    }

    /// Current flags of a message.
    pub fn flags(&self, id: MessageId) -> Option<&BTreeSet<Flag>> {
        self.messages.get(&id).map(|m| &m.flags)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// While offline, every [`MailStore`] call fails with a store error.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    fn ensure_online(&self, operation: &'static str) -> Result<()> {
        if self.offline {
            return Err(MailbotError::store(operation, "mailbox unreachable"));
        }
        Ok(())
    }

    fn update_flags(
        &mut self,
        ids: &[MessageId],
        mut apply: impl FnMut(&mut BTreeSet<Flag>),
    ) -> Result<()> {
        // Validate first so an unknown id leaves every message untouched
        if let Some(missing) = ids.iter().find(|id| !self.messages.contains_key(*id)) {
            return Err(MailbotError::UnknownMessage(*missing));
        }
        for id in ids {
            if let Some(msg) = self.messages.get_mut(id) {
                apply(&mut msg.flags);
            }
        }
        Ok(())
    }
}

impl MailStore for MemoryStore {
    fn search(&mut self, query: &FlagQuery) -> Result<Vec<MessageId>> {
        self.ensure_online("search")?;
        let ids: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|(_, m)| query.matches(&m.flags))
            .map(|(id, _)| *id)
            .collect();
        debug!(query = %query, found = ids.len(), "Searched memory store");
        Ok(ids)
    }

    fn fetch(
        &mut self,
        ids: &[MessageId],
        items: &[FetchItem],
    ) -> Result<BTreeMap<MessageId, Fetched>> {
        self.ensure_online("fetch")?;
        let mut result = BTreeMap::new();
        for id in ids {
            let Some(msg) = self.messages.get(id) else {
                continue;
            };
            let mut fetched = Fetched::default();
            for item in items {
                match item {
                    FetchItem::Raw => fetched.raw = Some(msg.raw.clone()),
                    FetchItem::InternalDate => fetched.internal_date = Some(msg.internal_date),
                    FetchItem::Flags => fetched.flags = Some(msg.flags.clone()),
                }
            }
            result.insert(*id, fetched);
        }
        Ok(result)
    }

    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        self.ensure_online("add flags")?;
        self.update_flags(ids, |set| set.extend(flags.iter().copied()))
    }

    fn remove_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        self.ensure_online("remove flags")?;
        self.update_flags(ids, |set| {
            for flag in flags {
                set.remove(flag);
            }
        })
    }
}
