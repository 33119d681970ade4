//! Mail store interface: the remote (or local) mailbox the lease protocol
//! reads messages from and writes flags to.

pub mod maildir;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::flag::{Flag, FlagQuery};
use crate::model::message::MessageId;

/// Data items [`MailStore::fetch`] can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItem {
    /// The full RFC 5322 message bytes.
    Raw,
    /// The store's received/claim timestamp.
    InternalDate,
    /// The message's current flags.
    Flags,
}

/// Data returned for one message. Only the requested items are populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    pub raw: Option<Vec<u8>>,
    pub internal_date: Option<DateTime<Utc>>,
    pub flags: Option<BTreeSet<Flag>>,
}

/// A mailbox whose messages carry flags.
///
/// Every method may fail with a transport error; callers propagate it.
/// Flag mutation on a single message is assumed atomic; nothing is atomic
/// across messages.
pub trait MailStore {
    /// Ids of messages whose flags satisfy `query`, ascending.
    fn search(&mut self, query: &FlagQuery) -> Result<Vec<MessageId>>;

    /// Fetch `items` for each id. Ids unknown to the store are omitted.
    fn fetch(
        &mut self,
        ids: &[MessageId],
        items: &[FetchItem],
    ) -> Result<BTreeMap<MessageId, Fetched>>;

    /// Add `flags` to each message. Flags already set are left as they are.
    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()>;

    /// Remove `flags` from each message. Flags already clear are left as they are.
    fn remove_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()>;
}

impl<S: MailStore + ?Sized> MailStore for &mut S {
    fn search(&mut self, query: &FlagQuery) -> Result<Vec<MessageId>> {
        (**self).search(query)
    }

    fn fetch(
        &mut self,
        ids: &[MessageId],
        items: &[FetchItem],
    ) -> Result<BTreeMap<MessageId, Fetched>> {
        (**self).fetch(ids, items)
    }

    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        (**self).add_flags(ids, flags)
    }

    fn remove_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        (**self).remove_flags(ids, flags)
    }
}

impl<S: MailStore + ?Sized> MailStore for Box<S> {
    fn search(&mut self, query: &FlagQuery) -> Result<Vec<MessageId>> {
        (**self).search(query)
    }

    fn fetch(
        &mut self,
        ids: &[MessageId],
        items: &[FetchItem],
    ) -> Result<BTreeMap<MessageId, Fetched>> {
        (**self).fetch(ids, items)
    }

    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        (**self).add_flags(ids, flags)
    }

    fn remove_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        (**self).remove_flags(ids, flags)
    }
}
