//! Flag-based lease protocol.
//!
//! Processing state lives entirely in two mailbox flags:
//!
//! | state      | `\Seen` | `\Flagged` |
//! |------------|---------|------------|
//! | unclaimed  | no      | no         |
//! | claimed    | yes     | yes        |
//! | processed  | yes     | no         |
//!
//! Every transition is a single flag mutation per message (or a remove
//! followed by an add that passes only through legal states), so a failure
//! at any point leaves the message in one of the three states above.
//!
//! This is a single-writer lease: two bots polling the same mailbox can
//! both claim one message.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::flag::{Flag, FlagQuery};
use crate::model::message::MessageId;
use crate::store::{FetchItem, MailStore};

/// Processing state encoded by a message's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Unclaimed,
    Claimed,
    Processed,
}

impl LeaseState {
    /// Decode flags. `\Flagged` without `\Seen` is not a lease state (a user
    /// flagged an unread message) and yields `None`.
    pub fn from_flags(flags: &BTreeSet<Flag>) -> Option<Self> {
        match (flags.contains(&Flag::Seen), flags.contains(&Flag::Flagged)) {
            (false, false) => Some(LeaseState::Unclaimed),
            (true, true) => Some(LeaseState::Claimed),
            (true, false) => Some(LeaseState::Processed),
            (false, true) => None,
        }
    }

    /// Search predicate selecting messages in this state.
    pub fn query(self) -> FlagQuery {
        match self {
            LeaseState::Unclaimed => FlagQuery::new().without(Flag::Seen).without(Flag::Flagged),
            LeaseState::Claimed => FlagQuery::new().with(Flag::Flagged).with(Flag::Seen),
            LeaseState::Processed => FlagQuery::new().with(Flag::Seen).without(Flag::Flagged),
        }
    }
}

/// Ids of messages nobody has claimed or processed.
pub fn select_unclaimed<S: MailStore + ?Sized>(store: &mut S) -> Result<Vec<MessageId>> {
    store.search(&LeaseState::Unclaimed.query())
}

/// Unclaimed → Claimed. Claiming a message that is already claimed or
/// processed leaves its flags unchanged.
pub fn claim<S: MailStore + ?Sized>(store: &mut S, id: MessageId) -> Result<()> {
    let current = store
        .fetch(&[id], &[FetchItem::Flags])?
        .remove(&id)
        .and_then(|f| f.flags);
    if let Some(flags) = current {
        if matches!(
            LeaseState::from_flags(&flags),
            Some(LeaseState::Claimed | LeaseState::Processed)
        ) {
            debug!(id = %id, "Message already claimed or processed");
            return Ok(());
        }
    }

    debug!(id = %id, "Claiming message");
    store.add_flags(&[id], &[Flag::Flagged, Flag::Seen])
}

/// Claimed → Processed. Finalizing twice leaves the flags unchanged.
pub fn finalize<S: MailStore + ?Sized>(store: &mut S, id: MessageId) -> Result<()> {
    debug!(id = %id, "Finalizing message");
    store.remove_flags(&[id], &[Flag::Flagged])?;
    store.add_flags(&[id], &[Flag::Seen])
}

/// Release claims older than `timeout` back to Unclaimed.
///
/// A claim's age is measured from the store's internal date, compared in
/// UTC. With `timeout` of `None` nothing is queried. A zero or negative
/// timeout treats every claim dated before `now` as stale. A timeout reaching
/// past the calendar range means no claim (positive) or every claim
/// (negative) is stale.
///
/// Returns the released ids.
pub fn recover_timeouts<S: MailStore + ?Sized>(
    store: &mut S,
    timeout: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<Vec<MessageId>> {
    let Some(timeout) = timeout else {
        return Ok(Vec::new());
    };

    let claimed = store.search(&LeaseState::Claimed.query())?;
    if claimed.is_empty() {
        return Ok(Vec::new());
    }

    let stale: Vec<MessageId> = match now.naive_utc().checked_sub_signed(timeout) {
        Some(pivot) => store
            .fetch(&claimed, &[FetchItem::InternalDate])?
            .into_iter()
            .filter(|(_, fetched)| {
                fetched
                    .internal_date
                    .is_some_and(|date| date.naive_utc() < pivot)
            })
            .map(|(id, _)| id)
            .collect(),
        None if timeout > Duration::zero() => Vec::new(),
        None => claimed,
    };

    if !stale.is_empty() {
        store.remove_flags(&stale, &[Flag::Flagged, Flag::Seen])?;
        info!(count = stale.len(), "Released timed-out claims");
    }
    Ok(stale)
}
