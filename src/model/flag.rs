//! Mailbox flags and flag-based search predicates.

use std::collections::BTreeSet;
use std::fmt;

/// A system flag the lease protocol reads and writes.
///
/// The `Display` format is the IMAP wire form (`\Seen`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Seen,
    Flagged,
}

impl Flag {
    /// The letter used for this flag in a Maildir info suffix (`:2,FS`).
    pub fn maildir_char(self) -> char {
        match self {
            Flag::Seen => 'S',
            Flag::Flagged => 'F',
        }
    }

    /// Reverse of [`Flag::maildir_char`]. Other Maildir letters map to `None`.
    pub fn from_maildir_char(c: char) -> Option<Flag> {
        match c {
            'S' => Some(Flag::Seen),
            'F' => Some(Flag::Flagged),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Flagged => write!(f, "\\Flagged"),
        }
    }
}

/// Search predicate over a message's flags: every flag in `set` must be
/// present and every flag in `unset` must be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagQuery {
    pub set: Vec<Flag>,
    pub unset: Vec<Flag>,
}

impl FlagQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `flag` to be present.
    pub fn with(mut self, flag: Flag) -> Self {
        self.set.push(flag);
        self
    }

    /// Require `flag` to be absent.
    pub fn without(mut self, flag: Flag) -> Self {
        self.unset.push(flag);
        self
    }

    /// Does a message carrying `flags` satisfy this query?
    pub fn matches(&self, flags: &BTreeSet<Flag>) -> bool {
        self.set.iter().all(|f| flags.contains(f)) && self.unset.iter().all(|f| !flags.contains(f))
    }
}

impl fmt::Display for FlagQuery {
    /// IMAP SEARCH keys, e.g. `UNSEEN UNFLAGGED`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = Vec::new();
        for flag in &self.set {
            keys.push(match flag {
                Flag::Seen => "SEEN",
                Flag::Flagged => "FLAGGED",
            });
        }
        for flag in &self.unset {
            keys.push(match flag {
                Flag::Seen => "UNSEEN",
                Flag::Flagged => "UNFLAGGED",
            });
        }
        if keys.is_empty() {
            write!(f, "ALL")
        } else {
            write!(f, "{}", keys.join(" "))
        }
    }
}
