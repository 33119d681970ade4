//! Maildir-backed mail store.
//!
//! Messages live in `new/` and `cur/`; flags are the letters after `:2,` in
//! the file name (`S` seen, `F` flagged, others preserved untouched). A flag
//! change is one `rename` into `cur/`, which is atomic per message.
//!
//! Ids are 1-based positions in the list of unique names sorted ascending,
//! refreshed on every [`MailStore::search`]. Like IMAP sequence numbers they
//! shift when messages are deleted.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{MailbotError, Result};
use crate::model::flag::{Flag, FlagQuery};
use crate::model::message::MessageId;

use super::{FetchItem, Fetched, MailStore};

const INFO_SEPARATOR: &str = ":2,";

static DELIVERY_COUNTER: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone)]
struct Entry {
    unique: String,
    path: PathBuf,
    flags: BTreeSet<Flag>,
    /// Maildir flag letters this store does not manage (`R`, `T`, `D`, `P`, ...).
    foreign_flags: BTreeSet<char>,
}

impl Entry {
    fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }
        let (unique, info) = match name.split_once(INFO_SEPARATOR) {
            Some((unique, info)) => (unique, info),
            None => (name, ""),
        };
        let mut flags = BTreeSet::new();
        let mut foreign_flags = BTreeSet::new();
        for c in info.chars() {
            match Flag::from_maildir_char(c) {
                Some(flag) => {
                    flags.insert(flag);
                }
                None => {
                    foreign_flags.insert(c);
                }
            }
        }
        Some(Self {
            unique: unique.to_string(),
            path,
            flags,
            foreign_flags,
        })
    }

    /// File name for the given flag set, letters in ASCII order.
    fn file_name(&self, flags: &BTreeSet<Flag>) -> String {
        let letters: BTreeSet<char> = flags
            .iter()
            .map(|f| f.maildir_char())
            .chain(self.foreign_flags.iter().copied())
            .collect();
        let letters: String = letters.into_iter().collect();
        format!("{}{INFO_SEPARATOR}{letters}", self.unique)
    }
}

/// A Maildir directory (`new/`, `cur/`, `tmp/`).
#[derive(Debug)]
pub struct MaildirStore {
    root: PathBuf,
    entries: Vec<Entry>,
}

impl MaildirStore {
    /// Open an existing Maildir.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["new", "cur", "tmp"] {
            let dir = root.join(sub);
            if !dir.is_dir() {
                return Err(MailbotError::store(
                    "open maildir",
                    format!("'{}' is not a directory", dir.display()),
                ));
            }
        }
        let mut store = Self {
            root,
            entries: Vec::new(),
        };
        store.rescan()?;
        Ok(store)
    }

    /// Create the Maildir layout if missing, then open it.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        for sub in ["new", "cur", "tmp"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|e| MailbotError::io(&dir, e))?;
        }
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deliver a message into `new/` (written to `tmp/` first) and return
    /// its unique name.
    pub fn deliver(&mut self, raw: &[u8]) -> Result<String> {
        let now = Utc::now();
        let unique = format!(
            "{}.M{}P{}Q{}.mailbot",
            now.timestamp(),
            now.timestamp_subsec_micros(),
            std::process::id(),
            DELIVERY_COUNTER.fetch_add(1, Ordering::Relaxed),
        );
        let tmp = self.root.join("tmp").join(&unique);
        let dest = self.root.join("new").join(&unique);
        fs::write(&tmp, raw).map_err(|e| MailbotError::io(&tmp, e))?;
        fs::rename(&tmp, &dest).map_err(|e| MailbotError::io(&dest, e))?;
        debug!(unique = %unique, "Delivered message");
        self.rescan()?;
        Ok(unique)
    }

    /// Current flags of a message.
    pub fn flags(&self, id: MessageId) -> Option<&BTreeSet<Flag>> {
        self.entry(id).ok().map(|e| &e.flags)
    }

    /// Id currently assigned to a unique name.
    pub fn id_of(&self, unique: &str) -> Option<MessageId> {
        self.entries
            .iter()
            .position(|e| e.unique == unique)
            .map(|i| MessageId(i as u32 + 1))
    }

    /// Path of a message's file.
    pub fn path(&self, id: MessageId) -> Option<&Path> {
        self.entry(id).ok().map(|e| e.path.as_path())
    }

    fn rescan(&mut self) -> Result<()> {
        let mut entries = Vec::new();
        for sub in ["new", "cur"] {
            let dir = self.root.join(sub);
            let read = fs::read_dir(&dir).map_err(|e| MailbotError::io(&dir, e))?;
            for item in read {
                let item = item.map_err(|e| MailbotError::io(&dir, e))?;
                if let Some(entry) = Entry::from_path(item.path()) {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by(|a, b| a.unique.cmp(&b.unique));
        self.entries = entries;
        Ok(())
    }

    fn entry(&self, id: MessageId) -> Result<&Entry> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .ok_or(MailbotError::UnknownMessage(id))
    }

    fn set_flags(&mut self, id: MessageId, flags: BTreeSet<Flag>) -> Result<()> {
        let entry = self.entry(id)?;
        let dest = self.root.join("cur").join(entry.file_name(&flags));
        if dest != entry.path {
            fs::rename(&entry.path, &dest).map_err(|e| MailbotError::io(&entry.path, e))?;
            debug!(id = %id, from = %entry.path.display(), to = %dest.display(), "Renamed message");
        }
        let index = id.0 as usize - 1;
        self.entries[index].path = dest;
        self.entries[index].flags = flags;
        Ok(())
    }

    fn update_flags(
        &mut self,
        ids: &[MessageId],
        apply: impl Fn(&mut BTreeSet<Flag>),
    ) -> Result<()> {
        for &id in ids {
            let mut flags = self.entry(id)?.flags.clone();
            apply(&mut flags);
            self.set_flags(id, flags)?;
        }
        Ok(())
    }
}

impl MailStore for MaildirStore {
    fn search(&mut self, query: &FlagQuery) -> Result<Vec<MessageId>> {
        self.rescan()?;
        let ids: Vec<MessageId> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| query.matches(&e.flags))
            .map(|(i, _)| MessageId(i as u32 + 1))
            .collect();
        debug!(root = %self.root.display(), query = %query, found = ids.len(), "Searched maildir");
        Ok(ids)
    }

    fn fetch(
        &mut self,
        ids: &[MessageId],
        items: &[FetchItem],
    ) -> Result<BTreeMap<MessageId, Fetched>> {
        let mut result = BTreeMap::new();
        for &id in ids {
            let Ok(entry) = self.entry(id) else {
                continue;
            };
            let mut fetched = Fetched::default();
            for item in items {
                match item {
                    FetchItem::Raw => {
                        let raw =
                            fs::read(&entry.path).map_err(|e| MailbotError::io(&entry.path, e))?;
                        fetched.raw = Some(raw);
                    }
                    FetchItem::InternalDate => {
                        let modified = fs::metadata(&entry.path)
                            .and_then(|m| m.modified())
                            .map_err(|e| MailbotError::io(&entry.path, e))?;
                        fetched.internal_date = Some(DateTime::<Utc>::from(modified));
                    }
                    FetchItem::Flags => fetched.flags = Some(entry.flags.clone()),
                }
            }
            result.insert(id, fetched);
        }
        Ok(result)
    }

    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        self.update_flags(ids, |set| set.extend(flags.iter().copied()))
    }

    fn remove_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        self.update_flags(ids, |set| {
            for flag in flags {
                set.remove(flag);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_parses_info_suffix() {
        let entry = Entry::from_path(PathBuf::from("/m/cur/123.abc:2,FRS")).unwrap();
        assert_eq!(entry.unique, "123.abc");
        assert!(entry.flags.contains(&Flag::Seen));
        assert!(entry.flags.contains(&Flag::Flagged));
        assert_eq!(entry.foreign_flags.iter().collect::<String>(), "R");
    }

    #[test]
    fn test_entry_without_info() {
        let entry = Entry::from_path(PathBuf::from("/m/new/123.abc")).unwrap();
        assert_eq!(entry.unique, "123.abc");
        assert!(entry.flags.is_empty());
        assert!(Entry::from_path(PathBuf::from("/m/cur/.hidden")).is_none());
    }

    #[test]
    fn test_file_name_keeps_foreign_flags_sorted() {
        let entry = Entry::from_path(PathBuf::from("/m/cur/u1:2,RT")).unwrap();
        let flags: BTreeSet<Flag> = [Flag::Seen, Flag::Flagged].into_iter().collect();
        assert_eq!(entry.file_name(&flags), "u1:2,FRST");
        assert_eq!(entry.file_name(&BTreeSet::new()), "u1:2,RT");
    }

    #[test]
    fn test_deliver_and_flag_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = MaildirStore::create(tmp.path()).unwrap();
        let unique = store.deliver(b"Subject: hi\n\nbody\n").unwrap();

        let ids = store.search(&FlagQuery::new()).unwrap();
        assert_eq!(ids, vec![MessageId(1)]);
        assert_eq!(store.id_of(&unique), Some(MessageId(1)));

        store
            .add_flags(&ids, &[Flag::Seen, Flag::Flagged])
            .unwrap();
        let path = store.path(MessageId(1)).unwrap().to_path_buf();
        assert!(path.starts_with(tmp.path().join("cur")));
        assert!(path.to_string_lossy().ends_with(":2,FS"));

        store.remove_flags(&ids, &[Flag::Flagged]).unwrap();
        // flags survive a rescan
        let seen_only = FlagQuery::new().with(Flag::Seen).without(Flag::Flagged);
        assert_eq!(store.search(&seen_only).unwrap(), vec![MessageId(1)]);

        let fetched = store
            .fetch(&ids, &[FetchItem::Raw, FetchItem::InternalDate, FetchItem::Flags])
            .unwrap();
        assert_eq!(
            fetched[&MessageId(1)].flags,
            Some([Flag::Seen].into_iter().collect())
        );
        assert_eq!(fetched[&MessageId(1)].raw.as_deref(), Some(&b"Subject: hi\n\nbody\n"[..]));
        assert!(fetched[&MessageId(1)].internal_date.is_some());
    }

    #[test]
    fn test_open_rejects_non_maildir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            MaildirStore::open(tmp.path()),
            Err(MailbotError::Store { .. })
        ));
    }

    #[test]
    fn test_unknown_id() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = MaildirStore::create(tmp.path()).unwrap();
        assert!(matches!(
            store.add_flags(&[MessageId(1)], &[Flag::Seen]),
            Err(MailbotError::UnknownMessage(MessageId(1)))
        ));
        assert!(store.fetch(&[MessageId(0)], &[FetchItem::Raw]).unwrap().is_empty());
    }
}
