//! The bot: one mail store, one callback registry, and the processing pass
//! that ties the lease protocol to callback dispatch.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::callback::CallbackFactory;
use crate::dispatch::{self, DispatchReport};
use crate::error::Result;
use crate::lease;
use crate::model::message::{Message, MessageId};
use crate::registry::Registry;
use crate::rules::ruleset::RuleSet;
use crate::store::{FetchItem, MailStore};

/// Result of processing one message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
    pub id: MessageId,
    /// Decoded subject, for logs and reports.
    pub subject: Option<String>,
    pub dispatch: DispatchReport,
}

/// Result of one processing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    /// Claims released by timeout recovery before selection.
    pub recovered: Vec<MessageId>,
    /// Every message claimed, dispatched and finalized, in id order.
    pub processed: Vec<MessageReport>,
}

impl PassReport {
    /// Total number of callback triggers across all messages.
    pub fn trigger_count(&self) -> usize {
        self.processed
            .iter()
            .map(|m| m.dispatch.triggered().count())
            .sum()
    }

    /// Total number of failed triggers across all messages.
    pub fn failure_count(&self) -> usize {
        self.processed
            .iter()
            .map(|m| m.dispatch.failed().count())
            .sum()
    }
}

/// Polls one mailbox and runs registered callbacks on each new message.
pub struct Mailbot<S: MailStore> {
    store: S,
    registry: Registry,
    timeout: Option<Duration>,
}

impl<S: MailStore> Mailbot<S> {
    /// A bot with an empty registry and timeout recovery disabled.
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: Registry::new(),
            timeout: None,
        }
    }

    /// Use an already-populated registry.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// How long a message may stay claimed before the next pass releases it.
    /// `None` disables recovery.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// See [`Registry::register`].
    pub fn register(
        &mut self,
        factory: impl CallbackFactory + 'static,
        rules: Option<RuleSet>,
    ) -> Result<&RuleSet> {
        self.registry.register(factory, rules)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Ids of the messages the next pass would process.
    pub fn get_message_ids(&mut self) -> Result<Vec<MessageId>> {
        lease::select_unclaimed(&mut self.store)
    }

    /// Run every registered callback against one message.
    pub fn process_message(&self, message: &Message) -> DispatchReport {
        dispatch::dispatch(&self.registry, message)
    }

    /// One full pass, timed against the current clock.
    pub fn process_messages(&mut self) -> Result<PassReport> {
        self.process_messages_at(Utc::now())
    }

    /// One full pass: release timed-out claims, select unclaimed messages,
    /// then claim, dispatch and finalize each in turn.
    ///
    /// A store error aborts the pass; messages finalized before it keep
    /// their processed state and a message caught mid-way stays claimed
    /// until timeout recovery releases it.
    pub fn process_messages_at(&mut self, now: DateTime<Utc>) -> Result<PassReport> {
        let mut report = PassReport {
            recovered: lease::recover_timeouts(&mut self.store, self.timeout, now)?,
            ..PassReport::default()
        };

        let ids = lease::select_unclaimed(&mut self.store)?;
        if ids.is_empty() {
            debug!("No new messages");
            return Ok(report);
        }
        let mut fetched = self.store.fetch(&ids, &[FetchItem::Raw])?;

        for id in ids {
            let Some(raw) = fetched.remove(&id).and_then(|f| f.raw) else {
                warn!(id = %id, "Message vanished before fetch, skipping");
                continue;
            };

            lease::claim(&mut self.store, id)?;
            let message = Message::parse(raw);
            let dispatch = self.process_message(&message);
            lease::finalize(&mut self.store, id)?;

            let subject = crate::parser::fields::extract(
                &message,
                crate::parser::fields::Field::Subject,
            );
            debug!(
                id = %id,
                subject = subject.as_deref().unwrap_or(""),
                triggered = dispatch.triggered().count(),
                "Processed message"
            );
            report.processed.push(MessageReport {
                id,
                subject,
                dispatch,
            });
        }

        info!(
            processed = report.processed.len(),
            recovered = report.recovered.len(),
            triggers = report.trigger_count(),
            failures = report.failure_count(),
            "Pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::callback::FnCallback;
    use crate::error::MailbotError;
    use crate::lease::LeaseState;
    use crate::model::flag::{Flag, FlagQuery};
    use crate::parser::fields::Field;
    use crate::store::memory::MemoryStore;
    use crate::store::Fetched;

    /// Lets the first `budget` flag mutations through, then fails every one.
    struct FlakyStore {
        inner: MemoryStore,
        budget: usize,
    }

    impl FlakyStore {
        fn spend(&mut self, operation: &'static str) -> Result<()> {
            if self.budget == 0 {
                return Err(MailbotError::store(operation, "connection reset"));
            }
            self.budget -= 1;
            Ok(())
        }
    }

    impl MailStore for FlakyStore {
        fn search(&mut self, query: &FlagQuery) -> Result<Vec<MessageId>> {
            self.inner.search(query)
        }

        fn fetch(
            &mut self,
            ids: &[MessageId],
            items: &[FetchItem],
        ) -> Result<BTreeMap<MessageId, Fetched>> {
            self.inner.fetch(ids, items)
        }

        fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
            self.spend("add flags")?;
            self.inner.add_flags(ids, flags)
        }

        fn remove_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
            self.spend("remove flags")?;
            self.inner.remove_flags(ids, flags)
        }
    }

    fn flaky_bot(budget: usize) -> (Mailbot<FlakyStore>, MessageId, MessageId) {
        let mut inner = MemoryStore::new();
        let first = inner.append("Subject: first\n\n", Utc::now());
        let second = inner.append("Subject: second\n\n", Utc::now());
        let mut bot = Mailbot::new(FlakyStore { inner, budget });
        bot.register(FnCallback::new("noop", |_| Ok(serde_json::Value::Null)), None)
            .unwrap();
        (bot, first, second)
    }

    fn flaky_state(bot: &Mailbot<FlakyStore>, id: MessageId) -> Option<LeaseState> {
        LeaseState::from_flags(bot.store().inner.flags(id).unwrap())
    }

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>) -> FnCallback {
        let log = Arc::clone(log);
        let name_owned = name.to_string();
        FnCallback::new(name, move |ctx| {
            let subject = crate::parser::fields::extract(ctx.message(), Field::Subject)
                .unwrap_or_default();
            log.lock().unwrap().push(format!("{name_owned}:{subject}"));
            Ok(serde_json::Value::Null)
        })
    }

    fn state(bot: &Mailbot<MemoryStore>, id: MessageId) -> Option<LeaseState> {
        LeaseState::from_flags(bot.store().flags(id).unwrap())
    }

    #[test]
    fn test_pass_processes_every_message_once() {
        let mut store = MemoryStore::new();
        let m1 = store.append("Subject: one\n\nbody\n", Utc::now());
        let m2 = store.append("Subject: two\n\nbody\n", Utc::now());

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bot = Mailbot::new(store);
        bot.register(recording("cb1", &log), None).unwrap();
        bot.register(recording("cb2", &log), None).unwrap();

        let report = bot.process_messages().unwrap();
        assert_eq!(report.processed.len(), 2);
        assert_eq!(report.trigger_count(), 4);

        let mut calls = log.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["cb1:one", "cb1:two", "cb2:one", "cb2:two"]);
        assert_eq!(state(&bot, m1), Some(LeaseState::Processed));
        assert_eq!(state(&bot, m2), Some(LeaseState::Processed));

        // a second pass finds nothing new
        let again = bot.process_messages().unwrap();
        assert!(again.processed.is_empty());
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_failing_callback_still_finalizes() {
        let mut store = MemoryStore::new();
        let id = store.append("Subject: boom\n\nbody\n", Utc::now());
        let mut bot = Mailbot::new(store);
        bot.register(FnCallback::new("broken", |_| Err(anyhow::anyhow!("nope"))), None)
            .unwrap();

        let report = bot.process_messages().unwrap();
        assert_eq!(report.failure_count(), 1);
        assert_eq!(state(&bot, id), Some(LeaseState::Processed));
    }

    #[test]
    fn test_pass_recovers_timed_out_claims_first() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        let stuck = store.append("Subject: stuck\n\n", now - Duration::hours(2));
        lease::claim(&mut store, stuck).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bot = Mailbot::new(store).with_timeout(Some(Duration::minutes(30)));
        bot.register(recording("cb", &log), None).unwrap();

        let report = bot.process_messages_at(now).unwrap();
        assert_eq!(report.recovered, vec![stuck]);
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.processed[0].subject.as_deref(), Some("stuck"));
        assert_eq!(state(&bot, stuck), Some(LeaseState::Processed));
    }

    #[test]
    fn test_stuck_claim_without_timeout_stays_claimed() {
        let mut store = MemoryStore::new();
        let stuck = store.append("Subject: stuck\n\n", Utc::now() - Duration::hours(2));
        lease::claim(&mut store, stuck).unwrap();

        let mut bot = Mailbot::new(store);
        let report = bot.process_messages().unwrap();
        assert!(report.recovered.is_empty());
        assert!(report.processed.is_empty());
        assert_eq!(state(&bot, stuck), Some(LeaseState::Claimed));
    }

    #[test]
    fn test_store_error_aborts_pass() {
        let mut store = MemoryStore::new();
        store.append("Subject: a\n\n", Utc::now());
        store.set_offline(true);

        let mut bot = Mailbot::new(store);
        assert!(matches!(
            bot.process_messages(),
            Err(MailbotError::Store { .. })
        ));
        assert!(bot.get_message_ids().is_err());
    }

    #[test]
    fn test_store_error_mid_pass_keeps_finished_work() {
        // claim, finalize (remove + add) of the first message, claim of the
        // second; its finalize is the first call to fail
        let (mut bot, first, second) = flaky_bot(4);

        assert!(matches!(
            bot.process_messages(),
            Err(MailbotError::Store { operation: "remove flags", .. })
        ));
        assert_eq!(flaky_state(&bot, first), Some(LeaseState::Processed));
        assert_eq!(flaky_state(&bot, second), Some(LeaseState::Claimed));
    }

    #[test]
    fn test_store_error_on_claim_leaves_message_unclaimed() {
        let (mut bot, first, second) = flaky_bot(3);

        assert!(bot.process_messages().is_err());
        assert_eq!(flaky_state(&bot, first), Some(LeaseState::Processed));
        assert_eq!(flaky_state(&bot, second), Some(LeaseState::Unclaimed));

        // the next pass picks the message up again
        bot.store_mut().budget = usize::MAX;
        let report = bot.process_messages().unwrap();
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.processed[0].id, second);
    }

    #[test]
    fn test_panicking_callback_still_finalizes() {
        let mut store = MemoryStore::new();
        let id = store.append("Subject: boom\n\nbody\n", Utc::now());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bot = Mailbot::new(store);
        bot.register(FnCallback::new("explodes", |_| panic!("bad callback")), None)
            .unwrap();
        bot.register(recording("after", &log), None).unwrap();

        let report = bot.process_messages().unwrap();
        assert_eq!(report.failure_count(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["after:boom"]);
        assert_eq!(state(&bot, id), Some(LeaseState::Processed));
    }

    #[test]
    fn test_get_message_ids() {
        let mut store = MemoryStore::new();
        let id = store.append("Subject: a\n\n", Utc::now());
        let mut bot = Mailbot::new(store);
        assert_eq!(bot.get_message_ids().unwrap(), vec![id]);
    }
}
