//! Callback dispatch: run every registered callback against one message.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::callback::MatchContext;
use crate::model::message::Message;
use crate::registry::Registry;
use crate::rules::RuleCheck;

/// What happened to one registered callback for one message.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackOutcome {
    pub callback: String,
    /// Last rule check the callback ran, if it used the generic matcher.
    pub check: Option<RuleCheck>,
    /// `None` when the rules did not match and the callback was skipped.
    pub trigger: Option<TriggerResult>,
}

impl CallbackOutcome {
    pub fn triggered(&self) -> bool {
        self.trigger.is_some()
    }
}

/// Recorded result of a trigger call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerResult {
    Ok(serde_json::Value),
    Failed(String),
}

/// Per-message dispatch summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<CallbackOutcome>,
}

impl DispatchReport {
    /// Names of callbacks whose trigger ran (successfully or not).
    pub fn triggered(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.triggered())
            .map(|o| o.callback.as_str())
    }

    /// Names of callbacks whose trigger returned an error.
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.trigger, Some(TriggerResult::Failed(_))))
            .map(|o| o.callback.as_str())
    }

    pub fn outcome(&self, callback: &str) -> Option<&CallbackOutcome> {
        self.outcomes.iter().find(|o| o.callback == callback)
    }
}

/// Evaluate every registration against `message` and trigger the ones whose
/// rules pass.
///
/// Each callback gets a fresh [`MatchContext`]. A trigger that fails, or a
/// callback that panics anywhere, is logged and recorded as a failed trigger;
/// it never stops the remaining callbacks. Callbacks must not rely on the
/// order they are run in.
pub fn dispatch(registry: &Registry, message: &Message) -> DispatchReport {
    let mut report = DispatchReport::default();

    for registration in registry.iter() {
        let name = registration.factory.name();
        let mut ctx = MatchContext::new(message, &registration.rules);

        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut callback = registration.factory.create(&ctx);
            if callback.check_rules(&mut ctx) {
                Some(callback.trigger(&ctx))
            } else {
                None
            }
        }));

        let trigger = match run {
            Ok(Some(Ok(value))) => {
                info!(callback = name, "Callback triggered");
                Some(TriggerResult::Ok(value))
            }
            Ok(Some(Err(e))) => {
                warn!(callback = name, error = %e, "Callback trigger failed");
                Some(TriggerResult::Failed(format!("{e:#}")))
            }
            Ok(None) => {
                debug!(callback = name, "Rules not satisfied, skipping");
                None
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(callback = name, reason, "Callback panicked");
                Some(TriggerResult::Failed(format!("panicked: {reason}")))
            }
        };

        report.outcomes.push(CallbackOutcome {
            callback: name.to_string(),
            check: ctx.last_check().cloned(),
            trigger,
        });
    }

    report
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::callback::FnCallback;
    use crate::parser::fields::Field;
    use crate::rules::matcher::Capture;
    use crate::rules::ruleset::RuleSet;

    fn task_message() -> Message {
        Message::parse("Subject: Task name here\n\nMail content here\n")
    }

    fn counting(name: &str, counter: &Arc<AtomicUsize>) -> FnCallback {
        let counter = Arc::clone(counter);
        FnCallback::new(name, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!("done"))
        })
    }

    #[test]
    fn test_matching_callback_is_triggered() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let rules = RuleSet::new()
            .with_patterns(Field::Subject, [r"Task name (\w+)"])
            .unwrap()
            .with_patterns(Field::Body, [r"Mail content (\w+)"])
            .unwrap();
        registry.register(counting("task", &hits), Some(rules)).unwrap();

        let report = dispatch(&registry, &task_message());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let outcome = report.outcome("task").unwrap();
        assert_eq!(outcome.trigger, Some(TriggerResult::Ok(serde_json::json!("done"))));
        let check = outcome.check.as_ref().unwrap();
        assert_eq!(
            check.captures(Field::Body),
            &[Capture::Groups(vec!["here".into()])]
        );
    }

    #[test]
    fn test_non_matching_callback_is_skipped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let rules = RuleSet::new().with_patterns(Field::Body, ["NOMATCH"]).unwrap();
        registry.register(counting("never", &hits), Some(rules)).unwrap();

        let report = dispatch(&registry, &task_message());

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(report.triggered().count(), 0);
        assert!(!report.outcome("never").unwrap().triggered());
    }

    #[test]
    fn test_failure_is_isolated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry
            .register(FnCallback::new("broken", |_| Err(anyhow::anyhow!("boom"))), None)
            .unwrap();
        registry.register(counting("after", &hits), None).unwrap();

        let report = dispatch(&registry, &task_message());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.failed().collect::<Vec<_>>(), vec!["broken"]);
        assert_eq!(report.triggered().count(), 2);
        assert!(matches!(
            report.outcome("broken").unwrap().trigger,
            Some(TriggerResult::Failed(ref e)) if e.contains("boom")
        ));
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry
            .register(
                FnCallback::new("explodes", |_| panic!("callback bug")),
                None,
            )
            .unwrap();
        registry.register(counting("after", &hits), None).unwrap();

        let report = dispatch(&registry, &task_message());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.failed().collect::<Vec<_>>(), vec!["explodes"]);
        assert!(matches!(
            report.outcome("explodes").unwrap().trigger,
            Some(TriggerResult::Failed(ref e)) if e.contains("callback bug")
        ));
        assert_eq!(
            report.outcome("after").unwrap().trigger,
            Some(TriggerResult::Ok(serde_json::json!("done")))
        );
    }

    #[test]
    fn test_each_callback_gets_fresh_captures() {
        let mut registry = Registry::new();
        for name in ["first", "second"] {
            let rules = RuleSet::new().with_patterns(Field::Subject, ["Task"]).unwrap();
            registry
                .register(FnCallback::new(name, |_| Ok(serde_json::Value::Null)), Some(rules))
                .unwrap();
        }

        let report = dispatch(&registry, &task_message());
        for outcome in &report.outcomes {
            let check = outcome.check.as_ref().unwrap();
            assert_eq!(check.captures(Field::Subject).len(), 1);
        }
    }
}
