//! Rule engine: compiled rule sets, per-field regex matching, and the
//! all-fields-must-match check callbacks run before triggering.

pub mod matcher;
pub mod ruleset;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::message::Message;
use crate::parser::fields::{self, Field};

use self::matcher::{Capture, FieldMatch};
use self::ruleset::RuleSet;

/// Outcome of checking one message against one rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleCheck {
    /// True iff every constrained field matched (always true for a catch-all).
    pub satisfied: bool,
    /// Per-field results, computed for every field even when an earlier one failed.
    pub fields: BTreeMap<Field, FieldMatch>,
}

impl RuleCheck {
    /// Captures for `field`; empty when the field is unconstrained or failed.
    pub fn captures(&self, field: Field) -> &[Capture] {
        self.fields
            .get(&field)
            .map(|m| m.captures.as_slice())
            .unwrap_or_default()
    }

    /// Fields that did not match.
    pub fn failed_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields
            .iter()
            .filter(|(_, m)| !m.matched)
            .map(|(f, _)| *f)
    }
}

/// Evaluate every field of `rules` against `message` (AND across fields,
/// OR across a field's patterns).
///
/// Each call builds fresh capture storage; nothing carries over between calls.
pub fn check_rules(message: &Message, rules: &RuleSet) -> RuleCheck {
    let fields: BTreeMap<Field, FieldMatch> = rules
        .iter()
        .map(|(field, patterns)| {
            let value = fields::extract(message, field);
            (field, matcher::evaluate(value.as_deref(), patterns))
        })
        .collect();

    RuleCheck {
        satisfied: fields.values().all(|m| m.matched),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_message() -> Message {
        Message::parse("Subject: Task name here\r\nFrom: a@example.com\r\n\r\nMail content here\r\n")
    }

    #[test]
    fn test_catch_all_always_satisfied() {
        let check = check_rules(&task_message(), &RuleSet::new());
        assert!(check.satisfied);
        assert!(check.fields.is_empty());

        let check = check_rules(&Message::placeholder(), &RuleSet::new());
        assert!(check.satisfied);
    }

    #[test]
    fn test_all_fields_match() {
        let rules = RuleSet::new()
            .with_patterns(Field::Subject, [r"Task name (\w+)"])
            .unwrap()
            .with_patterns(Field::Body, [r"Mail content (\w+)"])
            .unwrap();
        let check = check_rules(&task_message(), &rules);
        assert!(check.satisfied);
        assert_eq!(
            check.captures(Field::Subject),
            &[Capture::Groups(vec!["here".into()])]
        );
        assert_eq!(
            check.captures(Field::Body),
            &[Capture::Groups(vec!["here".into()])]
        );
    }

    #[test]
    fn test_one_failing_field_fails_all_but_keeps_captures() {
        let rules = RuleSet::new()
            .with_patterns(Field::Subject, [r"Task name (\w+)"])
            .unwrap()
            .with_patterns(Field::Body, ["NOMATCH"])
            .unwrap();
        let check = check_rules(&task_message(), &rules);
        assert!(!check.satisfied);
        assert_eq!(check.failed_fields().collect::<Vec<_>>(), vec![Field::Body]);
        assert_eq!(check.captures(Field::Subject).len(), 1);
        assert!(check.captures(Field::Body).is_empty());
    }

    #[test]
    fn test_absent_header_fails_rule() {
        let rules = RuleSet::new().with_patterns(Field::Cc, [".*"]).unwrap();
        assert!(!check_rules(&task_message(), &rules).satisfied);
    }

    #[test]
    fn test_repeated_checks_do_not_accumulate() {
        let rules = RuleSet::new().with_patterns(Field::Subject, ["Task"]).unwrap();
        let msg = task_message();
        let first = check_rules(&msg, &rules);
        let second = check_rules(&msg, &rules);
        assert_eq!(first, second);
        assert_eq!(second.captures(Field::Subject).len(), 1);
    }
}
