//! The callback registry: which callbacks exist and the rules each one runs with.
//!
//! A registry is an explicit value owned by the bot, built once at start-up
//! and read-only while a pass runs.

use tracing::debug;

use crate::callback::CallbackFactory;
use crate::error::{MailbotError, Result};
use crate::rules::ruleset::RuleSet;

/// A registered callback factory and its effective rules.
pub struct Registration {
    pub factory: Box<dyn CallbackFactory>,
    pub rules: RuleSet,
}

/// Ordered set of registrations keyed by factory name.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory`, optionally with call-site rules.
    ///
    /// The effective rules are the factory's defaults with `rules` merged on
    /// top (call-site rules win per field). Fails if a factory with the same
    /// name is already registered.
    pub fn register(
        &mut self,
        factory: impl CallbackFactory + 'static,
        rules: Option<RuleSet>,
    ) -> Result<&RuleSet> {
        self.register_boxed(Box::new(factory), rules)
    }

    /// [`register`](Self::register) for an already-boxed factory.
    pub fn register_boxed(
        &mut self,
        factory: Box<dyn CallbackFactory>,
        rules: Option<RuleSet>,
    ) -> Result<&RuleSet> {
        if self.contains(factory.name()) {
            return Err(MailbotError::AlreadyRegistered(factory.name().to_string()));
        }

        let mut effective = factory.default_rules();
        if let Some(rules) = rules {
            effective.merge(rules);
        }

        debug!(
            callback = factory.name(),
            fields = effective.len(),
            "Registered callback"
        );
        self.entries.push(Registration {
            factory,
            rules: effective,
        });
        // just pushed
        Ok(&self.entries[self.entries.len() - 1].rules)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.factory.name() == name)
    }

    /// Effective rules of a registered callback.
    pub fn rules(&self, name: &str) -> Option<&RuleSet> {
        self.entries
            .iter()
            .find(|e| e.factory.name() == name)
            .map(|e| &e.rules)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::FnCallback;
    use crate::parser::fields::Field;

    fn noop(name: &str) -> FnCallback {
        FnCallback::new(name, |_| Ok(serde_json::Value::Null))
    }

    fn with_rules(name: &str) -> FnCallback {
        noop(name).with_default_rules(
            RuleSet::new()
                .with_patterns(Field::Subject, ["bar"])
                .unwrap()
                .with_patterns(Field::Body, ["bat"])
                .unwrap(),
        )
    }

    #[test]
    fn test_register() {
        let mut registry = Registry::new();
        let before = registry.len();
        registry.register(noop("empty"), None).unwrap();
        assert_eq!(registry.len(), before + 1);
        assert!(registry.contains("empty"));
    }

    #[test]
    fn test_register_existing_fails() {
        let mut registry = Registry::new();
        registry.register(noop("empty"), None).unwrap();
        let err = registry.register(noop("empty"), None).unwrap_err();
        assert!(matches!(err, MailbotError::AlreadyRegistered(ref n) if n == "empty"));
        // a different callback still registers
        assert!(registry.register(with_rules("with_rules"), None).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_default_rules_without_call_site_rules() {
        let mut registry = Registry::new();
        let effective = registry.register(with_rules("cb"), None).unwrap().clone();
        assert_eq!(effective, with_rules("cb").default_rules());
    }

    #[test]
    fn test_call_site_rules_without_defaults() {
        let mut registry = Registry::new();
        let rules = RuleSet::new().with_patterns(Field::To, ["two"]).unwrap();
        registry.register(noop("cb"), Some(rules.clone())).unwrap();
        assert_eq!(registry.rules("cb"), Some(&rules));
    }

    #[test]
    fn test_call_site_rules_override_defaults() {
        let mut registry = Registry::new();
        let overrides = RuleSet::new().with_patterns(Field::Body, ["wow"]).unwrap();
        let effective = registry
            .register(with_rules("cb"), Some(overrides))
            .unwrap()
            .to_raw();
        assert_eq!(effective[&Field::Subject], vec!["bar"]);
        assert_eq!(effective[&Field::Body], vec!["wow"]);
    }
}
