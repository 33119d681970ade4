//! Callback capability: what callback authors implement, and the match
//! context each callback instance is built from.

use std::fmt;
use std::sync::Arc;

use crate::model::message::Message;
use crate::parser::fields::Field;
use crate::rules::matcher::Capture;
use crate::rules::ruleset::RuleSet;
use crate::rules::{self, RuleCheck};

/// A message paired with the rule set one callback is registered with.
///
/// Holds the captures of the most recent [`MatchContext::check_rules`] call;
/// each call starts from empty capture storage.
pub struct MatchContext<'a> {
    message: &'a Message,
    rules: &'a RuleSet,
    last_check: Option<RuleCheck>,
}

impl<'a> MatchContext<'a> {
    pub fn new(message: &'a Message, rules: &'a RuleSet) -> Self {
        Self {
            message,
            rules,
            last_check: None,
        }
    }

    pub fn message(&self) -> &'a Message {
        self.message
    }

    pub fn rules(&self) -> &'a RuleSet {
        self.rules
    }

    /// Run the generic field/regex check and keep its captures.
    pub fn check_rules(&mut self) -> bool {
        let check = rules::check_rules(self.message, self.rules);
        let satisfied = check.satisfied;
        self.last_check = Some(check);
        satisfied
    }

    /// Result of the last [`check_rules`](Self::check_rules) call, if any.
    pub fn last_check(&self) -> Option<&RuleCheck> {
        self.last_check.as_ref()
    }

    /// Captures for `field` from the last check.
    pub fn captures(&self, field: Field) -> &[Capture] {
        self.last_check
            .as_ref()
            .map(|c| c.captures(field))
            .unwrap_or_default()
    }
}

impl fmt::Debug for MatchContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchContext")
            .field("rules", &self.rules.to_raw())
            .field("last_check", &self.last_check)
            .finish()
    }
}

/// One callback instance, built for one message.
pub trait Callback {
    /// Decide whether to trigger. The default runs the generic rule check;
    /// override for custom matching.
    fn check_rules(&mut self, ctx: &mut MatchContext<'_>) -> bool {
        ctx.check_rules()
    }

    /// Act on the message. Only called after `check_rules` returned true.
    fn trigger(&mut self, ctx: &MatchContext<'_>) -> anyhow::Result<serde_json::Value>;
}

/// Produces [`Callback`] instances; the registry key is [`name`](Self::name).
pub trait CallbackFactory {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    /// Rules declared by the callback itself. Rules given at registration
    /// override these per field.
    fn default_rules(&self) -> RuleSet {
        RuleSet::new()
    }

    /// Build a callback for the message and rules held by `ctx`.
    fn create(&self, ctx: &MatchContext<'_>) -> Box<dyn Callback>;
}

type TriggerFn = dyn Fn(&MatchContext<'_>) -> anyhow::Result<serde_json::Value> + Send + Sync;

/// A callback whose trigger is a closure and whose matching is the default.
#[derive(Clone)]
pub struct FnCallback {
    name: String,
    default_rules: RuleSet,
    trigger: Arc<TriggerFn>,
}

impl FnCallback {
    pub fn new<F>(name: impl Into<String>, trigger: F) -> Self
    where
        F: Fn(&MatchContext<'_>) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            default_rules: RuleSet::new(),
            trigger: Arc::new(trigger),
        }
    }

    /// Declare rules the callback carries by default.
    pub fn with_default_rules(mut self, rules: RuleSet) -> Self {
        self.default_rules = rules;
        self
    }
}

impl CallbackFactory for FnCallback {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_rules(&self) -> RuleSet {
        self.default_rules.clone()
    }

    fn create(&self, _ctx: &MatchContext<'_>) -> Box<dyn Callback> {
        Box::new(FnInstance(Arc::clone(&self.trigger)))
    }
}

struct FnInstance(Arc<TriggerFn>);

impl Callback for FnInstance {
    fn trigger(&mut self, ctx: &MatchContext<'_>) -> anyhow::Result<serde_json::Value> {
        (self.0)(ctx)
    }
}
