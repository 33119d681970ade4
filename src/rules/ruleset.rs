//! Compiled rule sets: field → ordered regex list.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{MailbotError, Result};
use crate::parser::fields::Field;

/// What a callback requires of a message before it triggers.
///
/// Patterns are compiled once at construction; an invalid pattern is a
/// construction error, never a matching-time error. A rule set with no
/// fields is a catch-all.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<Field, Vec<Regex>>,
}

impl RuleSet {
    /// An empty (catch-all) rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `patterns` for `field`, replacing any patterns already set.
    pub fn with_patterns<I, S>(mut self, field: Field, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| compile(field, p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.rules.insert(field, compiled);
        Ok(self)
    }

    /// Build from field names and pattern strings, as found in configuration.
    pub fn from_raw<'a, I>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
    {
        raw.into_iter().try_fold(Self::new(), |set, (name, patterns)| {
            let field: Field = name.parse()?;
            set.with_patterns(field, patterns)
        })
    }

    pub fn is_catch_all(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Patterns for `field`, if the rule set constrains it.
    pub fn patterns(&self, field: Field) -> Option<&[Regex]> {
        self.rules.get(&field).map(Vec::as_slice)
    }

    /// Every constrained field with its patterns, in field order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &[Regex])> {
        self.rules.iter().map(|(f, p)| (*f, p.as_slice()))
    }

    /// Merge `overrides` into this set. On a field present in both, the
    /// override's pattern list replaces this one's entirely.
    pub fn merge(&mut self, overrides: RuleSet) {
        self.rules.extend(overrides.rules);
    }

    /// Pattern sources, for display and reports.
    pub fn to_raw(&self) -> BTreeMap<Field, Vec<String>> {
        self.rules
            .iter()
            .map(|(f, p)| (*f, p.iter().map(|r| r.as_str().to_string()).collect()))
            .collect()
    }
}

impl PartialEq for RuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.to_raw() == other.to_raw()
    }
}

impl Eq for RuleSet {}

fn compile(field: Field, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| MailbotError::InvalidPattern {
        field: field.to_string(),
        pattern: pattern.to_string(),
        source,
    })
}
