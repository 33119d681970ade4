//! Regex evaluation of a pattern list against one field value.

use regex::Regex;
use serde::Serialize;

/// What a single match occurrence contributes to a field's captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Capture {
    /// The pattern has no groups: the whole matched text.
    WholeMatch(String),
    /// The pattern has groups: one entry per group, in group order.
    /// A group that did not participate in the match is an empty string.
    Groups(Vec<String>),
}

impl Capture {
    /// Captured texts, flattened.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Capture::WholeMatch(text) => vec![text.as_str()],
            Capture::Groups(groups) => groups.iter().map(String::as_str).collect(),
        }
    }
}

/// Result of evaluating one field against its patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldMatch {
    /// True iff at least one pattern matched at least once.
    pub matched: bool,
    /// Every occurrence of every pattern, patterns in order.
    pub captures: Vec<Capture>,
}

/// Evaluate `patterns` in order against `value`, accumulating every match.
///
/// An absent value (header not present) or an empty pattern list never matches.
pub fn evaluate(value: Option<&str>, patterns: &[Regex]) -> FieldMatch {
    let Some(text) = value else {
        return FieldMatch::default();
    };

    let mut captures = Vec::new();
    for pattern in patterns {
        collect_captures(pattern, text, &mut captures);
    }

    FieldMatch {
        matched: !captures.is_empty(),
        captures,
    }
}

/// Append one [`Capture`] per non-overlapping occurrence of `pattern` in `text`.
fn collect_captures(pattern: &Regex, text: &str, out: &mut Vec<Capture>) {
    // captures_len counts the implicit whole-match group
    if pattern.captures_len() == 1 {
        out.extend(
            pattern
                .find_iter(text)
                .map(|m| Capture::WholeMatch(m.as_str().to_string())),
        );
        return;
    }

    for caps in pattern.captures_iter(text) {
        let groups = caps
            .iter()
            .skip(1)
            .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        out.push(Capture::Groups(groups));
    }
}
