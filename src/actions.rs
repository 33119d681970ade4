//! Built-in callbacks that can be declared in configuration.
//!
//! `log` records the match; `command` hands the message to an external
//! program.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::Context;
use serde_json::{json, Value};
use tracing::info;

use crate::callback::{Callback, CallbackFactory, MatchContext};
use crate::config::{ActionKind, CallbackConfig};
use crate::error::{MailbotError, Result};
use crate::parser::fields::{self, Field};
use crate::rules::matcher::Capture;

/// Environment variable carrying the captures to a `command` action.
pub const CAPTURES_ENV: &str = "MAILBOT_CAPTURES";

/// Captures of the last rule check as a JSON object keyed by field name.
pub fn captures_json(ctx: &MatchContext<'_>) -> Value {
    let captures: BTreeMap<Field, &[Capture]> = ctx
        .last_check()
        .map(|check| {
            check
                .fields
                .iter()
                .map(|(field, m)| (*field, m.captures.as_slice()))
                .collect()
        })
        .unwrap_or_default();
    serde_json::to_value(captures).unwrap_or(Value::Null)
}

/// Build the factory for one `[[callback]]` entry.
pub fn from_config(cfg: &CallbackConfig) -> Result<Box<dyn CallbackFactory>> {
    match cfg.action {
        ActionKind::Log => Ok(Box::new(LogAction::new(&cfg.name))),
        ActionKind::Command => {
            let action = CommandAction::new(&cfg.name, cfg.command.clone()).ok_or_else(|| {
                MailbotError::Config(format!(
                    "callback '{}' uses action \"command\" but has no command",
                    cfg.name
                ))
            })?;
            Ok(Box::new(action))
        }
    }
}

// ── log ─────────────────────────────────────────────────────────

/// Logs the subject and captures of every matching message.
#[derive(Debug, Clone)]
pub struct LogAction {
    name: String,
}

impl LogAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CallbackFactory for LogAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _ctx: &MatchContext<'_>) -> Box<dyn Callback> {
        Box::new(LogInstance {
            name: self.name.clone(),
        })
    }
}

struct LogInstance {
    name: String,
}

impl Callback for LogInstance {
    fn trigger(&mut self, ctx: &MatchContext<'_>) -> anyhow::Result<Value> {
        let subject = fields::extract(ctx.message(), Field::Subject).unwrap_or_default();
        let captures = captures_json(ctx);
        info!(
            callback = %self.name,
            subject = %subject,
            captures = %captures,
            "Message matched"
        );
        Ok(captures)
    }
}

// ── command ─────────────────────────────────────────────────────

/// Runs an external program per matching message.
///
/// The raw message is written to the program's stdin and the captures are
/// passed as JSON in [`CAPTURES_ENV`]. A non-zero exit status fails the
/// trigger.
#[derive(Debug, Clone)]
pub struct CommandAction {
    name: String,
    argv: Vec<String>,
}

impl CommandAction {
    /// `None` if `argv` is empty.
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self {
            name: name.into(),
            argv,
        })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl CallbackFactory for CommandAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _ctx: &MatchContext<'_>) -> Box<dyn Callback> {
        Box::new(CommandInstance {
            argv: self.argv.clone(),
        })
    }
}

struct CommandInstance {
    argv: Vec<String>,
}

impl Callback for CommandInstance {
    fn trigger(&mut self, ctx: &MatchContext<'_>) -> anyhow::Result<Value> {
        let (program, args) = self
            .argv
            .split_first()
            .context("empty command line")?;

        let mut child = Command::new(program)
            .args(args)
            .env(CAPTURES_ENV, captures_json(ctx).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start '{program}'"))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading stdin closes the pipe early
            if let Err(e) = stdin.write_all(ctx.message().raw()) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).with_context(|| format!("failed to write to '{program}'"));
                }
            }
        }

        let status = child
            .wait()
            .with_context(|| format!("failed to wait for '{program}'"))?;
        if !status.success() {
            anyhow::bail!("'{program}' exited with {status}");
        }
        Ok(json!({ "status": status.code() }))
    }
}
