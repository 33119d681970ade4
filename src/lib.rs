//! `mailbot`: poll a mailbox and run rule-matched callbacks exactly once
//! per message.
//!
//! Processing state lives in two mailbox flags (see [`lease`]), so several
//! passes, or a restarted process, never trigger a callback twice for the
//! same message. Callbacks declare per-field regex rules ([`rules`]) and are
//! held in an explicit [`registry::Registry`] owned by the [`bot::Mailbot`].

pub mod actions;
pub mod bot;
pub mod callback;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lease;
pub mod model;
pub mod parser;
pub mod registry;
pub mod rules;
pub mod store;
