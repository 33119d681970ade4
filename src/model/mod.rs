//! Core data model types: parsed messages, ids, and mailbox flags.

pub mod flag;
pub mod message;
