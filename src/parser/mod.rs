//! Email parsing: header decoding, MIME body selection, and field extraction.

pub mod fields;
pub mod header;
pub mod mime;
