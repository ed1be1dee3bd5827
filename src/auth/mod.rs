//! Authentication subsystem: bearer token extraction and verification (spec §6).

pub mod token;

pub use token::{chosen_subprotocol, extract_token, issue_token, verify_token};

// vim: ts=4
