//! The native engine interface of the Sequoia GPGME bindings.
//!
//! This crate describes the engine the bindings drive: an opaque
//! session handle with blocking operations, C-shaped callbacks that
//! the engine invokes in the middle of an operation, data objects
//! built from a callback table, and result structures that are only
//! valid until the next operation on the same session.
//!
//! The [`memory`] module provides an engine implementing this
//! interface in-process.  It does no cryptography; it exists so that
//! the bindings can be exercised without GnuPG.
//!
//!   [`memory`]: memory/index.html

#[macro_use]
mod macros;

pub mod abi;
mod data;
pub use data::Data;
mod error;
pub use error::{Error, ErrorCode, ErrorSource, Result};
mod session;
pub use session::{Engine, Session};
pub mod types;
pub use types::*;
pub mod memory;

/// Parses a dotted version string into its numeric components.
fn parse_version(v: &str) -> Option<Vec<u32>> {
    v.trim()
        .split('.')
        .map(|c| {
            // Allow trailing garbage like "1.13.0-beta".
            let digits: String =
                c.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .collect()
}

/// Returns whether `version` is at least `required`.
pub fn version_at_least(version: &str, required: &str) -> bool {
    match (parse_version(version), parse_version(required)) {
        (Some(mut v), Some(mut r)) => {
            let n = v.len().max(r.len());
            v.resize(n, 0);
            r.resize(n, 0);
            v >= r
        },
        _ => false,
    }
}
