//! Bindings for a GPGME-style cryptographic engine.
//!
//! This crate exposes an engine's context-based API (key management,
//! encryption, decryption, signing, verification, import, export and
//! key generation) to an embedding runtime with a global execution
//! lock, such as an interpreter.
//!
//! The interesting part is the locking discipline.  An engine session
//! is not thread safe, and its operations block.  A [`Context`]
//! therefore serializes access to its session with a mutex, releases
//! the runtime's execution lock around every engine call so that
//! other host threads keep running, and briefly reacquires it whenever
//! the engine calls back into host code: passphrase, progress, status
//! and edit callbacks, and the reads and writes of host [`Stream`]s.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use sequoia_gpgme::{Context, Module, SigMode, Sigsum};
//! use sequoia_gpgme::host::BytesIO;
//!
//! # fn main() -> sequoia_gpgme::Result<()> {
//! let module = Module::in_process()?;
//! let ctx = Context::configure(&module).ephemeral().build()?;
//! ctx.genkey("<GnupgKeyParms format=\"internal\">
//! Key-Type: RSA
//! Name-Real: Alice
//! Name-Email: alice@example.org
//! </GnupgKeyParms>", None, None)?;
//!
//! let sig = Arc::new(BytesIO::new());
//! ctx.sign(Arc::new(BytesIO::with_data("Hello")), sig.clone(),
//!          SigMode::NORMAL)?;
//!
//! sig.rewind();
//! let plain = Arc::new(BytesIO::new());
//! let signatures = ctx.verify(sig, None, Some(plain.clone()))?;
//! assert_eq!(plain.getvalue(), b"Hello");
//! assert!(signatures[0].summary.contains(Sigsum::VALID));
//! # Ok(())
//! # }
//! ```
//!
//!   [`Context`]: struct.Context.html
//!   [`Stream`]: host/trait.Stream.html

#![warn(missing_debug_implementations)]

pub use sequoia_gpgme_engine as engine;

pub use engine::types::*;
pub use engine::{ErrorCode, ErrorSource};

mod callbacks;
mod config;
pub use config::Config;
mod context;
pub use context::Context;
mod data;
mod error;
pub use error::{Error, GpgmeError, Result};
pub mod host;
mod keyiter;
pub use keyiter::KeyIter;
mod module;
pub use module::{Module, REQUIRED_VERSION};
mod ops;
pub mod runtime;
