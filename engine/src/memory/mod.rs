//! An in-process engine.
//!
//! This engine implements the engine interface without GnuPG and
//! without any cryptography.  Keys live in memory, in keyrings shared
//! by all sessions of an engine that use the same home directory.
//! Messages are serialized envelopes; "encryption" is access control
//! enforced by the engine, and signatures are digests binding the
//! signer's fingerprint to the signed data.
//!
//! It behaves like a real engine where the bindings can observe it:
//! passphrases are requested through the passphrase callback over a
//! file descriptor, progress and status are reported through their
//! callbacks, invalid recipients and signers are reported in the
//! operation results, and edit sessions are driven through the edit
//! callback.
//!
//! # Examples
//!
//! ```
//! use sequoia_gpgme_engine::{Engine, Session, memory};
//!
//! let engine = memory::Engine::new();
//! assert!(engine.check_version(Some("1.13.0")).is_some());
//! let session = engine.new_session().unwrap();
//! assert!(! session.armor());
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::*;
use crate::{version_at_least, Result};

mod keyring;
use keyring::Keyring;
mod message;
mod params;
mod pipe;
mod session;
pub use session::Session;

/// The interface level implemented by this engine.
pub const VERSION: &str = "1.18.0";

/// Locks a mutex, ignoring poisoning.
///
/// Keyrings are only modified by whole-record operations, so a
/// panicking thread cannot leave them half-updated.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared by all sessions of an engine.
#[derive(Default)]
pub(crate) struct Shared {
    keyrings: Mutex<HashMap<Option<PathBuf>, Arc<Mutex<Keyring>>>>,
    keyserver: Mutex<Keyring>,
    /// Number of finished key listings.
    keylist_ends: AtomicUsize,
}

impl Shared {
    /// Returns the keyring of a home directory.
    pub fn keyring(&self, home: Option<&Path>) -> Arc<Mutex<Keyring>> {
        lock(&self.keyrings)
            .entry(home.map(Path::to_path_buf))
            .or_default()
            .clone()
    }

    pub fn keylist_ended(&self) {
        self.keylist_ends.fetch_add(1, Ordering::SeqCst);
    }
}

/// The in-process engine.
#[derive(Clone, Default)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Creates an engine with empty keyrings.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the fingerprints of the keys published to the
    /// keyserver of this engine.
    pub fn keyserver_fingerprints(&self) -> Vec<String> {
        lock(&self.shared.keyserver).iter()
            .map(|r| r.fpr().to_string())
            .collect()
    }

    /// Returns how often sessions of this engine ended a key listing.
    pub fn keylist_end_calls(&self) -> usize {
        self.shared.keylist_ends.load(Ordering::SeqCst)
    }
}

impl crate::Engine for Engine {
    fn check_version(&self, required: Option<&str>) -> Option<String> {
        match required {
            Some(r) if ! version_at_least(VERSION, r) => None,
            _ => Some(VERSION.into()),
        }
    }

    fn engine_info(&self) -> Vec<EngineInfo> {
        vec![session::engine_info(None, None)]
    }

    fn new_session(&self) -> Result<Box<dyn crate::Session>> {
        Ok(Box::new(Session::new(self.shared.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Engine as _;

    #[test]
    fn versions() {
        let e = Engine::new();
        assert_eq!(e.check_version(None).as_deref(), Some(VERSION));
        assert_eq!(e.check_version(Some("1.13.0")).as_deref(), Some(VERSION));
        assert_eq!(e.check_version(Some("99.0")), None);
        assert_eq!(e.engine_info()[0].protocol, Protocol::OPENPGP);
    }

    #[test]
    fn keyrings_are_per_home() {
        let shared = Shared::default();
        let a = shared.keyring(Some(Path::new("/a")));
        let b = shared.keyring(Some(Path::new("/b")));
        assert!(! Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &shared.keyring(Some(Path::new("/a")))));
        assert!(Arc::ptr_eq(&shared.keyring(None), &shared.keyring(None)));
    }
}
