//! Errors.
//!
//! Functions return `anyhow::Error`s; errors raised by the bindings
//! themselves are [`Error`]s and can be recovered using
//! `downcast_ref`:
//!
//! ```
//! use sequoia_gpgme::{Context, Error, ErrorCode, Module};
//!
//! # fn main() -> sequoia_gpgme::Result<()> {
//! let module = Module::in_process()?;
//! let ctx = Context::configure(&module).ephemeral().build()?;
//! let e = ctx.get_key("DEADBEEFDEADBEEF", false).unwrap_err();
//! match e.downcast_ref::<Error>() {
//!     Some(Error::Gpgme(e)) => assert_eq!(e.code(), ErrorCode::EOF),
//!     _ => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```
//!
//!   [`Error`]: enum.Error.html

use crate::engine::{self, ErrorCode, ErrorSource};
use crate::engine::{GenkeyResult, ImportResult, InvalidKey, NewSignature,
                    Signature};
use crate::host::HostError;

/// Result type of the bindings.
pub type Result<T> = ::std::result::Result<T, anyhow::Error>;

/// Errors raised by the bindings.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The engine reported an error.
    #[error("{0}")]
    Gpgme(#[from] GpgmeError),

    /// An argument could not be passed to the engine.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine is too old.
    #[error("Engine version {found:?} is older than the required {required}")]
    UnsupportedVersion {
        /// The minimum version.
        required: String,
        /// What the engine reported, if anything.
        found: Option<String>,
    },

    /// An I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl From<engine::Error> for Error {
    fn from(e: engine::Error) -> Self {
        Error::Gpgme(e.into())
    }
}

impl Error {
    /// Returns the engine error wrapped in `e`, if any.
    pub fn gpgme(e: &anyhow::Error) -> Option<&GpgmeError> {
        match e.downcast_ref::<Error>() {
            Some(Error::Gpgme(e)) => Some(e),
            _ => None,
        }
    }
}

/// An error reported by the engine.
///
/// Besides the engine's error code, this carries whatever the failed
/// operation left behind that helps to diagnose the failure.  Which
/// fields are populated depends on the operation.
#[derive(thiserror::Error, Clone, Debug, Default, PartialEq)]
#[error("{error}{}", callback_suffix(.callback_error))]
pub struct GpgmeError {
    /// The error code.
    pub error: engine::Error,
    /// Recipients that could not be used (encryption).
    pub invalid_recipients: Vec<InvalidKey>,
    /// Signers that could not be used (signing).
    pub invalid_signers: Vec<InvalidKey>,
    /// Signatures made before the failure (signing).
    pub new_signatures: Vec<NewSignature>,
    /// Signatures checked before the failure (verification).
    pub signatures: Vec<Signature>,
    /// The unsupported algorithm (decryption).
    pub unsupported_algorithm: Option<String>,
    /// Whether a key was used against its key flags (decryption).
    pub wrong_key_usage: bool,
    /// The partial result of an import.
    pub import_result: Option<ImportResult>,
    /// The partial result of a key generation.
    pub genkey_result: Option<GenkeyResult>,
    /// The first error raised by a callback during the operation.
    pub callback_error: Option<HostError>,
}

impl GpgmeError {
    pub fn new(error: engine::Error) -> Self {
        GpgmeError { error, ..Default::default() }
    }

    pub fn source(&self) -> ErrorSource {
        self.error.source()
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    /// Returns the description of the error code.
    pub fn message(&self) -> String {
        self.error.description()
    }
}

impl From<engine::Error> for GpgmeError {
    fn from(error: engine::Error) -> Self {
        GpgmeError::new(error)
    }
}

fn callback_suffix(e: &Option<HostError>) -> String {
    e.as_ref().map(|e| format!(" (callback: {})", e)).unwrap_or_default()
}
