//! Engine error values.
//!
//! The engine reports failures as a single packed integer carrying
//! an error source (which component failed) and an error code (what
//! went wrong).  Codes with the system-error bit set carry an
//! `errno` value.

use std::fmt;
use std::io;

use crate::abi::RawError;

/// Mask of the source bits, after shifting.
const SOURCE_MASK: RawError = 127;
/// Position of the source bits.
const SOURCE_SHIFT: u32 = 24;
/// Mask of the code bits.
const CODE_MASK: RawError = 65535;

opaque_int! {
    /// The component an error originates from.
    pub struct ErrorSource(u32) {
        /// Unspecified source.
        const UNKNOWN = 0;
        /// The cryptographic library.
        const GCRYPT = 1;
        /// The OpenPGP backend.
        const GPG = 2;
        /// The CMS backend.
        const GPGSM = 3;
        /// The key agent.
        const GPGAGENT = 4;
        /// The PIN entry.
        const PINENTRY = 5;
        /// The smartcard daemon.
        const SCD = 6;
        /// The engine interface itself.
        const GPGME = 7;
        /// The keybox.
        const KEYBOX = 8;
        /// First user defined source.
        const USER_1 = 32;
    }
}

opaque_int! {
    /// What went wrong.
    pub struct ErrorCode(u32) {
        const NO_ERROR = 0;
        const GENERAL = 1;
        const BAD_SIGNATURE = 8;
        const NO_PUBKEY = 9;
        const BAD_PASSPHRASE = 11;
        const NO_SECKEY = 17;
        const NOT_FOUND = 27;
        const INV_ARG = 45;
        const UNUSABLE_PUBKEY = 53;
        const UNUSABLE_SECKEY = 54;
        const INV_VALUE = 55;
        const NO_DATA = 58;
        const UNSUPPORTED_ALGORITHM = 84;
        const NO_PIN_ENTRY = 85;
        const NOT_IMPLEMENTED = 69;
        const CONFLICT = 70;
        const CANCELED = 99;
        const AMBIGUOUS_NAME = 107;
        const CARD_NOT_PRESENT = 112;
        const UNSUPPORTED_PROTOCOL = 121;
        const INV_ENGINE = 150;
        const DECRYPT_FAILED = 152;
        const EOF = 16383;
        /// Marks codes that carry an `errno` value in the low bits.
        const SYSTEM_ERROR = 1 << 15;
    }
}

impl ErrorCode {
    /// Maps an `errno` value to a system error code.
    pub fn from_errno(errno: i32) -> Self {
        if errno <= 0 {
            return ErrorCode::GENERAL;
        }
        ErrorCode(ErrorCode::SYSTEM_ERROR.0 | (errno as u32 & 0x7fff))
    }

    /// Returns the `errno` value of a system error code.
    pub fn to_errno(self) -> Option<i32> {
        if self.0 & ErrorCode::SYSTEM_ERROR.0 != 0 {
            Some((self.0 & 0x7fff) as i32)
        } else {
            None
        }
    }

    /// Returns a human-readable description of this code.
    pub fn description(self) -> String {
        if let Some(errno) = self.to_errno() {
            return io::Error::from_raw_os_error(errno).to_string();
        }

        match self {
            ErrorCode::NO_ERROR => "Success",
            ErrorCode::GENERAL => "General error",
            ErrorCode::BAD_SIGNATURE => "Bad signature",
            ErrorCode::NO_PUBKEY => "No public key",
            ErrorCode::BAD_PASSPHRASE => "Bad passphrase",
            ErrorCode::NO_SECKEY => "No secret key",
            ErrorCode::NOT_FOUND => "Not found",
            ErrorCode::INV_ARG => "Invalid argument",
            ErrorCode::UNUSABLE_PUBKEY => "Unusable public key",
            ErrorCode::UNUSABLE_SECKEY => "Unusable secret key",
            ErrorCode::INV_VALUE => "Invalid value",
            ErrorCode::NO_DATA => "No data",
            ErrorCode::UNSUPPORTED_ALGORITHM => "Unsupported algorithm",
            ErrorCode::NO_PIN_ENTRY => "No pinentry",
            ErrorCode::NOT_IMPLEMENTED => "Not implemented",
            ErrorCode::CONFLICT => "Conflicting use",
            ErrorCode::CANCELED => "Operation cancelled",
            ErrorCode::AMBIGUOUS_NAME => "Ambiguous name",
            ErrorCode::CARD_NOT_PRESENT => "Card not present",
            ErrorCode::UNSUPPORTED_PROTOCOL => "Unsupported protocol",
            ErrorCode::INV_ENGINE => "Invalid crypto engine",
            ErrorCode::DECRYPT_FAILED => "Decryption failed",
            ErrorCode::EOF => "End of file",
            ErrorCode(n) => return format!("Unknown error code {}", n),
        }.into()
    }
}

impl ErrorSource {
    /// Returns a human-readable description of this source.
    pub fn description(self) -> &'static str {
        match self {
            ErrorSource::UNKNOWN => "Unspecified source",
            ErrorSource::GCRYPT => "gcrypt",
            ErrorSource::GPG => "GnuPG",
            ErrorSource::GPGSM => "GpgSM",
            ErrorSource::GPGAGENT => "GPG Agent",
            ErrorSource::PINENTRY => "Pinentry",
            ErrorSource::SCD => "SCD",
            ErrorSource::GPGME => "GPGME",
            ErrorSource::KEYBOX => "Keybox",
            ErrorSource::USER_1 => "User defined source 1",
            _ => "Unknown source",
        }
    }
}

/// A packed engine error.
///
/// The zero value means success.  Use [`Error::check`] to turn a raw
/// value returned over the engine ABI into a `Result`.
///
///   [`Error::check`]: #method.check
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Error(RawError);

/// Result type of engine calls.
pub type Result<T> = ::std::result::Result<T, Error>;

impl Error {
    /// The success value.
    pub const NONE: Error = Error(0);

    /// Packs a source and a code.
    pub const fn new(source: ErrorSource, code: ErrorCode) -> Self {
        if code.0 == 0 {
            return Error(0);
        }
        Error(((source.0 & SOURCE_MASK) << SOURCE_SHIFT)
              | (code.0 & CODE_MASK))
    }

    /// Shorthand for an error originating in the engine interface.
    pub const fn gpgme(code: ErrorCode) -> Self {
        Error::new(ErrorSource::GPGME, code)
    }

    /// Creates an error from a raw value received over the ABI.
    pub const fn from_raw(raw: RawError) -> Self {
        Error(raw)
    }

    /// Returns the raw value to hand over the ABI.
    pub const fn raw(self) -> RawError {
        self.0
    }

    /// Creates a system error from an `errno` value.
    pub fn from_errno(source: ErrorSource, errno: i32) -> Self {
        Error::new(source, ErrorCode::from_errno(errno))
    }

    /// Converts an I/O error raised by a data object.
    ///
    /// Errors without an OS error code are mapped to `EIO`.
    pub fn from_io(source: ErrorSource, e: &io::Error) -> Self {
        Error::from_errno(source, e.raw_os_error().unwrap_or(libc::EIO))
    }

    /// Returns the source of this error.
    pub fn source(self) -> ErrorSource {
        ErrorSource((self.0 >> SOURCE_SHIFT) & SOURCE_MASK)
    }

    /// Returns the code of this error.
    pub fn code(self) -> ErrorCode {
        ErrorCode(self.0 & CODE_MASK)
    }

    /// Returns whether this value means success.
    pub fn is_ok(self) -> bool {
        self.code() == ErrorCode::NO_ERROR
    }

    /// Returns whether this is the end-of-sequence signal.
    pub fn is_eof(self) -> bool {
        self.code() == ErrorCode::EOF
    }

    /// Returns the description of the code.
    pub fn description(self) -> String {
        self.code().description()
    }

    /// Turns a raw ABI value into a `Result`.
    pub fn check(raw: RawError) -> Result<()> {
        let e = Error(raw);
        if e.is_ok() {
            Ok(())
        } else {
            Err(e)
        }
    }
}

impl Default for Error {
    fn default() -> Self {
        Error::NONE
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Error")
            .field("source", &self.source())
            .field("code", &self.code())
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.source().description(), self.description())
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e.code().to_errno() {
            Some(errno) => io::Error::from_raw_os_error(errno),
            None => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
