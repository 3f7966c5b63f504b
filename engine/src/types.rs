//! Enumerations and value types of the engine interface.
//!
//! The enumerations are plain integers.  Keys, signatures and
//! operation results are copied out of the engine into the structs
//! defined here, so they stay valid after the next operation.

use serde::{Deserialize, Serialize};

use crate::Error;

opaque_int! {
    /// The cryptographic protocol a session speaks.
    pub struct Protocol(u32) {
        const OPENPGP = 0;
        const CMS = 1;
        const GPGCONF = 2;
        const ASSUAN = 3;
        const G13 = 4;
        const UISERVER = 5;
        const SPAWN = 6;
        const DEFAULT = 254;
        const UNKNOWN = 255;
    }
}

opaque_int! {
    /// Where and how keys are listed.
    pub struct KeylistMode(u32) {
        const LOCAL = 1;
        const EXTERN = 2;
        const SIGS = 4;
        const SIG_NOTATIONS = 8;
        const WITH_SECRET = 16;
        const EPHEMERAL = 128;
        const VALIDATE = 256;
    }
}

opaque_int! {
    /// How passphrases are requested.
    pub struct PinentryMode(u32) {
        const DEFAULT = 0;
        const ASK = 1;
        const CANCEL = 2;
        const ERROR = 3;
        const LOOPBACK = 4;
    }
}

opaque_int! {
    /// Export flags.
    pub struct ExportMode(u32) {
        const EXTERN = 2;
        const MINIMAL = 4;
        const SECRET = 16;
        const RAW = 32;
        const PKCS12 = 64;
    }
}

opaque_int! {
    /// Encryption flags.
    pub struct EncryptFlags(u32) {
        const ALWAYS_TRUST = 1;
        const NO_ENCRYPT_TO = 2;
        const PREPARE = 4;
        const EXPECT_SIGN = 8;
        const NO_COMPRESS = 16;
        const SYMMETRIC = 32;
    }
}

opaque_int! {
    /// Signature modes.
    pub struct SigMode(u32) {
        const NORMAL = 0;
        const DETACH = 1;
        const CLEAR = 2;
    }
}

opaque_int! {
    /// Key deletion flags.
    pub struct DeleteFlags(u32) {
        const ALLOW_SECRET = 1;
        const FORCE = 2;
    }
}

opaque_int! {
    /// Summary of a signature verification.
    pub struct Sigsum(u32) {
        const VALID = 0x0001;
        const GREEN = 0x0002;
        const RED = 0x0004;
        const KEY_REVOKED = 0x0010;
        const KEY_EXPIRED = 0x0020;
        const SIG_EXPIRED = 0x0040;
        const KEY_MISSING = 0x0080;
        const CRL_MISSING = 0x0100;
        const CRL_TOO_OLD = 0x0200;
        const BAD_POLICY = 0x0400;
        const SYS_ERROR = 0x0800;
    }
}

opaque_int! {
    /// Validity of a key or user id.
    pub struct Validity(u32) {
        const UNKNOWN = 0;
        const UNDEFINED = 1;
        const NEVER = 2;
        const MARGINAL = 3;
        const FULL = 4;
        const ULTIMATE = 5;
    }
}

opaque_int! {
    /// Public key algorithms.
    pub struct PubkeyAlgo(u32) {
        const RSA = 1;
        const RSA_E = 2;
        const RSA_S = 3;
        const ELG_E = 16;
        const DSA = 17;
        const ECC = 18;
        const ELG = 20;
        const ECDSA = 301;
        const ECDH = 302;
        const EDDSA = 303;
    }
}

opaque_int! {
    /// Hash algorithms.
    pub struct HashAlgo(u32) {
        const NONE = 0;
        const MD5 = 1;
        const SHA1 = 2;
        const RMD160 = 3;
        const SHA256 = 8;
        const SHA384 = 9;
        const SHA512 = 10;
        const SHA224 = 11;
    }
}

opaque_int! {
    /// Signature notation flags.
    pub struct SigNotationFlags(u32) {
        const HUMAN_READABLE = 1;
        const CRITICAL = 2;
    }
}

opaque_int! {
    /// What an import did to a key.
    pub struct ImportFlags(u32) {
        const NEW = 1;
        const UID = 2;
        const SIG = 4;
        const SUBKEY = 8;
        const SECRET = 16;
    }
}

opaque_int! {
    /// Status codes passed to edit callbacks.
    pub struct StatusCode(u32) {
        const EOF = 0;
        const ENTER = 1;
        const LEAVE = 2;
        const ABORT = 3;
        const KEY_CONSIDERED = 44;
        const GET_BOOL = 48;
        const GET_LINE = 49;
        const GET_HIDDEN = 50;
        const GOT_IT = 51;
        const KEY_CREATED = 52;
        const CARDCTRL = 66;
    }
}

/// A subkey of a key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Subkey {
    pub revoked: bool,
    pub expired: bool,
    pub disabled: bool,
    pub invalid: bool,
    pub can_encrypt: bool,
    pub can_sign: bool,
    pub can_certify: bool,
    pub can_authenticate: bool,
    pub secret: bool,
    pub pubkey_algo: PubkeyAlgo,
    pub length: u32,
    pub keyid: String,
    pub fpr: String,
    pub timestamp: i64,
    /// Zero if the subkey does not expire.
    pub expires: i64,
}

/// A user id of a key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserId {
    pub revoked: bool,
    pub invalid: bool,
    pub validity: Validity,
    pub uid: String,
    pub name: String,
    pub email: String,
    pub comment: String,
}

impl UserId {
    /// Builds a user id from its components.
    pub fn new(name: &str, comment: &str, email: &str) -> Self {
        let mut uid = String::from(name);
        if ! comment.is_empty() {
            if ! uid.is_empty() {
                uid.push(' ');
            }
            uid.push_str(&format!("({})", comment));
        }
        if ! email.is_empty() {
            if ! uid.is_empty() {
                uid.push(' ');
            }
            uid.push_str(&format!("<{}>", email));
        }

        UserId {
            uid,
            name: name.into(),
            email: email.into(),
            comment: comment.into(),
            ..Default::default()
        }
    }
}

/// A key as listed by the engine.
///
/// The first subkey is the primary key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub revoked: bool,
    pub expired: bool,
    pub disabled: bool,
    pub invalid: bool,
    pub can_encrypt: bool,
    pub can_sign: bool,
    pub can_certify: bool,
    pub can_authenticate: bool,
    pub secret: bool,
    pub protocol: Protocol,
    pub owner_trust: Validity,
    pub subkeys: Vec<Subkey>,
    pub uids: Vec<UserId>,
}

impl Key {
    /// Returns the fingerprint of the primary key.
    pub fn fpr(&self) -> Option<&str> {
        self.subkeys.first().map(|k| k.fpr.as_str())
    }

    /// Returns the key id of the primary key.
    pub fn keyid(&self) -> Option<&str> {
        self.subkeys.first().map(|k| k.keyid.as_str())
    }

    /// Returns the primary user id.
    pub fn primary_uid(&self) -> Option<&UserId> {
        self.uids.first()
    }
}

/// A notation attached to a signature.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SigNotation {
    /// `None` for policy URLs.
    pub name: Option<String>,
    pub value: Vec<u8>,
    pub flags: SigNotationFlags,
}

impl SigNotation {
    /// Returns whether the value is meant to be read as text.
    pub fn human_readable(&self) -> bool {
        self.flags.contains(SigNotationFlags::HUMAN_READABLE)
    }

    /// Returns the value as text, if it is human readable.
    pub fn value_text(&self) -> Option<&str> {
        if self.human_readable() {
            std::str::from_utf8(&self.value).ok()
        } else {
            None
        }
    }
}

/// A key that could not be used for an operation.
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidKey {
    pub fpr: Option<String>,
    pub reason: Error,
}

/// Result of an encryption.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncryptResult {
    pub invalid_recipients: Vec<InvalidKey>,
}

/// A recipient of an encrypted message.
#[derive(Clone, Debug, PartialEq)]
pub struct Recipient {
    pub keyid: String,
    pub pubkey_algo: PubkeyAlgo,
    pub status: Error,
}

/// Result of a decryption.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecryptResult {
    pub unsupported_algorithm: Option<String>,
    pub wrong_key_usage: bool,
    pub recipients: Vec<Recipient>,
    pub file_name: Option<String>,
}

/// A signature made by a signing operation.
#[derive(Clone, Debug, PartialEq)]
pub struct NewSignature {
    pub typ: SigMode,
    pub pubkey_algo: PubkeyAlgo,
    pub hash_algo: HashAlgo,
    pub timestamp: i64,
    pub fpr: String,
    pub sig_class: u32,
}

/// Result of a signing operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignResult {
    pub invalid_signers: Vec<InvalidKey>,
    pub signatures: Vec<NewSignature>,
}

/// A verified signature.
#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub summary: Sigsum,
    pub fpr: String,
    pub status: Error,
    pub notations: Vec<SigNotation>,
    pub timestamp: i64,
    pub exp_timestamp: i64,
    pub wrong_key_usage: bool,
    pub validity: Validity,
    pub validity_reason: Error,
    pub pubkey_algo: PubkeyAlgo,
    pub hash_algo: HashAlgo,
}

/// Result of a verification.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VerifyResult {
    pub signatures: Vec<Signature>,
    pub file_name: Option<String>,
}

/// What happened to one key during an import.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportStatus {
    pub fpr: String,
    pub result: Error,
    pub status: ImportFlags,
}

/// Statistics of an import.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportResult {
    pub considered: i32,
    pub no_user_id: i32,
    pub imported: i32,
    pub imported_rsa: i32,
    pub unchanged: i32,
    pub new_user_ids: i32,
    pub new_sub_keys: i32,
    pub new_signatures: i32,
    pub new_revocations: i32,
    pub secret_read: i32,
    pub secret_imported: i32,
    pub secret_unchanged: i32,
    pub skipped_new_keys: i32,
    pub not_imported: i32,
    pub imports: Vec<ImportStatus>,
}

/// Result of a key generation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenkeyResult {
    pub primary: bool,
    pub sub: bool,
    pub fpr: Option<String>,
}

/// Information about a backend of the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineInfo {
    pub protocol: Protocol,
    pub file_name: Option<String>,
    pub version: Option<String>,
    pub req_version: Option<String>,
    pub home_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userid() {
        let u = UserId::new("Alice", "", "alice@example.org");
        assert_eq!(u.uid, "Alice <alice@example.org>");
        let u = UserId::new("Bob", "work", "");
        assert_eq!(u.uid, "Bob (work)");
        let u = UserId::new("", "", "carol@example.org");
        assert_eq!(u.uid, "<carol@example.org>");
    }

    #[test]
    fn notation_value() {
        let n = SigNotation {
            name: Some("test@example.org".into()),
            value: b"hello".to_vec(),
            flags: SigNotationFlags::HUMAN_READABLE,
        };
        assert_eq!(n.value_text(), Some("hello"));

        let n = SigNotation { flags: SigNotationFlags::default(), ..n };
        assert_eq!(n.value_text(), None);
    }

    #[test]
    fn flags() {
        let f = KeylistMode::LOCAL | KeylistMode::SIGS;
        assert!(f.contains(KeylistMode::LOCAL));
        assert!(! f.contains(KeylistMode::EXTERN));
        assert_eq!(f.bits(), 5);
    }
}
