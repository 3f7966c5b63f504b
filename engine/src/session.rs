//! The engine and session interfaces.

use std::ffi::CString;

use crate::abi::{Callback, EditCb, PassphraseCb, ProgressCb, StatusCb};
use crate::types::*;
use crate::{Data, Result};

/// An engine implementation.
///
/// An engine is loaded once per process and hands out sessions.
pub trait Engine: Send + Sync {
    /// Checks that the engine implements at least `required`.
    ///
    /// Returns the version of the engine, or `None` if the engine is
    /// too old.  Without a requirement, just returns the version.
    fn check_version(&self, required: Option<&str>) -> Option<String>;

    /// Returns information about the backends.
    fn engine_info(&self) -> Vec<EngineInfo>;

    /// Creates a new session.
    fn new_session(&self) -> Result<Box<dyn Session>>;
}

/// A session with the engine.
///
/// A session is not thread safe: it must only be driven by one
/// thread at a time.  Results returned by the `*_result` accessors
/// borrow the session and are therefore invalidated by the next
/// operation.
pub trait Session: Send {
    fn protocol(&self) -> Protocol;
    fn set_protocol(&mut self, protocol: Protocol) -> Result<()>;

    fn armor(&self) -> bool;
    fn set_armor(&mut self, yes: bool);

    fn textmode(&self) -> bool;
    fn set_textmode(&mut self, yes: bool);

    fn offline(&self) -> bool;
    fn set_offline(&mut self, yes: bool);

    fn include_certs(&self) -> i32;
    fn set_include_certs(&mut self, nr_of_certs: i32);

    fn keylist_mode(&self) -> KeylistMode;
    fn set_keylist_mode(&mut self, mode: KeylistMode) -> Result<()>;

    fn pinentry_mode(&self) -> PinentryMode;
    fn set_pinentry_mode(&mut self, mode: PinentryMode) -> Result<()>;

    fn sender(&self) -> Option<&str>;
    fn set_sender(&mut self, sender: Option<&str>) -> Result<()>;

    /// Returns the engine info of this session.
    fn engine_info(&self) -> Vec<EngineInfo>;

    /// Changes the backend used by this session.
    ///
    /// `None` selects the default for that field.
    fn set_engine_info(&mut self, protocol: Protocol,
                       file_name: Option<&str>, home_dir: Option<&str>)
                       -> Result<()>;

    /// Sets a locale category (`LC_CTYPE` or `LC_MESSAGES`).
    fn set_locale(&mut self, category: i32, value: Option<&str>)
                  -> Result<()>;

    fn signers(&self) -> Vec<Key>;
    fn signers_clear(&mut self);
    fn signers_add(&mut self, key: &Key) -> Result<()>;

    fn sig_notations(&self) -> Vec<SigNotation>;
    fn sig_notation_clear(&mut self);
    fn sig_notation_add(&mut self, name: Option<&str>, value: &[u8],
                        flags: SigNotationFlags) -> Result<()>;

    fn passphrase_cb(&self) -> Option<Callback<PassphraseCb>>;
    fn set_passphrase_cb(&mut self, cb: Option<Callback<PassphraseCb>>);

    fn progress_cb(&self) -> Option<Callback<ProgressCb>>;
    fn set_progress_cb(&mut self, cb: Option<Callback<ProgressCb>>);

    fn status_cb(&self) -> Option<Callback<StatusCb>>;
    fn set_status_cb(&mut self, cb: Option<Callback<StatusCb>>);

    /// Looks up a key by fingerprint or key id.
    ///
    /// Fails with `EOF` if there is no such key.
    fn get_key(&mut self, fpr: &str, secret: bool) -> Result<Key>;

    /// Encrypts `plain` into `cipher`.
    ///
    /// Without recipients, encrypts symmetrically.
    fn op_encrypt(&mut self, recipients: Option<&[&Key]>,
                  flags: EncryptFlags, plain: &mut Data, cipher: &mut Data)
                  -> Result<()>;

    /// Signs with the configured signers and encrypts.
    fn op_encrypt_sign(&mut self, recipients: Option<&[&Key]>,
                       flags: EncryptFlags,
                       plain: &mut Data, cipher: &mut Data) -> Result<()>;

    fn op_decrypt(&mut self, cipher: &mut Data, plain: &mut Data)
                  -> Result<()>;

    /// Decrypts and verifies embedded signatures.
    fn op_decrypt_verify(&mut self, cipher: &mut Data, plain: &mut Data)
                         -> Result<()>;

    fn op_sign(&mut self, plain: &mut Data, sig: &mut Data, mode: SigMode)
               -> Result<()>;

    /// Verifies a signature.
    ///
    /// For detached signatures, `signed_text` holds the signed data.
    /// Otherwise, the signed data is written to `plain`, if given.
    fn op_verify(&mut self, sig: &mut Data, signed_text: Option<&mut Data>,
                 plain: Option<&mut Data>) -> Result<()>;

    fn op_import(&mut self, keydata: &mut Data) -> Result<()>;

    /// Imports keys found by an external key listing.
    fn op_import_keys(&mut self, keys: &[&Key]) -> Result<()>;

    /// Exports keys matching the patterns.
    ///
    /// Without patterns, exports all keys.
    fn op_export(&mut self, patterns: Option<&[CString]>, mode: ExportMode,
                 keydata: Option<&mut Data>) -> Result<()>;

    fn op_export_keys(&mut self, keys: &[&Key], mode: ExportMode,
                      keydata: Option<&mut Data>) -> Result<()>;

    /// Generates a key from a parameter block.
    fn op_genkey(&mut self, params: &str, pubkey: Option<&mut Data>,
                 seckey: Option<&mut Data>) -> Result<()>;

    fn op_delete(&mut self, key: &Key, flags: DeleteFlags) -> Result<()>;

    /// Runs an interactive edit session on `key`.
    fn op_edit(&mut self, key: &Key, cb: Callback<EditCb>, out: &mut Data)
               -> Result<()>;

    /// Runs an interactive edit session on the smartcard holding
    /// `key`.
    fn op_card_edit(&mut self, key: &Key, cb: Callback<EditCb>,
                    out: &mut Data) -> Result<()>;

    /// Starts listing keys.
    fn op_keylist_start(&mut self, patterns: Option<&[CString]>,
                        secret_only: bool) -> Result<()>;

    /// Returns the next key, or `EOF` when done.
    fn op_keylist_next(&mut self) -> Result<Key>;

    /// Ends the listing.
    fn op_keylist_end(&mut self) -> Result<()>;

    fn op_encrypt_result(&self) -> Option<&EncryptResult>;
    fn op_decrypt_result(&self) -> Option<&DecryptResult>;
    fn op_sign_result(&self) -> Option<&SignResult>;
    fn op_verify_result(&self) -> Option<&VerifyResult>;
    fn op_import_result(&self) -> Option<&ImportResult>;
    fn op_genkey_result(&self) -> Option<&GenkeyResult>;
}
