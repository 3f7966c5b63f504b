//! Operation drivers.
//!
//! Every driver has the same shape: adapt the streams, run one engine
//! operation with the runtime suspended, copy the operation's result
//! out of the session before releasing it, release the streams, and
//! either return the result or an error annotated with it.

use std::sync::Arc;

use crate::callbacks::{self, EditHook};
use crate::context::cstrings;
use crate::data::{adapt, adapt_opt};
use crate::engine::abi::{Callback, EditCb};
use crate::engine::{DeleteFlags, EncryptFlags, ExportMode, GenkeyResult,
                    ImportResult, Key, NewSignature, SigMode, Signature};
use crate::host::{Callable, Stream};
use crate::{Context, Error, GpgmeError, KeyIter, Result};

/// Wraps an annotated engine error.
fn fail(e: GpgmeError) -> anyhow::Error {
    Error::Gpgme(e).into()
}

impl Context {
    /// Returns the key with the given fingerprint or key id.
    ///
    /// Fails with `EOF` if there is no such key.
    pub fn get_key(&self, fpr: &str, secret: bool) -> Result<Key> {
        if fpr.contains('\0') {
            return Err(Error::InvalidArgument(
                format!("Fingerprint {:?} contains a NUL byte", fpr)).into());
        }

        let r = {
            let mut s = self.inner.begin();
            let r = s.get_key(fpr, secret);
            s.conclude(r)
        };
        r.map_err(fail)
    }

    /// Encrypts `plain` to `recipients`, writing to `cipher`.
    ///
    /// Without recipients, encrypts symmetrically using a passphrase
    /// obtained from the passphrase callback.  On failure, unusable
    /// recipients are listed in the error's `invalid_recipients`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use sequoia_gpgme::{Context, EncryptFlags, Module};
    /// use sequoia_gpgme::host::{callable, write_fd, BytesIO, Value};
    ///
    /// # fn main() -> sequoia_gpgme::Result<()> {
    /// let module = Module::in_process()?;
    /// let ctx = Context::configure(&module).ephemeral().build()?;
    /// ctx.set_passphrase_cb(Some(callable(|args| {
    ///     write_fd(args[3].as_int().unwrap() as i32, b"secret\n")?;
    ///     Ok(Value::None)
    /// })));
    ///
    /// let cipher = Arc::new(BytesIO::new());
    /// ctx.encrypt(None, EncryptFlags::default(),
    ///             Arc::new(BytesIO::with_data("hello")), cipher.clone())?;
    ///
    /// cipher.rewind();
    /// let plain = Arc::new(BytesIO::new());
    /// ctx.decrypt(cipher, plain.clone())?;
    /// assert_eq!(plain.getvalue(), b"hello");
    /// # Ok(())
    /// # }
    /// ```
    pub fn encrypt(&self, recipients: Option<&[&Key]>, flags: EncryptFlags,
                   plain: Arc<dyn Stream>, cipher: Arc<dyn Stream>)
                   -> Result<()> {
        log::debug!("Context::encrypt: {:?} recipients",
                    recipients.map(|r| r.len()));
        let mut plain = adapt(&self.inner, plain)?;
        let mut cipher = adapt(&self.inner, cipher)?;

        let (r, result) = {
            let mut s = self.inner.begin();
            let r = s.op_encrypt(recipients, flags, &mut plain, &mut cipher);
            (s.conclude(r), s.op_encrypt_result().cloned())
        };

        r.map_err(|mut e| {
            if let Some(result) = result {
                e.invalid_recipients = result.invalid_recipients;
            }
            fail(e)
        })
    }

    /// Signs `plain` with the configured signers and encrypts it to
    /// `recipients`.
    ///
    /// Returns the new signatures.
    pub fn encrypt_sign(&self, recipients: Option<&[&Key]>,
                        flags: EncryptFlags, plain: Arc<dyn Stream>,
                        cipher: Arc<dyn Stream>) -> Result<Vec<NewSignature>> {
        log::debug!("Context::encrypt_sign: {:?} recipients",
                    recipients.map(|r| r.len()));
        let mut plain = adapt(&self.inner, plain)?;
        let mut cipher = adapt(&self.inner, cipher)?;

        let (r, encrypt_result, sign_result) = {
            let mut s = self.inner.begin();
            let r = s.op_encrypt_sign(recipients, flags, &mut plain,
                                      &mut cipher);
            (s.conclude(r), s.op_encrypt_result().cloned(),
             s.op_sign_result().cloned())
        };

        if let Err(mut e) = r {
            if let Some(result) = encrypt_result {
                e.invalid_recipients = result.invalid_recipients;
            }
            if let Some(result) = sign_result {
                e.invalid_signers = result.invalid_signers;
                e.new_signatures = result.signatures;
            }
            return Err(fail(e));
        }

        Ok(sign_result.map(|r| r.signatures).unwrap_or_default())
    }

    /// Decrypts `cipher`, writing to `plain`.
    ///
    /// On failure, the error carries the name of an unsupported
    /// algorithm and whether a key was used against its key flags.
    pub fn decrypt(&self, cipher: Arc<dyn Stream>, plain: Arc<dyn Stream>)
                   -> Result<()> {
        log::debug!("Context::decrypt");
        let mut cipher = adapt(&self.inner, cipher)?;
        let mut plain = adapt(&self.inner, plain)?;

        let (r, result) = {
            let mut s = self.inner.begin();
            let r = s.op_decrypt(&mut cipher, &mut plain);
            (s.conclude(r), s.op_decrypt_result().cloned())
        };

        r.map_err(|mut e| {
            if let Some(result) = result {
                e.unsupported_algorithm = result.unsupported_algorithm;
                e.wrong_key_usage = result.wrong_key_usage;
            }
            fail(e)
        })
    }

    /// Decrypts `cipher`, writing to `plain`, and verifies embedded
    /// signatures.
    ///
    /// Returns the verified signatures, which may be empty.
    pub fn decrypt_verify(&self, cipher: Arc<dyn Stream>,
                          plain: Arc<dyn Stream>) -> Result<Vec<Signature>> {
        log::debug!("Context::decrypt_verify");
        let mut cipher = adapt(&self.inner, cipher)?;
        let mut plain = adapt(&self.inner, plain)?;

        let (r, decrypt_result, verify_result) = {
            let mut s = self.inner.begin();
            let r = s.op_decrypt_verify(&mut cipher, &mut plain);
            (s.conclude(r), s.op_decrypt_result().cloned(),
             s.op_verify_result().cloned())
        };

        if let Err(mut e) = r {
            if let Some(result) = decrypt_result {
                e.unsupported_algorithm = result.unsupported_algorithm;
                e.wrong_key_usage = result.wrong_key_usage;
            }
            if let Some(result) = verify_result {
                e.signatures = result.signatures;
            }
            return Err(fail(e));
        }

        Ok(verify_result.map(|r| r.signatures).unwrap_or_default())
    }

    /// Signs `plain` with the configured signers, writing to `sig`.
    ///
    /// Returns the new signatures.  On failure, the error lists the
    /// signers that could not be used and the signatures made so far.
    pub fn sign(&self, plain: Arc<dyn Stream>, sig: Arc<dyn Stream>,
                mode: SigMode) -> Result<Vec<NewSignature>> {
        log::debug!("Context::sign: {:?}", mode);
        let mut plain = adapt(&self.inner, plain)?;
        let mut sig = adapt(&self.inner, sig)?;

        let (r, result) = {
            let mut s = self.inner.begin();
            let r = s.op_sign(&mut plain, &mut sig, mode);
            (s.conclude(r), s.op_sign_result().cloned())
        };

        match (r, result) {
            (Ok(()), result) =>
                Ok(result.map(|r| r.signatures).unwrap_or_default()),
            (Err(mut e), result) => {
                if let Some(result) = result {
                    e.invalid_signers = result.invalid_signers;
                    e.new_signatures = result.signatures;
                }
                Err(fail(e))
            },
        }
    }

    /// Verifies a signature.
    ///
    /// For a detached signature, `signed_text` is the signed data.
    /// Otherwise, the signed data is written to `plaintext`, if
    /// given.  Bad signatures are not errors: check the returned
    /// signatures' status and summary.
    pub fn verify(&self, sig: Arc<dyn Stream>,
                  signed_text: Option<Arc<dyn Stream>>,
                  plaintext: Option<Arc<dyn Stream>>)
                  -> Result<Vec<Signature>> {
        log::debug!("Context::verify");
        let mut sig = adapt(&self.inner, sig)?;
        let mut signed_text = adapt_opt(&self.inner, signed_text)?;
        let mut plaintext = adapt_opt(&self.inner, plaintext)?;

        let (r, result) = {
            let mut s = self.inner.begin();
            let r = s.op_verify(&mut sig, signed_text.as_mut(),
                                plaintext.as_mut());
            (s.conclude(r), s.op_verify_result().cloned())
        };

        let signatures = result.map(|r| r.signatures).unwrap_or_default();
        match r {
            Ok(()) => Ok(signatures),
            Err(mut e) => {
                e.signatures = signatures;
                Err(fail(e))
            },
        }
    }

    /// Imports keys from `keydata`.
    pub fn import(&self, keydata: Arc<dyn Stream>) -> Result<ImportResult> {
        log::debug!("Context::import");
        let mut keydata = adapt(&self.inner, keydata)?;

        let (r, result) = {
            let mut s = self.inner.begin();
            let r = s.op_import(&mut keydata);
            (s.conclude(r), s.op_import_result().cloned())
        };

        match r {
            Ok(()) => Ok(result.unwrap_or_default()),
            Err(mut e) => {
                e.import_result = result;
                Err(fail(e))
            },
        }
    }

    /// Imports keys found by an external key listing.
    pub fn import_keys(&self, keys: &[&Key]) -> Result<ImportResult> {
        log::debug!("Context::import_keys: {} keys", keys.len());
        let (r, result) = {
            let mut s = self.inner.begin();
            let r = s.op_import_keys(keys);
            (s.conclude(r), s.op_import_result().cloned())
        };

        match r {
            Ok(()) => Ok(result.unwrap_or_default()),
            Err(mut e) => {
                e.import_result = result;
                Err(fail(e))
            },
        }
    }

    /// Exports the keys matching `patterns` to `keydata`.
    ///
    /// Without patterns, exports all keys.  Not finding any key is
    /// not an error.
    pub fn export(&self, patterns: Option<&[&str]>,
                  keydata: Option<Arc<dyn Stream>>, mode: ExportMode)
                  -> Result<()> {
        log::debug!("Context::export: {:?}", patterns);
        let patterns = patterns.map(cstrings).transpose()?;
        let mut keydata = adapt_opt(&self.inner, keydata)?;

        let r = {
            let mut s = self.inner.begin();
            let r = s.op_export(patterns.as_deref(), mode, keydata.as_mut());
            s.conclude(r)
        };
        r.map_err(fail)
    }

    /// Exports `keys` to `keydata`.
    pub fn export_keys(&self, keys: &[&Key], keydata: Option<Arc<dyn Stream>>,
                       mode: ExportMode) -> Result<()> {
        log::debug!("Context::export_keys: {} keys", keys.len());
        let mut keydata = adapt_opt(&self.inner, keydata)?;

        let r = {
            let mut s = self.inner.begin();
            let r = s.op_export_keys(keys, mode, keydata.as_mut());
            s.conclude(r)
        };
        r.map_err(fail)
    }

    /// Generates a key.
    ///
    /// `params` is a `GnupgKeyParms` block.  For OpenPGP, the key is
    /// stored in the keyring and `pubkey` and `seckey` must be
    /// `None`.
    pub fn genkey(&self, params: &str, pubkey: Option<Arc<dyn Stream>>,
                  seckey: Option<Arc<dyn Stream>>) -> Result<GenkeyResult> {
        log::debug!("Context::genkey");
        let mut pubkey = adapt_opt(&self.inner, pubkey)?;
        let mut seckey = adapt_opt(&self.inner, seckey)?;

        let (r, result) = {
            let mut s = self.inner.begin();
            let r = s.op_genkey(params, pubkey.as_mut(), seckey.as_mut());
            (s.conclude(r), s.op_genkey_result().cloned())
        };

        match r {
            Ok(()) => Ok(result.unwrap_or_default()),
            Err(mut e) => {
                e.genkey_result = result;
                Err(fail(e))
            },
        }
    }

    /// Deletes `key`.
    ///
    /// Keys with secret key material are only deleted with
    /// `DeleteFlags::ALLOW_SECRET`.
    pub fn delete(&self, key: &Key, flags: DeleteFlags) -> Result<()> {
        log::debug!("Context::delete: {:?}", key.fpr());
        let r = {
            let mut s = self.inner.begin();
            let r = s.op_delete(key, flags);
            s.conclude(r)
        };
        r.map_err(fail)
    }

    /// Runs an interactive edit session on `key`.
    ///
    /// `callback` is invoked with `(status, args, fd)` for every
    /// status line of the session; for prompts it answers by writing
    /// a line to `fd`.  The session's transcript goes to `out`.
    pub fn edit(&self, key: &Key, callback: Arc<dyn Callable>,
                out: Arc<dyn Stream>) -> Result<()> {
        log::warn!("Context::edit is deprecated, \
                    key edit sessions are fragile");
        self.run_edit(key, callback, out, false)
    }

    /// Runs an interactive edit session on the smartcard holding
    /// `key`.
    pub fn card_edit(&self, key: &Key, callback: Arc<dyn Callable>,
                     out: Arc<dyn Stream>) -> Result<()> {
        log::warn!("Context::card_edit is deprecated, \
                    key edit sessions are fragile");
        self.run_edit(key, callback, out, true)
    }

    fn run_edit(&self, key: &Key, callback: Arc<dyn Callable>,
                out: Arc<dyn Stream>, card: bool) -> Result<()> {
        let mut out = adapt(&self.inner, out)?;
        let hook = EditHook { inner: &self.inner, callback };
        let cb = Callback::new(callbacks::edit as EditCb,
                               &hook as *const EditHook as *mut libc::c_void);

        let r = {
            let mut s = self.inner.begin();
            let r = if card {
                s.op_card_edit(key, cb, &mut out)
            } else {
                s.op_edit(key, cb, &mut out)
            };
            s.conclude(r)
        };
        r.map_err(fail)
    }

    /// Lists keys.
    ///
    /// Without patterns, lists all keys.  Keys are fetched one at a
    /// time as the returned iterator is advanced.
    ///
    /// # Examples
    ///
    /// ```
    /// use sequoia_gpgme::{Context, Module};
    ///
    /// # fn main() -> sequoia_gpgme::Result<()> {
    /// let module = Module::in_process()?;
    /// let ctx = Context::configure(&module).ephemeral().build()?;
    /// assert_eq!(ctx.keylist(None, false)?.count(), 0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn keylist(&self, patterns: Option<&[&str]>, secret_only: bool)
                   -> Result<KeyIter> {
        log::debug!("Context::keylist: {:?}, secret_only: {}",
                    patterns, secret_only);
        let patterns = patterns.map(cstrings).transpose()?;

        let r = {
            let mut s = self.inner.begin();
            let r = s.op_keylist_start(patterns.as_deref(), secret_only);
            s.conclude(r)
        };
        r.map_err(fail)?;

        Ok(KeyIter::new(self.clone()))
    }
}
