//! Sessions of the in-process engine.

use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::ffi::CString;
use std::io::Write;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use libc::{c_char, c_int};

use crate::abi::{Callback, EditCb, PassphraseCb, ProgressCb, StatusCb};
use crate::types::*;
use crate::{Data, Error, ErrorCode, ErrorSource, Result};

use super::keyring::{Keyring, Record, Secret};
use super::message::{self, Envelope, KeyBlock, Kind, SigPacket};
use super::params::Params;
use super::pipe::{self, Pipe};
use super::{lock, Shared, VERSION};

/// Passphrase attempts before giving up.
const PASSPHRASE_ATTEMPTS: usize = 3;

/// Prompts an edit session may issue before it is aborted.
const EDIT_PROMPTS: usize = 256;

/// Ciphers we claim to support.
const CIPHERS: &[&str] = &["AES128", "AES192", "AES256"];

/// The cipher we claim to use.
const CIPHER: &str = "AES256";

/// Let the backend decide how many certificates to include.
const INCLUDE_CERTS_DEFAULT: i32 = -256;

fn gpgme(code: ErrorCode) -> Error {
    Error::gpgme(code)
}

fn gpg(code: ErrorCode) -> Error {
    Error::new(ErrorSource::GPG, code)
}

fn io_error(e: std::io::Error) -> Error {
    Error::from_io(ErrorSource::GPGME, &e)
}

fn encoding_error(e: serde_json::Error) -> Error {
    log::error!("Encoding output failed: {}", e);
    gpgme(ErrorCode::GENERAL)
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| gpgme(ErrorCode::INV_VALUE))
}

fn as_ptr(s: &Option<CString>) -> *const c_char {
    s.as_ref().map(|s| s.as_ptr()).unwrap_or(ptr::null())
}

fn int(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(c_int::MAX)
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Generates a fresh fingerprint.
fn fingerprint() -> String {
    let bytes: [u8; 20] = rand::random();
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn keyid(fpr: &str) -> &str {
    &fpr[fpr.len().saturating_sub(16)..]
}

fn patterns(patterns: Option<&[CString]>) -> Vec<String> {
    patterns.unwrap_or(&[]).iter()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| ! p.trim().is_empty())
        .collect()
}

pub(crate) fn engine_info(file_name: Option<&str>, home_dir: Option<&str>)
                          -> EngineInfo {
    EngineInfo {
        protocol: Protocol::OPENPGP,
        file_name: Some(file_name.unwrap_or("memory").into()),
        version: Some(VERSION.into()),
        req_version: Some("1.0.0".into()),
        home_dir: home_dir.map(Into::into),
    }
}

/// Where a listed key comes from.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Origin {
    Local,
    Keyserver,
}

/// Results of the last operation.
#[derive(Default)]
struct Results {
    encrypt: Option<EncryptResult>,
    decrypt: Option<DecryptResult>,
    sign: Option<SignResult>,
    verify: Option<VerifyResult>,
    import: Option<ImportResult>,
    genkey: Option<GenkeyResult>,
}

/// A session of the in-process engine.
pub struct Session {
    shared: Arc<Shared>,
    keyring: Arc<Mutex<Keyring>>,
    file_name: Option<String>,
    home_dir: Option<String>,

    protocol: Protocol,
    armor: bool,
    textmode: bool,
    offline: bool,
    include_certs: i32,
    keylist_mode: KeylistMode,
    pinentry_mode: PinentryMode,
    sender: Option<String>,
    locale: HashMap<c_int, String>,
    signers: Vec<Key>,
    notations: Vec<SigNotation>,

    passphrase_cb: Option<Callback<PassphraseCb>>,
    progress_cb: Option<Callback<ProgressCb>>,
    status_cb: Option<Callback<StatusCb>>,

    keylist: Option<VecDeque<(Origin, String)>>,
    keylist_secret: bool,
    results: Results,
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let keyring = shared.keyring(None);
        Session {
            shared,
            keyring,
            file_name: None,
            home_dir: None,
            protocol: Protocol::OPENPGP,
            armor: false,
            textmode: false,
            offline: false,
            include_certs: INCLUDE_CERTS_DEFAULT,
            keylist_mode: KeylistMode::LOCAL,
            pinentry_mode: PinentryMode::DEFAULT,
            sender: None,
            locale: HashMap::new(),
            signers: Vec::new(),
            notations: Vec::new(),
            passphrase_cb: None,
            progress_cb: None,
            status_cb: None,
            keylist: None,
            keylist_secret: false,
            results: Results::default(),
        }
    }

    fn keyring(&self) -> MutexGuard<Keyring> {
        lock(&self.keyring)
    }

    /// Invalidates the results of the previous operation.
    fn reset(&mut self) {
        self.results = Results::default();
    }

    /// Emits a status line.
    fn status(&self, keyword: &str, args: &str) -> Result<()> {
        let cb = match self.status_cb {
            Some(cb) => cb,
            None => return Ok(()),
        };

        let keyword = cstring(keyword)?;
        let args = cstring(args)?;
        Error::check(unsafe {
            (cb.func)(cb.hook, keyword.as_ptr(), args.as_ptr())
        })
    }

    /// Reports progress.
    fn progress(&self, what: &str, typ: char, current: usize, total: usize) {
        let cb = match self.progress_cb {
            Some(cb) => cb,
            None => return,
        };

        if let Ok(what) = CString::new(what) {
            unsafe {
                (cb.func)(cb.hook, what.as_ptr(), typ as c_int,
                          int(current), int(total))
            }
        }
    }

    /// Requests a passphrase.
    fn ask_passphrase(&self, uid_hint: Option<&str>, info: Option<&str>,
                      prev_was_bad: bool) -> Result<String> {
        tracer!("memory::Session::ask_passphrase");

        match self.pinentry_mode {
            PinentryMode::CANCEL =>
                return Err(Error::new(ErrorSource::PINENTRY,
                                      ErrorCode::CANCELED)),
            PinentryMode::ERROR =>
                return Err(Error::new(ErrorSource::PINENTRY,
                                      ErrorCode::NO_PIN_ENTRY)),
            _ => (),
        }

        let cb = self.passphrase_cb.ok_or_else(|| {
            Error::new(ErrorSource::PINENTRY, ErrorCode::NO_PIN_ENTRY)
        })?;

        let uid_hint = uid_hint.map(cstring).transpose()?;
        let info = info.map(cstring).transpose()?;
        let pipe = Pipe::new().map_err(pipe::error)?;
        t!("asking, prev_was_bad: {}", prev_was_bad);
        let r = unsafe {
            (cb.func)(cb.hook, as_ptr(&uid_hint), as_ptr(&info),
                      prev_was_bad as c_int, pipe.fd())
        };
        let answer = pipe.finish().map_err(pipe::error);
        Error::check(r)?;
        answer
    }

    /// Unlocks a secret key.
    fn unlock(&self, record: &Record) -> Result<()> {
        let expected = match record.secret.as_ref()
            .and_then(|s| s.passphrase.as_ref())
        {
            Some(p) => p,
            None => return Ok(()),
        };

        let hint = record.uid_hint();
        let keyid = record.key.keyid().unwrap_or("");
        let info = format!("{} {} 1 0", keyid, keyid);
        let mut prev_was_bad = false;
        for _ in 0..PASSPHRASE_ATTEMPTS {
            self.status("NEED_PASSPHRASE", &info)?;
            let passphrase =
                self.ask_passphrase(Some(&hint), Some(&info), prev_was_bad)?;
            if &passphrase == expected {
                self.status("GOOD_PASSPHRASE", "")?;
                return Ok(());
            }
            self.status("BAD_PASSPHRASE", keyid)?;
            prev_was_bad = true;
        }

        Err(gpgme(ErrorCode::BAD_PASSPHRASE))
    }

    fn read_input(&self, data: &mut Data) -> Result<Vec<u8>> {
        let input = data.read_all().map_err(io_error)?;
        self.progress("data", '?', input.len(), input.len());
        Ok(input)
    }

    fn write_output(&self, data: &mut Data, kind: Kind, payload: &[u8],
                    armor: bool) -> Result<()> {
        data.write_all(&message::encode(kind, payload, armor))
            .map_err(io_error)
    }

    fn write_text(&self, data: &mut Data, text: &str) -> Result<()> {
        data.write_all(text.as_bytes()).map_err(io_error)
    }

    fn parse_message(&self, data: &[u8]) -> Result<Envelope> {
        match message::decode(data) {
            Some((kind, payload)) if ! kind.is_key() =>
                Envelope::from_slice(&payload),
            _ => None,
        }.ok_or_else(|| gpgme(ErrorCode::NO_DATA))
    }

    /// Checks the recipients of an encryption.
    fn check_recipients(&self, recipients: &[&Key], flags: EncryptFlags)
                        -> (Vec<Record>, Vec<InvalidKey>) {
        let keyring = self.keyring();
        let mut usable = Vec::new();
        let mut invalid = Vec::new();

        for key in recipients {
            let fpr = key.fpr().map(str::to_string);
            let reason = match fpr.as_deref().and_then(|f| keyring.get(f)) {
                None => Some(ErrorCode::NO_PUBKEY),
                Some(r) if ! r.usable() || ! r.key.can_encrypt =>
                    Some(ErrorCode::UNUSABLE_PUBKEY),
                Some(r) if ! flags.contains(EncryptFlags::ALWAYS_TRUST)
                    && r.validity() < Validity::FULL =>
                    Some(ErrorCode::UNUSABLE_PUBKEY),
                Some(r) => {
                    usable.push(r.clone());
                    None
                },
            };

            if let Some(code) = reason {
                invalid.push(InvalidKey { fpr, reason: gpg(code) });
            }
        }

        (usable, invalid)
    }

    /// Signs `body` with the configured signers.
    ///
    /// Signatures and invalid signers are recorded in the sign
    /// result as they are encountered.
    fn sign_body(&mut self, body: &[u8], mode: SigMode)
                 -> Result<Vec<SigPacket>> {
        tracer!("memory::Session::sign_body");

        let class = if mode == SigMode::CLEAR || self.textmode { 1 } else { 0 };
        let signers: Vec<(Option<String>, Option<Record>)> = {
            let keyring = self.keyring();
            if self.signers.is_empty() {
                match keyring.default_signer() {
                    Some(r) => vec![(Some(r.fpr().into()), Some(r.clone()))],
                    None => return Err(gpg(ErrorCode::NO_SECKEY)),
                }
            } else {
                self.signers.iter()
                    .map(|k| {
                        let fpr = k.fpr().map(str::to_string);
                        let r = fpr.as_deref()
                            .and_then(|f| keyring.get(f)).cloned();
                        (fpr, r)
                    })
                    .collect()
            }
        };
        t!("{} signers", signers.len());

        let mut packets = Vec::new();
        let mut failed = false;
        for (fpr, record) in signers {
            let record = match record {
                Some(r) if r.secret.is_some() && r.usable() && r.key.can_sign
                    => r,
                _ => {
                    self.results.sign.get_or_insert_with(Default::default)
                        .invalid_signers.push(InvalidKey {
                            fpr,
                            reason: gpg(ErrorCode::UNUSABLE_SECKEY),
                        });
                    failed = true;
                    continue;
                },
            };

            self.unlock(&record)?;

            let pubkey_algo = record.key.subkeys.first()
                .map(|k| k.pubkey_algo)
                .unwrap_or_default();
            let hash_algo = HashAlgo::SHA256;
            let timestamp = now();
            let fpr = record.fpr().to_string();
            self.status("SIG_CREATED",
                        &format!("{} {} {} {:02x} {} {}",
                                 match mode {
                                     SigMode::DETACH => "D",
                                     SigMode::CLEAR => "C",
                                     _ => "S",
                                 },
                                 pubkey_algo.bits(), hash_algo.bits(),
                                 class, timestamp, fpr))?;

            self.results.sign.get_or_insert_with(Default::default)
                .signatures.push(NewSignature {
                    typ: mode,
                    pubkey_algo,
                    hash_algo,
                    timestamp,
                    fpr: fpr.clone(),
                    sig_class: class,
                });
            packets.push(SigPacket {
                digest: SigPacket::digest(&fpr, timestamp, body),
                fpr,
                mode,
                class,
                timestamp,
                expires: 0,
                pubkey_algo,
                hash_algo,
                notations: self.notations.clone(),
            });
        }

        if failed {
            return Err(gpgme(ErrorCode::UNUSABLE_SECKEY));
        }
        Ok(packets)
    }

    /// Checks signatures over `body`.
    fn check_signatures(&self, packets: &[SigPacket], body: &[u8])
                        -> Result<Vec<Signature>> {
        let mut signatures = Vec::with_capacity(packets.len());

        for p in packets {
            self.status("NEWSIG", "")?;
            let record = self.keyring().get(&p.fpr).cloned();
            let mut sig = Signature {
                summary: Sigsum::default(),
                fpr: p.fpr.clone(),
                status: Error::NONE,
                notations: p.notations.clone(),
                timestamp: p.timestamp,
                exp_timestamp: p.expires,
                wrong_key_usage: false,
                validity: Validity::UNKNOWN,
                validity_reason: Error::NONE,
                pubkey_algo: p.pubkey_algo,
                hash_algo: p.hash_algo,
            };

            match record {
                None => {
                    self.status("ERRSIG",
                                &format!("{} {} {} {:02x} {} 9",
                                         keyid(&p.fpr), p.pubkey_algo.bits(),
                                         p.hash_algo.bits(), p.class,
                                         p.timestamp))?;
                    sig.summary = Sigsum::KEY_MISSING;
                    sig.status = gpg(ErrorCode::NO_PUBKEY);
                },
                Some(r) if ! p.verify(body) => {
                    self.status("BADSIG", &r.uid_hint())?;
                    sig.summary = Sigsum::RED;
                    sig.status = gpg(ErrorCode::BAD_SIGNATURE);
                },
                Some(r) => {
                    self.status("GOODSIG", &r.uid_hint())?;
                    sig.validity = r.validity();
                    sig.wrong_key_usage = ! r.key.can_sign;
                    if r.key.revoked {
                        sig.summary |= Sigsum::KEY_REVOKED;
                    }
                    if r.key.expired {
                        sig.summary |= Sigsum::KEY_EXPIRED;
                    }
                    if sig.summary == Sigsum::default()
                        && sig.validity >= Validity::FULL
                    {
                        sig.summary = Sigsum::VALID | Sigsum::GREEN;
                    }
                },
            }

            signatures.push(sig);
        }

        Ok(signatures)
    }

    fn encrypt(&mut self, recipients: Option<&[&Key]>, flags: EncryptFlags,
               plain: &mut Data, cipher: &mut Data, sign: bool)
               -> Result<()> {
        tracer!("memory::Session::encrypt");
        self.reset();
        self.results.encrypt = Some(EncryptResult::default());
        if sign {
            self.results.sign = Some(SignResult::default());
        }

        let symmetric = match recipients {
            None => true,
            Some(r) if r.is_empty() => {
                if ! flags.contains(EncryptFlags::SYMMETRIC) {
                    return Err(gpgme(ErrorCode::INV_VALUE));
                }
                true
            },
            Some(_) => flags.contains(EncryptFlags::SYMMETRIC),
        };

        let mut envelope = Envelope {
            encrypted: true,
            algorithm: Some(CIPHER.into()),
            ..Default::default()
        };

        if let Some(recipients) = recipients {
            let (usable, invalid) = self.check_recipients(recipients, flags);
            t!("{} usable, {} invalid recipients", usable.len(), invalid.len());
            if ! invalid.is_empty() {
                self.results.encrypt = Some(EncryptResult {
                    invalid_recipients: invalid,
                });
                return Err(gpgme(ErrorCode::UNUSABLE_PUBKEY));
            }
            for r in usable.iter() {
                self.status("KEY_CONSIDERED", &format!("{} 0", r.fpr()))?;
            }
            envelope.recipients =
                usable.iter().map(|r| r.fpr().to_string()).collect();
        }

        if symmetric {
            let passphrase = self.ask_passphrase(None, Some("3 9 2"), false)?;
            let salt: u64 = rand::random();
            envelope.symmetric =
                Some((salt, Envelope::passphrase_digest(salt, &passphrase)));
        }

        let body = self.read_input(plain)?;
        if sign {
            self.status("BEGIN_SIGNING", "H8")?;
            envelope.signatures = self.sign_body(&body, SigMode::NORMAL)?;
        }

        self.status("BEGIN_ENCRYPTION", "2 9")?;
        envelope.body = body;
        let envelope = envelope.to_vec().map_err(encoding_error)?;
        self.write_output(cipher, Kind::Message, &envelope, self.armor)?;
        self.status("END_ENCRYPTION", "")
    }

    fn decrypt(&mut self, cipher: &mut Data, plain: &mut Data, verify: bool)
               -> Result<()> {
        tracer!("memory::Session::decrypt");
        self.reset();
        self.results.decrypt = Some(DecryptResult::default());
        if verify {
            self.results.verify = Some(VerifyResult::default());
        }

        let data = self.read_input(cipher)?;
        let envelope = self.parse_message(&data)?;
        if ! envelope.encrypted {
            return Err(gpgme(ErrorCode::NO_DATA));
        }

        if let Some(algo) = envelope.algorithm.as_ref() {
            if ! CIPHERS.contains(&algo.as_str()) {
                t!("unsupported algorithm {}", algo);
                if let Some(r) = self.results.decrypt.as_mut() {
                    r.unsupported_algorithm = Some(algo.clone());
                }
                return Err(gpg(ErrorCode::UNSUPPORTED_ALGORITHM));
            }
        }

        self.status("BEGIN_DECRYPTION", "")?;

        let records: Vec<Option<Record>> = {
            let keyring = self.keyring();
            envelope.recipients.iter()
                .map(|fpr| keyring.get(fpr)
                     .filter(|r| r.secret.is_some())
                     .cloned())
                .collect()
        };
        let recipients = envelope.recipients.iter().zip(records.iter())
            .map(|(fpr, r)| Recipient {
                keyid: keyid(fpr).into(),
                pubkey_algo: r.as_ref()
                    .and_then(|r| r.key.subkeys.first())
                    .map(|k| k.pubkey_algo)
                    .unwrap_or_default(),
                status: if r.is_some() {
                    Error::NONE
                } else {
                    gpg(ErrorCode::NO_SECKEY)
                },
            })
            .collect();
        if let Some(r) = self.results.decrypt.as_mut() {
            r.recipients = recipients;
            r.file_name = envelope.file_name.clone();
        }

        if let Some(record) = records.iter().flatten().next() {
            self.unlock(record)?;
            if ! record.key.can_encrypt {
                if let Some(r) = self.results.decrypt.as_mut() {
                    r.wrong_key_usage = true;
                }
            }
        } else if let Some((salt, digest)) = envelope.symmetric {
            let mut prev_was_bad = false;
            let mut unlocked = false;
            for _ in 0..PASSPHRASE_ATTEMPTS {
                let passphrase =
                    self.ask_passphrase(None, Some("3 9 2"), prev_was_bad)?;
                if Envelope::passphrase_digest(salt, &passphrase) == digest {
                    unlocked = true;
                    break;
                }
                prev_was_bad = true;
            }
            if ! unlocked {
                return Err(gpgme(ErrorCode::BAD_PASSPHRASE));
            }
        } else {
            return Err(gpgme(ErrorCode::NO_SECKEY));
        }

        plain.write_all(&envelope.body).map_err(io_error)?;
        self.status("DECRYPTION_OKAY", "")?;

        if verify && ! envelope.signatures.is_empty() {
            let signatures =
                self.check_signatures(&envelope.signatures, &envelope.body)?;
            self.results.verify = Some(VerifyResult {
                signatures,
                file_name: envelope.file_name.clone(),
            });
        }

        self.status("END_DECRYPTION", "")
    }

    /// Imports one record, updating the import result.
    fn import_record(&mut self, mut record: Record) -> Result<()> {
        let fpr = record.fpr().to_string();
        let has_secret = record.secret.is_some();
        let no_uid = record.key.uids.is_empty();
        let rsa = record.key.subkeys.first()
            .map(|k| k.pubkey_algo == PubkeyAlgo::RSA)
            .unwrap_or(false);

        // Trust is local information.
        record.key.owner_trust = Validity::UNKNOWN;
        for uid in record.key.uids.iter_mut() {
            uid.validity = Validity::UNKNOWN;
        }
        let merge = self.keyring().insert(record);

        let r = self.results.import.get_or_insert_with(Default::default);
        let mut status = ImportFlags::default();
        r.considered += 1;
        if no_uid {
            r.no_user_id += 1;
        }
        if merge.new {
            r.imported += 1;
            if rsa {
                r.imported_rsa += 1;
            }
            status |= ImportFlags::NEW;
        }
        if merge.new_uids > 0 {
            r.new_user_ids += merge.new_uids;
            status |= ImportFlags::UID;
        }
        if merge.new_subkeys > 0 {
            r.new_sub_keys += merge.new_subkeys;
            status |= ImportFlags::SUBKEY;
        }
        if merge.revoked {
            r.new_revocations += 1;
        }
        if has_secret {
            r.secret_read += 1;
            if merge.new || merge.new_secret {
                r.secret_imported += 1;
                status |= ImportFlags::SECRET;
            } else {
                r.secret_unchanged += 1;
            }
        }
        if ! merge.changed() {
            r.unchanged += 1;
        }
        r.imports.push(ImportStatus {
            fpr: fpr.clone(),
            result: Error::NONE,
            status,
        });

        self.status("IMPORT_OK", &format!("{} {}", status.bits(), fpr))
    }

    fn export_records(&mut self, records: Vec<Record>, mode: ExportMode,
                      keydata: Option<&mut Data>) -> Result<()> {
        tracer!("memory::Session::export_records");
        t!("{} keys, mode {:?}", records.len(), mode);

        if mode.contains(ExportMode::RAW) || mode.contains(ExportMode::PKCS12) {
            return Err(gpgme(ErrorCode::NOT_IMPLEMENTED));
        }

        if mode.contains(ExportMode::EXTERN) {
            let mut keyserver = lock(&self.shared.keyserver);
            for r in records {
                keyserver.insert(r.public());
            }
            return Ok(());
        }

        let keydata = keydata.ok_or_else(|| gpgme(ErrorCode::INV_VALUE))?;
        let secret = mode.contains(ExportMode::SECRET);
        let mut keys = Vec::with_capacity(records.len());
        for r in records {
            if secret {
                if r.secret.is_none() {
                    continue;
                }
                self.unlock(&r)?;
                keys.push(r);
            } else {
                keys.push(r.public());
            }
        }

        // Nothing matched.  This is not an error.
        if keys.is_empty() {
            return Ok(());
        }

        for k in keys.iter() {
            self.status("EXPORTED", k.fpr())?;
        }
        let kind = if secret { Kind::SecretKey } else { Kind::PublicKey };
        let block = KeyBlock { keys }.to_vec().map_err(encoding_error)?;
        self.write_output(keydata, kind, &block, self.armor)
    }

    /// Returns a summary of the key for edit transcripts.
    fn describe(record: &Record) -> String {
        let mut s = String::new();
        if let Some(k) = record.key.subkeys.first() {
            s.push_str(&format!("{}  {}/{}\n     trust: {:?}{}\n",
                                if record.secret.is_some() { "sec" } else { "pub" },
                                k.length, k.keyid, record.key.owner_trust,
                                if record.key.disabled { ", disabled" } else { "" }));
        }
        for (i, uid) in record.key.uids.iter().enumerate() {
            s.push_str(&format!("({}). {}\n", i + 1, uid.uid));
        }
        s
    }
}

/// Drives an edit session through the edit callback.
struct Editor {
    cb: Callback<EditCb>,
}

impl Editor {
    /// Prompts for a line.
    fn prompt(&self, status: StatusCode, args: &str) -> Result<String> {
        let args = cstring(args)?;
        let pipe = Pipe::new().map_err(pipe::error)?;
        let r = unsafe {
            (self.cb.func)(self.cb.hook, status.bits() as c_int,
                           args.as_ptr(), pipe.fd())
        };
        let answer = pipe.finish().map_err(pipe::error);
        Error::check(r)?;
        let answer = answer?;
        self.notify(StatusCode::GOT_IT, None)?;
        Ok(answer)
    }

    /// Sends an informational status.
    fn notify(&self, status: StatusCode, args: Option<&str>) -> Result<()> {
        let args = args.map(cstring).transpose()?;
        Error::check(unsafe {
            (self.cb.func)(self.cb.hook, status.bits() as c_int,
                           as_ptr(&args), -1)
        })
    }
}

/// Maps an answer to the owner trust menu.
fn owner_trust(answer: &str) -> Option<Validity> {
    Some(match answer {
        "1" => Validity::UNKNOWN,
        "2" => Validity::NEVER,
        "3" => Validity::MARGINAL,
        "4" => Validity::FULL,
        "5" => Validity::ULTIMATE,
        _ => return None,
    })
}

const TRUST_MENU: &str = "\
  1 = I don't know or won't say
  2 = I do NOT trust
  3 = I trust marginally
  4 = I trust fully
  5 = I trust ultimately
";

impl crate::Session for Session {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn set_protocol(&mut self, protocol: Protocol) -> Result<()> {
        if protocol != Protocol::OPENPGP {
            return Err(gpgme(ErrorCode::UNSUPPORTED_PROTOCOL));
        }
        self.protocol = protocol;
        Ok(())
    }

    fn armor(&self) -> bool {
        self.armor
    }

    fn set_armor(&mut self, yes: bool) {
        self.armor = yes;
    }

    fn textmode(&self) -> bool {
        self.textmode
    }

    fn set_textmode(&mut self, yes: bool) {
        self.textmode = yes;
    }

    fn offline(&self) -> bool {
        self.offline
    }

    fn set_offline(&mut self, yes: bool) {
        self.offline = yes;
    }

    fn include_certs(&self) -> i32 {
        self.include_certs
    }

    fn set_include_certs(&mut self, nr_of_certs: i32) {
        self.include_certs = if nr_of_certs < -2 {
            INCLUDE_CERTS_DEFAULT
        } else {
            nr_of_certs
        };
    }

    fn keylist_mode(&self) -> KeylistMode {
        self.keylist_mode
    }

    fn set_keylist_mode(&mut self, mode: KeylistMode) -> Result<()> {
        if ! (mode.contains(KeylistMode::LOCAL)
              || mode.contains(KeylistMode::EXTERN)
              || mode.contains(KeylistMode::SIGS))
        {
            return Err(gpgme(ErrorCode::INV_VALUE));
        }
        self.keylist_mode = mode;
        Ok(())
    }

    fn pinentry_mode(&self) -> PinentryMode {
        self.pinentry_mode
    }

    fn set_pinentry_mode(&mut self, mode: PinentryMode) -> Result<()> {
        if mode > PinentryMode::LOOPBACK {
            return Err(gpgme(ErrorCode::INV_VALUE));
        }
        self.pinentry_mode = mode;
        Ok(())
    }

    fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    fn set_sender(&mut self, sender: Option<&str>) -> Result<()> {
        self.sender = match sender {
            None => None,
            Some(s) => {
                let s = s.trim();
                let address = s.rfind('<')
                    .and_then(|i| s[i + 1..].strip_suffix('>'))
                    .unwrap_or(s);
                if ! address.contains('@') {
                    return Err(gpgme(ErrorCode::INV_VALUE));
                }
                Some(address.into())
            },
        };
        Ok(())
    }

    fn engine_info(&self) -> Vec<EngineInfo> {
        vec![engine_info(self.file_name.as_deref(), self.home_dir.as_deref())]
    }

    fn set_engine_info(&mut self, protocol: Protocol,
                       file_name: Option<&str>, home_dir: Option<&str>)
                       -> Result<()> {
        if protocol != Protocol::OPENPGP {
            return Err(gpgme(ErrorCode::UNSUPPORTED_PROTOCOL));
        }

        self.keyring = self.shared.keyring(home_dir.map(Path::new));
        self.file_name = file_name.map(Into::into);
        self.home_dir = home_dir.map(Into::into);
        Ok(())
    }

    fn set_locale(&mut self, category: i32, value: Option<&str>)
                  -> Result<()> {
        let categories = if category == libc::LC_ALL {
            vec![libc::LC_CTYPE, libc::LC_MESSAGES]
        } else if category == libc::LC_CTYPE || category == libc::LC_MESSAGES {
            vec![category]
        } else {
            return Err(gpgme(ErrorCode::INV_VALUE));
        };

        for c in categories {
            match value {
                Some(v) => self.locale.insert(c, v.into()),
                None => self.locale.remove(&c),
            };
        }
        Ok(())
    }

    fn signers(&self) -> Vec<Key> {
        self.signers.clone()
    }

    fn signers_clear(&mut self) {
        self.signers.clear();
    }

    fn signers_add(&mut self, key: &Key) -> Result<()> {
        if key.fpr().is_none() {
            return Err(gpgme(ErrorCode::INV_VALUE));
        }
        self.signers.push(key.clone());
        Ok(())
    }

    fn sig_notations(&self) -> Vec<SigNotation> {
        self.notations.clone()
    }

    fn sig_notation_clear(&mut self) {
        self.notations.clear();
    }

    fn sig_notation_add(&mut self, name: Option<&str>, value: &[u8],
                        flags: SigNotationFlags) -> Result<()> {
        if name.map(|n| n.is_empty() || ! n.contains('@')).unwrap_or(false) {
            return Err(gpgme(ErrorCode::INV_VALUE));
        }
        if name.is_none() && std::str::from_utf8(value).is_err() {
            return Err(gpgme(ErrorCode::INV_VALUE));
        }

        self.notations.push(SigNotation {
            name: name.map(Into::into),
            value: value.to_vec(),
            flags,
        });
        Ok(())
    }

    fn passphrase_cb(&self) -> Option<Callback<PassphraseCb>> {
        self.passphrase_cb
    }

    fn set_passphrase_cb(&mut self, cb: Option<Callback<PassphraseCb>>) {
        self.passphrase_cb = cb;
    }

    fn progress_cb(&self) -> Option<Callback<ProgressCb>> {
        self.progress_cb
    }

    fn set_progress_cb(&mut self, cb: Option<Callback<ProgressCb>>) {
        self.progress_cb = cb;
    }

    fn status_cb(&self) -> Option<Callback<StatusCb>> {
        self.status_cb
    }

    fn set_status_cb(&mut self, cb: Option<Callback<StatusCb>>) {
        self.status_cb = cb;
    }

    fn get_key(&mut self, fpr: &str, secret: bool) -> Result<Key> {
        let keyring = self.keyring();
        let found: Vec<&Record> = keyring.lookup(fpr).into_iter()
            .filter(|r| ! secret || r.secret.is_some())
            .collect();

        match found.len() {
            0 => Err(gpgme(ErrorCode::EOF)),
            1 => Ok(found[0].view(secret)),
            _ => Err(gpgme(ErrorCode::AMBIGUOUS_NAME)),
        }
    }

    fn op_encrypt(&mut self, recipients: Option<&[&Key]>,
                  flags: EncryptFlags, plain: &mut Data, cipher: &mut Data)
                  -> Result<()> {
        self.encrypt(recipients, flags, plain, cipher, false)
    }

    fn op_encrypt_sign(&mut self, recipients: Option<&[&Key]>,
                       flags: EncryptFlags,
                       plain: &mut Data, cipher: &mut Data) -> Result<()> {
        self.encrypt(recipients, flags, plain, cipher, true)
    }

    fn op_decrypt(&mut self, cipher: &mut Data, plain: &mut Data)
                  -> Result<()> {
        self.decrypt(cipher, plain, false)
    }

    fn op_decrypt_verify(&mut self, cipher: &mut Data, plain: &mut Data)
                         -> Result<()> {
        self.decrypt(cipher, plain, true)
    }

    fn op_sign(&mut self, plain: &mut Data, sig: &mut Data, mode: SigMode)
               -> Result<()> {
        self.reset();
        self.results.sign = Some(SignResult::default());

        let kind = match mode {
            SigMode::NORMAL => Kind::Message,
            SigMode::DETACH => Kind::Signature,
            SigMode::CLEAR => Kind::SignedMessage,
            _ => return Err(gpgme(ErrorCode::INV_VALUE)),
        };

        let body = self.read_input(plain)?;
        self.status("BEGIN_SIGNING", "H8")?;
        let signatures = self.sign_body(&body, mode)?;
        let envelope = Envelope {
            signatures,
            body: if mode == SigMode::DETACH { Vec::new() } else { body },
            ..Default::default()
        };

        let armor = self.armor || mode == SigMode::CLEAR;
        let envelope = envelope.to_vec().map_err(encoding_error)?;
        self.write_output(sig, kind, &envelope, armor)
    }

    fn op_verify(&mut self, sig: &mut Data, signed_text: Option<&mut Data>,
                 plain: Option<&mut Data>) -> Result<()> {
        self.reset();
        self.results.verify = Some(VerifyResult::default());

        let data = self.read_input(sig)?;
        let envelope = self.parse_message(&data)?;
        if envelope.encrypted || envelope.signatures.is_empty() {
            return Err(gpgme(ErrorCode::NO_DATA));
        }

        let detached = envelope.signatures.iter()
            .all(|s| s.mode == SigMode::DETACH);
        let body = if detached {
            match signed_text {
                Some(text) => self.read_input(text)?,
                None => return Err(gpgme(ErrorCode::NO_DATA)),
            }
        } else {
            if let Some(plain) = plain {
                plain.write_all(&envelope.body).map_err(io_error)?;
            }
            envelope.body.clone()
        };

        let signatures = self.check_signatures(&envelope.signatures, &body)?;
        self.results.verify = Some(VerifyResult {
            signatures,
            file_name: envelope.file_name,
        });
        Ok(())
    }

    fn op_import(&mut self, keydata: &mut Data) -> Result<()> {
        self.reset();
        self.results.import = Some(ImportResult::default());

        let data = self.read_input(keydata)?;
        let block = match message::decode(&data) {
            Some((kind, payload)) if kind.is_key() =>
                KeyBlock::from_slice(&payload),
            _ => None,
        }.ok_or_else(|| gpgme(ErrorCode::NO_DATA))?;

        for record in block.keys {
            self.import_record(record)?;
        }

        let r = self.results.import.clone().unwrap_or_default();
        self.status("IMPORT_RES",
                    &format!("{} {} {} {}",
                             r.considered, r.no_user_id, r.imported,
                             r.unchanged))
    }

    fn op_import_keys(&mut self, keys: &[&Key]) -> Result<()> {
        self.reset();
        self.results.import = Some(ImportResult::default());

        for key in keys {
            let fpr = match key.fpr() {
                Some(f) => f.to_string(),
                None => {
                    if let Some(r) = self.results.import.as_mut() {
                        r.not_imported += 1;
                    }
                    continue;
                },
            };

            let remote = lock(&self.shared.keyserver).get(&fpr).cloned();
            if let Some(record) = remote {
                self.import_record(record)?;
                continue;
            }

            let local = self.keyring().get(&fpr).is_some();
            if let Some(r) = self.results.import.as_mut() {
                r.considered += 1;
                if local {
                    r.unchanged += 1;
                    r.imports.push(ImportStatus {
                        fpr,
                        result: Error::NONE,
                        status: ImportFlags::default(),
                    });
                } else {
                    r.not_imported += 1;
                    r.imports.push(ImportStatus {
                        fpr,
                        result: gpg(ErrorCode::NO_PUBKEY),
                        status: ImportFlags::default(),
                    });
                }
            }
        }

        Ok(())
    }

    fn op_export(&mut self, patterns: Option<&[CString]>, mode: ExportMode,
                 keydata: Option<&mut Data>) -> Result<()> {
        self.reset();
        let patterns = self::patterns(patterns);
        let records = {
            let keyring = self.keyring();
            keyring.search(&patterns, false).iter()
                .filter_map(|fpr| keyring.get(fpr).cloned())
                .collect()
        };
        self.export_records(records, mode, keydata)
    }

    fn op_export_keys(&mut self, keys: &[&Key], mode: ExportMode,
                      keydata: Option<&mut Data>) -> Result<()> {
        self.reset();
        let records = {
            let keyring = self.keyring();
            keys.iter()
                .filter_map(|k| k.fpr())
                .filter_map(|fpr| keyring.get(fpr).cloned())
                .collect()
        };
        self.export_records(records, mode, keydata)
    }

    fn op_genkey(&mut self, params: &str, pubkey: Option<&mut Data>,
                 seckey: Option<&mut Data>) -> Result<()> {
        tracer!("memory::Session::op_genkey");
        self.reset();
        self.results.genkey = Some(GenkeyResult::default());

        // OpenPGP keys go to the keyring.
        if pubkey.is_some() || seckey.is_some() {
            return Err(gpgme(ErrorCode::INV_VALUE));
        }

        let params = Params::parse(params)?;
        t!("{:?}", params.key_type);

        const STEPS: usize = 4;
        for i in 0..STEPS {
            self.progress("primegen", '+', i, STEPS);
        }
        self.progress("primegen", '\n', STEPS, STEPS);

        let created = now();
        let expires = if params.expire > 0 { created + params.expire } else { 0 };
        let primary_fpr = fingerprint();
        let mut subkeys = vec![Subkey {
            can_encrypt: params.primary_can("encrypt"),
            can_sign: params.primary_can("sign"),
            can_certify: params.primary_can("cert")
                || params.key_usage.is_none(),
            can_authenticate: params.primary_can("auth"),
            pubkey_algo: params.key_type,
            length: params.key_length,
            keyid: keyid(&primary_fpr).into(),
            fpr: primary_fpr.clone(),
            timestamp: created,
            expires,
            ..Default::default()
        }];
        if let Some(algo) = params.subkey_type {
            let fpr = fingerprint();
            subkeys.push(Subkey {
                can_encrypt: true,
                pubkey_algo: algo,
                length: params.subkey_length,
                keyid: keyid(&fpr).into(),
                fpr,
                timestamp: created,
                expires,
                ..Default::default()
            });
        }

        let uids = if params.has_uid() {
            vec![UserId {
                validity: Validity::ULTIMATE,
                ..UserId::new(&params.name_real, &params.name_comment,
                              &params.name_email)
            }]
        } else {
            Vec::new()
        };

        let key = Key {
            can_encrypt: subkeys.iter().any(|k| k.can_encrypt),
            can_sign: subkeys.iter().any(|k| k.can_sign),
            can_certify: subkeys.iter().any(|k| k.can_certify),
            can_authenticate: subkeys.iter().any(|k| k.can_authenticate),
            protocol: Protocol::OPENPGP,
            owner_trust: Validity::ULTIMATE,
            subkeys,
            uids,
            ..Default::default()
        };

        self.keyring().insert(Record {
            key,
            secret: Some(Secret { passphrase: params.passphrase.clone() }),
        });

        let sub = params.subkey_type.is_some();
        self.results.genkey = Some(GenkeyResult {
            primary: true,
            sub,
            fpr: Some(primary_fpr.clone()),
        });
        self.status("KEY_CREATED",
                    &format!("{} {}", if sub { "B" } else { "P" }, primary_fpr))
    }

    fn op_delete(&mut self, key: &Key, flags: DeleteFlags) -> Result<()> {
        self.reset();
        let fpr = key.fpr().ok_or_else(|| gpgme(ErrorCode::INV_VALUE))?;

        let mut keyring = self.keyring();
        let has_secret = match keyring.get(fpr) {
            Some(r) => r.secret.is_some(),
            None => return Err(gpg(ErrorCode::NO_PUBKEY)),
        };
        if has_secret && ! flags.contains(DeleteFlags::ALLOW_SECRET) {
            return Err(gpg(ErrorCode::CONFLICT));
        }
        keyring.remove(fpr);
        Ok(())
    }

    fn op_edit(&mut self, key: &Key, cb: Callback<EditCb>, out: &mut Data)
               -> Result<()> {
        tracer!("memory::Session::op_edit");
        self.reset();

        let fpr = key.fpr().ok_or_else(|| gpgme(ErrorCode::INV_VALUE))?
            .to_string();
        let mut record = self.keyring().get(&fpr).cloned()
            .ok_or_else(|| gpg(ErrorCode::NO_PUBKEY))?;
        let editor = Editor { cb };
        self.write_text(out, &Session::describe(&record))?;

        let mut changed = false;
        let mut save = None;
        for _ in 0..EDIT_PROMPTS {
            let command = editor.prompt(StatusCode::GET_LINE, "keyedit.prompt")?;
            t!("command {:?}", command);
            match command.trim() {
                "" => (),
                "trust" => {
                    self.write_text(out, TRUST_MENU)?;
                    let answer = editor.prompt(StatusCode::GET_LINE,
                                               "edit_ownertrust.value")?;
                    match owner_trust(answer.trim()) {
                        Some(trust) => {
                            record.key.owner_trust = trust;
                            for uid in record.key.uids.iter_mut() {
                                uid.validity = if trust >= Validity::MARGINAL {
                                    trust
                                } else {
                                    Validity::UNKNOWN
                                };
                            }
                            changed = true;
                        },
                        None => self.write_text(out, "Invalid selection.\n")?,
                    }
                },
                "disable" => {
                    record.key.disabled = true;
                    changed = true;
                },
                "enable" => {
                    record.key.disabled = false;
                    changed = true;
                },
                "save" => {
                    save = Some(true);
                    break;
                },
                "quit" => {
                    let yes = changed && {
                        let a = editor.prompt(StatusCode::GET_BOOL,
                                              "keyedit.save.okay")?;
                        let a = a.trim().to_lowercase();
                        a == "y" || a == "yes"
                    };
                    save = Some(yes);
                    break;
                },
                _ => self.write_text(out, "Invalid command  (try \"help\")\n")?,
            }
        }

        let save = save.ok_or_else(|| gpgme(ErrorCode::GENERAL))?;
        if save && changed {
            if let Some(r) = self.keyring().get_mut(&fpr) {
                r.key = record.key.clone();
            }
            self.write_text(out, &Session::describe(&record))?;
        }
        editor.notify(StatusCode::EOF, None)
    }

    fn op_card_edit(&mut self, key: &Key, _cb: Callback<EditCb>,
                    _out: &mut Data) -> Result<()> {
        self.reset();
        key.fpr().ok_or_else(|| gpgme(ErrorCode::INV_VALUE))?;
        Err(Error::new(ErrorSource::SCD, ErrorCode::CARD_NOT_PRESENT))
    }

    fn op_keylist_start(&mut self, patterns: Option<&[CString]>,
                        secret_only: bool) -> Result<()> {
        self.reset();
        let patterns = self::patterns(patterns);
        let mode = self.keylist_mode;

        let mut pending = VecDeque::new();
        if mode.contains(KeylistMode::LOCAL) || ! mode.contains(KeylistMode::EXTERN) {
            for fpr in self.keyring().search(&patterns, secret_only) {
                pending.push_back((Origin::Local, fpr));
            }
        }
        if mode.contains(KeylistMode::EXTERN) && ! secret_only {
            for fpr in lock(&self.shared.keyserver).search(&patterns, false) {
                pending.push_back((Origin::Keyserver, fpr));
            }
        }

        self.keylist = Some(pending);
        self.keylist_secret = secret_only || mode.contains(KeylistMode::WITH_SECRET);
        Ok(())
    }

    fn op_keylist_next(&mut self) -> Result<Key> {
        loop {
            let (origin, fpr) = self.keylist.as_mut()
                .and_then(|l| l.pop_front())
                .ok_or_else(|| gpgme(ErrorCode::EOF))?;

            let key = match origin {
                Origin::Local => self.keyring().get(&fpr)
                    .map(|r| r.view(self.keylist_secret)),
                Origin::Keyserver => lock(&self.shared.keyserver).get(&fpr)
                    .map(|r| r.view(false)),
            };

            // Keys deleted since the listing started are skipped.
            if let Some(key) = key {
                return Ok(key);
            }
        }
    }

    fn op_keylist_end(&mut self) -> Result<()> {
        self.keylist = None;
        self.shared.keylist_ended();
        Ok(())
    }

    fn op_encrypt_result(&self) -> Option<&EncryptResult> {
        self.results.encrypt.as_ref()
    }

    fn op_decrypt_result(&self) -> Option<&DecryptResult> {
        self.results.decrypt.as_ref()
    }

    fn op_sign_result(&self) -> Option<&SignResult> {
        self.results.sign.as_ref()
    }

    fn op_verify_result(&self) -> Option<&VerifyResult> {
        self.results.verify.as_ref()
    }

    fn op_import_result(&self) -> Option<&ImportResult> {
        self.results.import.as_ref()
    }

    fn op_genkey_result(&self) -> Option<&GenkeyResult> {
        self.results.genkey.as_ref()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        log::debug!("releasing session (home: {:?})", self.home_dir);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::DataCbs;
    use crate::Session as _;
    use std::cell::RefCell;
    use std::io::{Cursor, Read};
    use libc::{c_void, size_t, ssize_t};

    const PARAMS: &str = "<GnupgKeyParms format=\"internal\">
Key-Type: RSA
Key-Length: 1024
Name-Real: Alice
Name-Email: alice@example.org
</GnupgKeyParms>";

    const PROTECTED: &str = "<GnupgKeyParms format=\"internal\">
Key-Type: RSA
Name-Real: Bob
Name-Email: bob@example.org
Passphrase: abc
</GnupgKeyParms>";

    unsafe extern "C" fn cursor_read(h: *mut c_void, b: *mut c_void,
                                     size: size_t) -> ssize_t {
        let c = &mut *(h as *mut Cursor<Vec<u8>>);
        let out = std::slice::from_raw_parts_mut(b as *mut u8, size);
        c.read(out).map(|n| n as ssize_t).unwrap_or(-1)
    }

    unsafe extern "C" fn cursor_write(h: *mut c_void, b: *const c_void,
                                      size: size_t) -> ssize_t {
        let c = &mut *(h as *mut Cursor<Vec<u8>>);
        let src = std::slice::from_raw_parts(b as *const u8, size);
        std::io::Write::write(c, src).map(|n| n as ssize_t).unwrap_or(-1)
    }

    static CURSOR: DataCbs = DataCbs {
        read: Some(cursor_read),
        write: Some(cursor_write),
        seek: None,
        release: None,
    };

    /// Wraps a cursor the test keeps owning.
    fn data(c: &mut Cursor<Vec<u8>>) -> Data {
        unsafe {
            Data::from_cbs(&CURSOR, c as *mut _ as *mut c_void).unwrap()
        }
    }

    fn answer(fd: c_int, s: &str) {
        let line = format!("{}\n", s);
        unsafe {
            libc::write(fd, line.as_ptr() as *const c_void, line.len());
        }
    }

    unsafe extern "C" fn good_passphrase(_: *mut c_void, _: *const c_char,
                                         _: *const c_char, _: c_int,
                                         fd: c_int) -> crate::abi::RawError {
        answer(fd, "abc");
        0
    }

    unsafe extern "C" fn cancel_passphrase(_: *mut c_void, _: *const c_char,
                                           _: *const c_char, _: c_int,
                                           _: c_int) -> crate::abi::RawError {
        gpgme(ErrorCode::CANCELED).raw()
    }

    fn session() -> Session {
        let _ = env_logger::builder().is_test(true).try_init();
        Session::new(Arc::new(Shared::default()))
    }

    fn genkey(s: &mut Session, params: &str) -> Key {
        s.op_genkey(params, None, None).unwrap();
        let fpr = s.op_genkey_result().unwrap().fpr.clone().unwrap();
        s.get_key(&fpr, false).unwrap()
    }

    fn keylist(s: &mut Session, pattern: &str, secret: bool) -> Vec<Key> {
        let patterns = vec![CString::new(pattern).unwrap()];
        s.op_keylist_start(Some(&patterns), secret).unwrap();
        let mut keys = Vec::new();
        loop {
            match s.op_keylist_next() {
                Ok(k) => keys.push(k),
                Err(e) => {
                    assert!(e.is_eof());
                    break;
                },
            }
        }
        s.op_keylist_end().unwrap();
        keys
    }

    #[test]
    fn genkey_and_list() {
        let mut s = session();
        let key = genkey(&mut s, PARAMS);
        assert_eq!(key.uids[0].uid, "Alice <alice@example.org>");
        assert!(key.can_sign && key.can_encrypt);
        assert_eq!(key.subkeys[0].length, 1024);

        assert_eq!(keylist(&mut s, "alice", false).len(), 1);
        assert_eq!(keylist(&mut s, "alice", true)[0].secret, true);
        assert!(keylist(&mut s, "nobody", false).is_empty());
        assert!(s.get_key("DEADBEEF", false).unwrap_err().is_eof());

        let e = s.op_genkey(PARAMS, Some(&mut data(&mut Cursor::default())),
                            None).unwrap_err();
        assert_eq!(e.code(), ErrorCode::INV_VALUE);
    }

    #[test]
    fn encrypt_decrypt() {
        let mut s = session();
        let alice = genkey(&mut s, PARAMS);

        let mut plain = Cursor::new(b"Hello world".to_vec());
        let mut cipher = Cursor::default();
        s.op_encrypt(Some(&[&alice][..]), EncryptFlags::default(),
                     &mut data(&mut plain), &mut data(&mut cipher)).unwrap();
        assert!(s.op_encrypt_result().unwrap().invalid_recipients.is_empty());

        let mut cipher = Cursor::new(cipher.into_inner());
        let mut plain = Cursor::default();
        s.op_decrypt(&mut data(&mut cipher), &mut data(&mut plain)).unwrap();
        assert_eq!(plain.into_inner(), b"Hello world");
        let r = s.op_decrypt_result().unwrap();
        assert_eq!(r.recipients.len(), 1);
        assert_eq!(r.recipients[0].keyid, alice.subkeys[0].keyid);
        assert!(r.unsupported_algorithm.is_none());
    }

    #[test]
    fn invalid_recipient() {
        let mut s = session();
        let mut stranger = genkey(&mut s, PARAMS);
        stranger.subkeys[0].fpr = "0".repeat(40);

        let e = s.op_encrypt(Some(&[&stranger][..]), EncryptFlags::default(),
                             &mut data(&mut Cursor::new(b"x".to_vec())),
                             &mut data(&mut Cursor::default())).unwrap_err();
        assert_eq!(e.code(), ErrorCode::UNUSABLE_PUBKEY);
        let r = s.op_encrypt_result().unwrap();
        assert_eq!(r.invalid_recipients.len(), 1);
        assert_eq!(r.invalid_recipients[0].reason.code(),
                   ErrorCode::NO_PUBKEY);
    }

    #[test]
    fn sign_verify() {
        let mut s = session();
        let alice = genkey(&mut s, PARAMS);
        s.signers_add(&alice).unwrap();

        let mut plain = Cursor::new(b"Hello world".to_vec());
        let mut sig = Cursor::default();
        s.op_sign(&mut data(&mut plain), &mut data(&mut sig), SigMode::DETACH)
            .unwrap();
        let r = s.op_sign_result().unwrap();
        assert_eq!(r.signatures.len(), 1);
        assert_eq!(r.signatures[0].fpr, alice.fpr().unwrap());
        let sig = sig.into_inner();

        let mut text = Cursor::new(b"Hello world".to_vec());
        s.op_verify(&mut data(&mut Cursor::new(sig.clone())),
                    Some(&mut data(&mut text)), None).unwrap();
        let v = &s.op_verify_result().unwrap().signatures[0];
        assert_eq!(v.summary, Sigsum::VALID | Sigsum::GREEN);
        assert!(v.status.is_ok());

        let mut text = Cursor::new(b"Hello World".to_vec());
        s.op_verify(&mut data(&mut Cursor::new(sig.clone())),
                    Some(&mut data(&mut text)), None).unwrap();
        let v = &s.op_verify_result().unwrap().signatures[0];
        assert_eq!(v.summary, Sigsum::RED);
        assert_eq!(v.status.code(), ErrorCode::BAD_SIGNATURE);

        // Detached signatures need the signed text.
        let e = s.op_verify(&mut data(&mut Cursor::new(sig)), None, None)
            .unwrap_err();
        assert_eq!(e.code(), ErrorCode::NO_DATA);
    }

    #[test]
    fn passphrases() {
        let mut s = session();
        genkey(&mut s, PROTECTED);

        let sign = |s: &mut Session| {
            s.op_sign(&mut data(&mut Cursor::new(b"x".to_vec())),
                      &mut data(&mut Cursor::default()), SigMode::NORMAL)
        };

        let e = sign(&mut s).unwrap_err();
        assert_eq!(e.source(), ErrorSource::PINENTRY);
        assert_eq!(e.code(), ErrorCode::NO_PIN_ENTRY);

        s.set_passphrase_cb(Some(Callback::new(cancel_passphrase,
                                               ptr::null_mut())));
        assert_eq!(sign(&mut s).unwrap_err().code(), ErrorCode::CANCELED);

        s.set_passphrase_cb(Some(Callback::new(good_passphrase,
                                               ptr::null_mut())));
        sign(&mut s).unwrap();

        s.set_pinentry_mode(PinentryMode::CANCEL).unwrap();
        assert_eq!(sign(&mut s).unwrap_err().code(), ErrorCode::CANCELED);
    }

    #[test]
    fn symmetric() {
        let mut s = session();
        s.set_passphrase_cb(Some(Callback::new(good_passphrase,
                                               ptr::null_mut())));
        let mut cipher = Cursor::default();
        s.op_encrypt(None, EncryptFlags::default(),
                     &mut data(&mut Cursor::new(b"secret".to_vec())),
                     &mut data(&mut cipher)).unwrap();

        let mut plain = Cursor::default();
        s.op_decrypt(&mut data(&mut Cursor::new(cipher.into_inner())),
                     &mut data(&mut plain)).unwrap();
        assert_eq!(plain.into_inner(), b"secret");

        let e = s.op_encrypt(Some(&[][..]), EncryptFlags::default(),
                             &mut data(&mut Cursor::new(b"x".to_vec())),
                             &mut data(&mut Cursor::default())).unwrap_err();
        assert_eq!(e.code(), ErrorCode::INV_VALUE);
    }

    #[test]
    fn export_import() {
        let shared = Arc::new(Shared::default());
        let mut a = Session::new(shared.clone());
        let alice = genkey(&mut a, PARAMS);

        let mut keydata = Cursor::default();
        let patterns = vec![CString::new("nonexistent@example.com").unwrap()];
        a.op_export(Some(&patterns), ExportMode::default(),
                    Some(&mut data(&mut keydata))).unwrap();
        assert!(keydata.get_ref().is_empty());

        a.op_export(None, ExportMode::default(),
                    Some(&mut data(&mut keydata))).unwrap();
        assert!(! keydata.get_ref().is_empty());

        let mut b = Session::new(shared);
        b.set_engine_info(Protocol::OPENPGP, None, Some("/elsewhere")).unwrap();
        assert!(b.get_key(alice.fpr().unwrap(), false).is_err());

        let keydata = keydata.into_inner();
        b.op_import(&mut data(&mut Cursor::new(keydata.clone()))).unwrap();
        let r = b.op_import_result().unwrap().clone();
        assert_eq!(r.considered, 1);
        assert_eq!(r.imported, 1);
        assert_eq!(r.imported_rsa, 1);
        assert_eq!(r.imports[0].status, ImportFlags::NEW);
        let imported = b.get_key(alice.fpr().unwrap(), false).unwrap();
        assert_eq!(imported.owner_trust, Validity::UNKNOWN);

        b.op_import(&mut data(&mut Cursor::new(keydata))).unwrap();
        assert_eq!(b.op_import_result().unwrap().unchanged, 1);

        let e = b.op_import(&mut data(&mut Cursor::new(b"junk".to_vec())))
            .unwrap_err();
        assert_eq!(e.code(), ErrorCode::NO_DATA);
    }

    #[test]
    fn delete() {
        let mut s = session();
        let alice = genkey(&mut s, PARAMS);
        let e = s.op_delete(&alice, DeleteFlags::default()).unwrap_err();
        assert_eq!(e.code(), ErrorCode::CONFLICT);
        s.op_delete(&alice, DeleteFlags::ALLOW_SECRET).unwrap();
        let e = s.op_delete(&alice, DeleteFlags::ALLOW_SECRET).unwrap_err();
        assert_eq!(e.code(), ErrorCode::NO_PUBKEY);
    }

    struct Script {
        answers: RefCell<Vec<&'static str>>,
        seen: RefCell<Vec<(c_int, Option<String>)>>,
    }

    unsafe extern "C" fn scripted(hook: *mut c_void, status: c_int,
                                  args: *const c_char, fd: c_int)
                                  -> crate::abi::RawError {
        let script = &*(hook as *const Script);
        let args = if args.is_null() {
            None
        } else {
            Some(std::ffi::CStr::from_ptr(args).to_string_lossy().into_owned())
        };
        script.seen.borrow_mut().push((status, args));
        if fd >= 0 {
            let a = script.answers.borrow_mut().remove(0);
            answer(fd, a);
        }
        0
    }

    #[test]
    fn edit_trust() {
        let mut s = session();
        let mut params = PARAMS.to_string();
        params = params.replace("Name-Real: Alice", "Name-Real: Carol");
        let carol = genkey(&mut s, &params);

        let script = Script {
            answers: RefCell::new(vec!["trust", "3", "quit", "y"]),
            seen: RefCell::new(Vec::new()),
        };
        let mut out = Cursor::default();
        s.op_edit(&carol,
                  Callback::new(scripted,
                                &script as *const Script as *mut c_void),
                  &mut data(&mut out)).unwrap();

        let key = s.get_key(carol.fpr().unwrap(), false).unwrap();
        assert_eq!(key.owner_trust, Validity::MARGINAL);
        let seen = script.seen.into_inner();
        assert_eq!(seen[0], (StatusCode::GET_LINE.bits() as c_int,
                             Some("keyedit.prompt".into())));
        assert_eq!(seen[1], (StatusCode::GOT_IT.bits() as c_int, None));
        assert_eq!(seen.last().unwrap().0, StatusCode::EOF.bits() as c_int);
        assert!(String::from_utf8(out.into_inner()).unwrap()
                .contains("I trust marginally"));
    }

    #[test]
    fn properties() {
        let mut s = session();
        assert_eq!(s.set_protocol(Protocol::CMS).unwrap_err().code(),
                   ErrorCode::UNSUPPORTED_PROTOCOL);
        assert!(s.set_keylist_mode(KeylistMode::default()).is_err());
        s.set_keylist_mode(KeylistMode::LOCAL | KeylistMode::SIGS).unwrap();
        assert!(s.set_pinentry_mode(PinentryMode::from(9)).is_err());
        assert!(s.set_sender(Some("nobody")).is_err());
        s.set_sender(Some("Alice <alice@example.org>")).unwrap();
        assert_eq!(s.sender(), Some("alice@example.org"));
        s.set_include_certs(-100);
        assert_eq!(s.include_certs(), INCLUDE_CERTS_DEFAULT);
        assert!(s.set_locale(1234, Some("C")).is_err());
        s.set_locale(libc::LC_ALL, Some("C")).unwrap();
        assert!(s.sig_notation_add(Some(""), b"x",
                                   SigNotationFlags::default()).is_err());
        s.sig_notation_add(Some("test@example.org"), b"x",
                           SigNotationFlags::HUMAN_READABLE).unwrap();
        assert_eq!(s.sig_notations().len(), 1);
        s.sig_notation_clear();
        assert!(s.sig_notations().is_empty());
    }

    #[test]
    fn card_edit() {
        let mut s = session();
        let alice = genkey(&mut s, PARAMS);
        let script = Script {
            answers: RefCell::new(Vec::new()),
            seen: RefCell::new(Vec::new()),
        };
        let e = s.op_card_edit(&alice,
                               Callback::new(scripted,
                                             &script as *const Script
                                             as *mut c_void),
                               &mut data(&mut Cursor::default()))
            .unwrap_err();
        assert_eq!(e.source(), ErrorSource::SCD);
        assert_eq!(e.code(), ErrorCode::CARD_NOT_PRESENT);
    }
}
