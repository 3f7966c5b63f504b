//! Keyrings of the in-process engine.

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Secret key material.
///
/// There is no actual key material, only the passphrase protecting
/// it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Secret {
    pub passphrase: Option<String>,
}

/// A key and, optionally, its secret part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Record {
    pub key: Key,
    pub secret: Option<Secret>,
}

impl Record {
    pub fn fpr(&self) -> &str {
        self.key.fpr().unwrap_or("")
    }

    /// Returns the key as presented by a key listing.
    pub fn view(&self, with_secret: bool) -> Key {
        let mut key = self.key.clone();
        let secret = with_secret && self.secret.is_some();
        key.secret = secret;
        for sk in key.subkeys.iter_mut() {
            sk.secret = secret;
        }
        key
    }

    /// Returns the public part of this record.
    pub fn public(&self) -> Record {
        Record { key: self.key.clone(), secret: None }
    }

    /// Returns whether the key can be used at all.
    pub fn usable(&self) -> bool {
        ! (self.key.revoked || self.key.expired || self.key.disabled
           || self.key.invalid)
    }

    /// Returns the highest validity of the user ids.
    pub fn validity(&self) -> Validity {
        self.key.uids.iter()
            .filter(|u| ! u.revoked && ! u.invalid)
            .map(|u| u.validity)
            .max()
            .unwrap_or(Validity::UNKNOWN)
    }

    /// Returns a hint identifying the key to the user.
    pub fn uid_hint(&self) -> String {
        format!("{} {}",
                self.key.keyid().unwrap_or(""),
                self.key.primary_uid().map(|u| u.uid.as_str()).unwrap_or(""))
    }

    /// Returns whether the key matches a search pattern.
    ///
    /// Patterns are interpreted like GnuPG does: a hexadecimal key id
    /// or fingerprint (optionally prefixed with `0x`), an exact email
    /// address in angle brackets, an exact user id prefixed with `=`,
    /// or else a case-insensitive substring of a user id.
    pub fn matches(&self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return true;
        }

        let hex = pattern.strip_prefix("0x").unwrap_or(pattern);
        if hex.chars().all(|c| c.is_ascii_hexdigit())
            && [8, 16, 40].contains(&hex.len())
        {
            let hex = hex.to_uppercase();
            return self.key.subkeys.iter().any(|sk| sk.fpr.ends_with(&hex));
        }

        if let Some(email) = pattern.strip_prefix('<')
            .and_then(|p| p.strip_suffix('>'))
        {
            return self.key.uids.iter()
                .any(|u| u.email.eq_ignore_ascii_case(email));
        }

        if let Some(uid) = pattern.strip_prefix('=') {
            return self.key.uids.iter().any(|u| u.uid == uid);
        }

        let needle = pattern.to_lowercase();
        self.key.uids.iter()
            .any(|u| u.uid.to_lowercase().contains(&needle))
    }
}

/// What inserting a record into a keyring did.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Merge {
    pub new: bool,
    pub new_uids: i32,
    pub new_subkeys: i32,
    pub new_secret: bool,
    pub revoked: bool,
}

impl Merge {
    pub fn changed(&self) -> bool {
        self.new || self.new_uids > 0 || self.new_subkeys > 0
            || self.new_secret || self.revoked
    }
}

/// A set of keys.
#[derive(Debug, Default)]
pub(crate) struct Keyring {
    records: Vec<Record>,
}

impl Keyring {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Looks up keys by fingerprint or key id of any subkey.
    pub fn lookup(&self, id: &str) -> Vec<&Record> {
        let id = id.trim();
        let id = id.strip_prefix("0x").unwrap_or(id).to_uppercase();
        if id.is_empty() {
            return Vec::new();
        }

        self.records.iter()
            .filter(|r| r.key.subkeys.iter().any(|sk| {
                sk.fpr == id || sk.keyid == id
                    || (id.len() >= 8 && sk.fpr.ends_with(&id))
            }))
            .collect()
    }

    /// Returns the record with the given primary fingerprint.
    pub fn get(&self, fpr: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.fpr() == fpr)
    }

    pub fn get_mut(&mut self, fpr: &str) -> Option<&mut Record> {
        self.records.iter_mut().find(|r| r.fpr() == fpr)
    }

    /// Returns the fingerprints of keys matching any of `patterns`.
    pub fn search(&self, patterns: &[String], secret_only: bool)
                  -> Vec<String> {
        self.records.iter()
            .filter(|r| ! secret_only || r.secret.is_some())
            .filter(|r| patterns.is_empty()
                    || patterns.iter().any(|p| r.matches(p)))
            .map(|r| r.fpr().to_string())
            .collect()
    }

    /// Returns the first usable secret key that can sign.
    pub fn default_signer(&self) -> Option<&Record> {
        self.records.iter()
            .find(|r| r.secret.is_some() && r.usable() && r.key.can_sign)
    }

    /// Inserts or merges a record.
    pub fn insert(&mut self, record: Record) -> Merge {
        let fpr = record.fpr().to_string();
        let existing = match self.get_mut(&fpr) {
            Some(e) => e,
            None => {
                self.records.push(record);
                return Merge { new: true, ..Default::default() };
            },
        };

        let mut merge = Merge::default();
        for uid in record.key.uids {
            if ! existing.key.uids.iter().any(|u| u.uid == uid.uid) {
                existing.key.uids.push(uid);
                merge.new_uids += 1;
            }
        }
        for sk in record.key.subkeys {
            if ! existing.key.subkeys.iter().any(|s| s.fpr == sk.fpr) {
                existing.key.can_encrypt |= sk.can_encrypt;
                existing.key.can_sign |= sk.can_sign;
                existing.key.subkeys.push(sk);
                merge.new_subkeys += 1;
            }
        }
        if record.key.revoked && ! existing.key.revoked {
            existing.key.revoked = true;
            merge.revoked = true;
        }
        if record.secret.is_some() && existing.secret.is_none() {
            existing.secret = record.secret;
            merge.new_secret = true;
        }
        merge
    }

    /// Removes a key.
    pub fn remove(&mut self, fpr: &str) -> Option<Record> {
        let i = self.records.iter().position(|r| r.fpr() == fpr)?;
        Some(self.records.remove(i))
    }
}
