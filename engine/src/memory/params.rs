//! Key generation parameters.
//!
//! Parameters are given in GnuPG's unattended key generation format,
//! wrapped in a `GnupgKeyParms` element:
//!
//! ```text
//! <GnupgKeyParms format="internal">
//! Key-Type: RSA
//! Key-Length: 2048
//! Name-Real: Alice
//! Name-Email: alice@example.org
//! Expire-Date: 0
//! </GnupgKeyParms>
//! ```

use crate::types::PubkeyAlgo;
use crate::{Error, ErrorCode, Result};

const OPEN: &str = "<GnupgKeyParms format=\"internal\">";
const CLOSE: &str = "</GnupgKeyParms>";

/// Parsed parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Params {
    pub key_type: PubkeyAlgo,
    pub key_length: u32,
    pub key_usage: Option<Vec<String>>,
    pub subkey_type: Option<PubkeyAlgo>,
    pub subkey_length: u32,
    pub name_real: String,
    pub name_email: String,
    pub name_comment: String,
    pub passphrase: Option<String>,
    /// Seconds from creation, zero for no expiration.
    pub expire: i64,
}

fn invalid() -> Error {
    Error::gpgme(ErrorCode::INV_VALUE)
}

fn algorithm(v: &str) -> Result<(PubkeyAlgo, u32)> {
    Ok(match v.to_lowercase().as_str() {
        "rsa" | "1" | "default" => (PubkeyAlgo::RSA, 2048),
        "elg-e" | "elg" | "16" => (PubkeyAlgo::ELG_E, 2048),
        "dsa" | "17" => (PubkeyAlgo::DSA, 2048),
        "ecdsa" | "19" => (PubkeyAlgo::ECDSA, 256),
        "ecdh" | "18" => (PubkeyAlgo::ECDH, 256),
        "eddsa" | "22" => (PubkeyAlgo::EDDSA, 255),
        _ => return Err(Error::gpgme(ErrorCode::UNSUPPORTED_ALGORITHM)),
    })
}

/// Parses an expiration, in seconds.
fn expiration(v: &str) -> Result<i64> {
    const DAY: i64 = 24 * 60 * 60;

    let v = v.trim().to_lowercase();
    if v == "0" || v == "none" || v == "never" {
        return Ok(0);
    }
    if let Some(s) = v.strip_prefix("seconds=") {
        return s.parse().map_err(|_| invalid());
    }

    let (digits, unit) = match v.char_indices().find(|(_, c)| ! c.is_ascii_digit()) {
        Some((i, _)) => (&v[..i], &v[i..]),
        None => (&v[..], "d"),
    };
    let n: i64 = digits.parse().map_err(|_| invalid())?;
    let unit = match unit {
        "d" => DAY,
        "w" => 7 * DAY,
        "m" => 30 * DAY,
        "y" => 365 * DAY,
        _ => return Err(invalid()),
    };
    Ok(n * unit)
}

impl Params {
    pub fn parse(params: &str) -> Result<Self> {
        let body = params.trim()
            .strip_prefix(OPEN)
            .and_then(|b| b.strip_suffix(CLOSE))
            .ok_or_else(invalid)?;

        let mut p = Params::default();
        let mut have_type = false;
        for line in body.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
                continue;
            }

            let (key, value) = match line.find(':') {
                Some(i) => (line[..i].trim(), line[i + 1..].trim()),
                None => return Err(invalid()),
            };

            match key.to_lowercase().as_str() {
                "key-type" => {
                    let (algo, length) = algorithm(value)?;
                    p.key_type = algo;
                    if p.key_length == 0 {
                        p.key_length = length;
                    }
                    have_type = true;
                },
                "key-length" =>
                    p.key_length = value.parse().map_err(|_| invalid())?,
                "key-usage" =>
                    p.key_usage = Some(value.split(|c| c == ',' || c == ' ')
                                       .filter(|u| ! u.is_empty())
                                       .map(|u| u.to_lowercase())
                                       .collect()),
                "subkey-type" => {
                    let (algo, length) = algorithm(value)?;
                    p.subkey_type = Some(algo);
                    if p.subkey_length == 0 {
                        p.subkey_length = length;
                    }
                },
                "subkey-length" =>
                    p.subkey_length = value.parse().map_err(|_| invalid())?,
                "name-real" => p.name_real = value.into(),
                "name-email" => p.name_email = value.into(),
                "name-comment" => p.name_comment = value.into(),
                "passphrase" => p.passphrase = Some(value.into()),
                "expire-date" => p.expire = expiration(value)?,
                // Accepted, but without effect.
                "subkey-usage" | "creation-date" | "preferences"
                    | "revoker" | "keyserver" | "handle" => (),
                _ => return Err(invalid()),
            }
        }

        if ! have_type {
            return Err(invalid());
        }
        Ok(p)
    }

    /// Returns whether the primary key may be used for `usage`.
    pub fn primary_can(&self, usage: &str) -> bool {
        match &self.key_usage {
            Some(u) => u.iter().any(|u| u == usage),
            None => match usage {
                "sign" | "cert" => true,
                // Without an encryption subkey, an RSA primary key
                // takes over encryption.
                "encrypt" => self.subkey_type.is_none()
                    && self.key_type == PubkeyAlgo::RSA,
                _ => false,
            },
        }
    }

    pub fn has_uid(&self) -> bool {
        ! (self.name_real.is_empty() && self.name_email.is_empty()
           && self.name_comment.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let p = Params::parse(r#"
<GnupgKeyParms format="internal">
Key-Type: RSA
Key-Length: 1024
Subkey-Type: ELG-E
Name-Real: Alice
Name-Comment: with stupid passphrase
Name-Email: alice@example.org
Passphrase: abc
Expire-Date: 2y
%commit
</GnupgKeyParms>
"#).unwrap();
        assert_eq!(p.key_type, PubkeyAlgo::RSA);
        assert_eq!(p.key_length, 1024);
        assert_eq!(p.subkey_type, Some(PubkeyAlgo::ELG_E));
        assert_eq!(p.subkey_length, 2048);
        assert_eq!(p.name_real, "Alice");
        assert_eq!(p.passphrase.as_deref(), Some("abc"));
        assert_eq!(p.expire, 2 * 365 * 24 * 60 * 60);
        assert!(p.primary_can("sign"));
        assert!(! p.primary_can("encrypt"));
    }

    #[test]
    fn rejects() {
        // Missing wrapper.
        assert!(Params::parse("Key-Type: RSA").is_err());
        // Missing key type.
        assert!(Params::parse(&format!("{}\nName-Real: A\n{}", OPEN, CLOSE))
                .is_err());
        // Bad key.
        let e = Params::parse(&format!("{}\nKey-Type: RSA\nFoo: bar\n{}",
                                       OPEN, CLOSE)).unwrap_err();
        assert_eq!(e.code(), ErrorCode::INV_VALUE);
        // Bad algorithm.
        let e = Params::parse(&format!("{}\nKey-Type: ROT13\n{}", OPEN, CLOSE))
            .unwrap_err();
        assert_eq!(e.code(), ErrorCode::UNSUPPORTED_ALGORITHM);
        // Bad expiration.
        assert!(Params::parse(
            &format!("{}\nKey-Type: RSA\nExpire-Date: soon\n{}", OPEN, CLOSE))
                .is_err());
    }
}
