//! Wire format of the in-process engine.
//!
//! Messages and key blocks are JSON documents.  In binary form, the
//! document is prefixed with a magic and a kind byte; in armored
//! form, it is base64 encoded between the usual OpenPGP armor lines.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::types::*;
use super::keyring::Record;

const MAGIC: &[u8] = b"\xa3MEM";

/// Line length of armored data.
const LINE_LENGTH: usize = 64;

/// What a blob contains.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Kind {
    Message,
    Signature,
    SignedMessage,
    PublicKey,
    SecretKey,
}

impl Kind {
    fn label(self) -> &'static str {
        match self {
            Kind::Message => "PGP MESSAGE",
            Kind::Signature => "PGP SIGNATURE",
            Kind::SignedMessage => "PGP SIGNED MESSAGE",
            Kind::PublicKey => "PGP PUBLIC KEY BLOCK",
            Kind::SecretKey => "PGP PRIVATE KEY BLOCK",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Kind::Message => 1,
            Kind::Signature => 2,
            Kind::SignedMessage => 3,
            Kind::PublicKey => 4,
            Kind::SecretKey => 5,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Kind::Message,
            2 => Kind::Signature,
            3 => Kind::SignedMessage,
            4 => Kind::PublicKey,
            5 => Kind::SecretKey,
            _ => return None,
        })
    }

    fn from_label(label: &str) -> Option<Self> {
        [Kind::Message, Kind::Signature, Kind::SignedMessage,
         Kind::PublicKey, Kind::SecretKey]
            .iter()
            .find(|k| k.label() == label)
            .cloned()
    }

    pub fn is_key(self) -> bool {
        self == Kind::PublicKey || self == Kind::SecretKey
    }
}

/// Serializes `payload`.
pub(crate) fn encode(kind: Kind, payload: &[u8], armored: bool) -> Vec<u8> {
    if ! armored {
        let mut out = Vec::with_capacity(MAGIC.len() + 1 + payload.len());
        out.extend_from_slice(MAGIC);
        out.push(kind.tag());
        out.extend_from_slice(payload);
        return out;
    }

    let encoded = base64::encode(payload);
    let mut out = format!("-----BEGIN {}-----\n\n", kind.label());
    for chunk in encoded.as_bytes().chunks(LINE_LENGTH) {
        // base64 output is ASCII.
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", kind.label()));
    out.into_bytes()
}

/// Parses a blob produced by `encode`.
pub(crate) fn decode(data: &[u8]) -> Option<(Kind, Vec<u8>)> {
    if data.starts_with(MAGIC) {
        let kind = Kind::from_tag(*data.get(MAGIC.len())?)?;
        return Some((kind, data[MAGIC.len() + 1..].to_vec()));
    }

    let text = std::str::from_utf8(data).ok()?;
    let mut lines = text.lines().map(str::trim)
        .skip_while(|l| ! l.starts_with("-----BEGIN "));
    let label = lines.next()?
        .strip_prefix("-----BEGIN ")?
        .strip_suffix("-----")?;
    let kind = Kind::from_label(label)?;
    let end = format!("-----END {}-----", label);

    let mut encoded = String::new();
    let mut in_headers = true;
    for line in lines {
        if line == end {
            return base64::decode(&encoded).ok().map(|p| (kind, p));
        }
        if in_headers {
            // Armor headers end with an empty line.
            if line.is_empty() {
                in_headers = false;
            }
            continue;
        }
        encoded.push_str(line);
    }
    None
}

/// A signature inside a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct SigPacket {
    pub fpr: String,
    pub mode: SigMode,
    pub class: u32,
    pub timestamp: i64,
    pub expires: i64,
    pub pubkey_algo: PubkeyAlgo,
    pub hash_algo: HashAlgo,
    pub notations: Vec<SigNotation>,
    pub digest: u64,
}

impl SigPacket {
    /// Computes the digest binding a signer to a body.
    pub fn digest(fpr: &str, timestamp: i64, body: &[u8]) -> u64 {
        let mut buf = Vec::with_capacity(fpr.len() + 9 + body.len());
        buf.extend_from_slice(fpr.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(body);
        xxh3_64(&buf)
    }

    pub fn verify(&self, body: &[u8]) -> bool {
        self.digest == SigPacket::digest(&self.fpr, self.timestamp, body)
    }
}

/// A message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    /// Whether the body is "encrypted", i.e. access controlled.
    pub encrypted: bool,
    /// Name of the cipher the message claims to use.
    pub algorithm: Option<String>,
    /// Primary fingerprints of the recipients.
    pub recipients: Vec<String>,
    /// Salt and digest of the passphrase for symmetric encryption.
    pub symmetric: Option<(u64, u64)>,
    pub signatures: Vec<SigPacket>,
    /// Empty for detached signatures.
    pub body: Vec<u8>,
    pub file_name: Option<String>,
}

impl Envelope {
    pub fn passphrase_digest(salt: u64, passphrase: &str) -> u64 {
        let mut buf = salt.to_be_bytes().to_vec();
        buf.extend_from_slice(passphrase.as_bytes());
        xxh3_64(&buf)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

/// A set of keys in transit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct KeyBlock {
    pub keys: Vec<Record>,
}

impl KeyBlock {
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armor() {
        let payload = vec![0x42u8; 200];
        let armored = encode(Kind::Signature, &payload, true);
        let text = String::from_utf8(armored.clone()).unwrap();
        assert!(text.starts_with("-----BEGIN PGP SIGNATURE-----\n"));
        assert!(text.lines().all(|l| l.len() <= LINE_LENGTH));
        assert_eq!(decode(&armored), Some((Kind::Signature, payload.clone())));

        let binary = encode(Kind::SecretKey, &payload, false);
        assert_eq!(decode(&binary), Some((Kind::SecretKey, payload)));
    }

    #[test]
    fn garbage() {
        assert_eq!(decode(b""), None);
        assert_eq!(decode(b"hello world"), None);
        assert_eq!(decode(b"-----BEGIN PGP MESSAGE-----\n\nAAAA\n"), None);
        assert_eq!(decode(b"\xa3MEM\x09"), None);
    }

    #[quickcheck_macros::quickcheck]
    fn decode_arbitrary(data: Vec<u8>) -> bool {
        match decode(&data) {
            Some((_, payload)) => payload.len() <= data.len(),
            None => true,
        }
    }

    #[test]
    fn signatures() {
        let fpr = "0123456789ABCDEF0123456789ABCDEF01234567";
        let sig = SigPacket {
            fpr: fpr.into(),
            mode: SigMode::NORMAL,
            class: 0,
            timestamp: 1_600_000_000,
            expires: 0,
            pubkey_algo: PubkeyAlgo::RSA,
            hash_algo: HashAlgo::SHA256,
            notations: vec![],
            digest: SigPacket::digest(fpr, 1_600_000_000, b"hello"),
        };
        assert!(sig.verify(b"hello"));
        assert!(! sig.verify(b"hellO"));
    }

    #[test]
    fn envelope_encoding() {
        let envelope = Envelope {
            encrypted: true,
            recipients: vec!["0123456789ABCDEF".into()],
            symmetric: Some((7, 42)),
            body: b"hello".to_vec(),
            ..Default::default()
        };
        let bytes = envelope.to_vec().unwrap();
        assert_eq!(Envelope::from_slice(&bytes), Some(envelope));
        assert_eq!(Envelope::from_slice(&bytes[1..]), None);
    }
}
