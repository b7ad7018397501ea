//! Pre-shared-key material.
//!
//! A connection protected by a passphrase derives an AES-128 key from it
//! (key length is fixed at 16 bytes), proves possession during the
//! handshake with an HMAC-SHA256 tag, and encrypts every payload with
//! AES-128-GCM under a per-session key. Nonces combine the transfer
//! direction with the message and sequence numbers, which the transport
//! never reuses within a session.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, Key, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// AES-128 key length in bytes.
pub const KEY_LENGTH: usize = 16;

/// Shortest accepted passphrase.
pub const MIN_PASSPHRASE_LEN: usize = 10;

/// Longest accepted passphrase.
pub const MAX_PASSPHRASE_LEN: usize = 79;

/// Length of a handshake authentication tag.
pub const AUTH_TAG_LEN: usize = 32;

/// Crypto errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("passphrase length {0} outside {MIN_PASSPHRASE_LEN}..={MAX_PASSPHRASE_LEN}")]
    InvalidPassphraseLength(usize),

    #[error("payload encryption failed")]
    EncryptFailed,

    #[error("payload authentication failed")]
    DecryptFailed,
}

/// A validated passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Result<Self, CryptoError> {
        let value = value.into();
        let len = value.len();
        if !(MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&len) {
            return Err(CryptoError::InvalidPassphraseLength(len));
        }
        Ok(Passphrase(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Direction of a payload within one session, part of the nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    CallerToListener,
    ListenerToCaller,
}

impl Direction {
    fn byte(self) -> u8 {
        match self {
            Direction::CallerToListener => 0x01,
            Direction::ListenerToCaller => 0x02,
        }
    }
}

/// Derive a 16-byte key from a passphrase and salt.
pub fn derive_key(passphrase: &Passphrase, salt: &[u8]) -> [u8; KEY_LENGTH] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(passphrase.as_str().as_bytes())
        .expect("hmac accepts any key length");
    mac.update(salt);
    let digest = mac.finalize().into_bytes();

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&digest[..KEY_LENGTH]);
    key
}

/// Handshake authentication tag over arbitrary material.
pub fn auth_tag(key: &[u8; KEY_LENGTH], material: &[u8]) -> [u8; AUTH_TAG_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(material);
    let digest = mac.finalize().into_bytes();

    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&digest);
    tag
}

/// Constant-shape tag comparison.
pub fn verify_auth_tag(key: &[u8; KEY_LENGTH], material: &[u8], tag: &[u8]) -> bool {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(material);
    mac.verify_slice(tag).is_ok()
}

/// Per-session payload cipher.
pub struct PayloadCipher {
    cipher: Aes128Gcm,
}

impl PayloadCipher {
    /// Build the session cipher for one connection. Both ends derive the
    /// same key from the passphrase key, the handshake cookie and the two
    /// socket ids.
    pub fn session(
        passphrase: &Passphrase,
        cookie: u32,
        caller_id: u32,
        listener_id: u32,
    ) -> Self {
        let mut salt = [0u8; 12];
        salt[..4].copy_from_slice(&cookie.to_be_bytes());
        salt[4..8].copy_from_slice(&caller_id.to_be_bytes());
        salt[8..].copy_from_slice(&listener_id.to_be_bytes());

        let key = derive_key(passphrase, &salt);
        PayloadCipher {
            cipher: Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&key)),
        }
    }

    pub fn encrypt(
        &self,
        direction: Direction,
        seq: u32,
        message_number: u32,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = nonce_for(direction, seq, message_number);
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)
    }

    pub fn decrypt(
        &self,
        direction: Direction,
        seq: u32,
        message_number: u32,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = nonce_for(direction, seq, message_number);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

fn nonce_for(direction: Direction, seq: u32, message_number: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = direction.byte();
    nonce[4..8].copy_from_slice(&message_number.to_be_bytes());
    nonce[8..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passphrase() -> Passphrase {
        Passphrase::new("Th1$_is_4n_0pt10N4L_P$k").unwrap()
    }

    #[test]
    fn passphrase_length_bounds() {
        assert!(Passphrase::new("short").is_err());
        assert!(Passphrase::new("a".repeat(80)).is_err());
        assert!(Passphrase::new("a".repeat(10)).is_ok());
        assert!(Passphrase::new("a".repeat(79)).is_ok());
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_key(&passphrase(), b"salt");
        let b = derive_key(&passphrase(), b"salt");
        let c = derive_key(&passphrase(), b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn auth_tag_verifies() {
        let key = derive_key(&passphrase(), b"salt");
        let tag = auth_tag(&key, b"handshake material");
        assert!(verify_auth_tag(&key, b"handshake material", &tag));
        assert!(!verify_auth_tag(&key, b"tampered material", &tag));

        let wrong_key = derive_key(&Passphrase::new("Th1$_is_4_F4k3_P$k").unwrap(), b"salt");
        assert!(!verify_auth_tag(&wrong_key, b"handshake material", &tag));
    }

    #[test]
    fn payload_roundtrip() {
        let cipher = PayloadCipher::session(&passphrase(), 0xC00C1E, 1, 2);
        let plain = vec![1u8; 1000];

        let sealed = cipher
            .encrypt(Direction::CallerToListener, 10, 10, &plain)
            .unwrap();
        assert_ne!(sealed, plain);

        let opened = cipher
            .decrypt(Direction::CallerToListener, 10, 10, &sealed)
            .unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn wrong_direction_fails_decrypt() {
        let cipher = PayloadCipher::session(&passphrase(), 1, 1, 2);
        let sealed = cipher
            .encrypt(Direction::CallerToListener, 5, 5, b"payload")
            .unwrap();
        assert!(cipher
            .decrypt(Direction::ListenerToCaller, 5, 5, &sealed)
            .is_err());
    }

    #[test]
    fn mismatched_session_fails_decrypt() {
        let a = PayloadCipher::session(&passphrase(), 1, 1, 2);
        let b = PayloadCipher::session(&Passphrase::new("Th1$_is_4_F4k3_P$k").unwrap(), 1, 1, 2);

        let sealed = a
            .encrypt(Direction::CallerToListener, 1, 1, b"payload")
            .unwrap();
        assert!(b.decrypt(Direction::CallerToListener, 1, 1, &sealed).is_err());
    }
}
