use std::fmt;

use openssl::rand::rand_bytes;
use openssl::sha::sha256;
use openssl::symm::{decrypt, encrypt, Cipher};
use thiserror::Error;

const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("secret blob is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("secret blob too short: {len} bytes, expected at least 16")]
    ShortBlob { len: usize },

    #[error("cipher failure: {0}")]
    Cipher(#[from] openssl::error::ErrorStack),

    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,
}

/// Symmetric codec for tokens and database passwords at rest.
///
/// The 256-bit key is derived by hashing a static application passphrase;
/// blobs are `base64(IV || ciphertext)` with a fresh random 16-byte IV per
/// encryption, so encrypting the same plaintext twice yields different
/// blobs while decryption stays deterministic.
#[derive(Clone)]
pub struct SecretCodec {
    key: [u8; 32],
}

impl SecretCodec {
    pub fn new(passphrase: &str) -> Self {
        Self {
            key: sha256(passphrase.as_bytes()),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let mut iv = [0u8; IV_LEN];
        rand_bytes(&mut iv)?;

        let ciphertext = encrypt(
            Cipher::aes_256_cbc(),
            &self.key,
            Some(&iv),
            plaintext.as_bytes(),
        )?;

        let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);

        Ok(base64::encode(blob))
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, CodecError> {
        let raw = base64::decode(blob.trim())?;

        if raw.len() < IV_LEN {
            return Err(CodecError::ShortBlob { len: raw.len() });
        }

        let (iv, ciphertext) = raw.split_at(IV_LEN);
        let plaintext = decrypt(Cipher::aes_256_cbc(), &self.key, Some(iv), ciphertext)?;

        String::from_utf8(plaintext).map_err(|_| CodecError::NotUtf8)
    }
}

impl fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretCodec")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SecretCodec {
        SecretCodec::new("test-passphrase")
    }

    #[test]
    fn roundtrip_restores_plaintext() {
        let codec = codec();

        for plaintext in ["", "hunter2", "ghp_tokenwithsymbols!@#$%^&*()", "contraseña"] {
            let blob = codec.encrypt(plaintext).unwrap();
            assert_eq!(codec.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn encryption_is_non_deterministic() {
        let codec = codec();

        let first = codec.encrypt("same plaintext").unwrap();
        let second = codec.encrypt("same plaintext").unwrap();

        assert_ne!(first, second, "fresh IV must vary the blob");
        assert_eq!(codec.decrypt(&first).unwrap(), "same plaintext");
        assert_eq!(codec.decrypt(&second).unwrap(), "same plaintext");
    }

    #[test]
    fn malformed_base64_is_rejected() {
        assert!(matches!(
            codec().decrypt("not/valid/base64!!!"),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = base64::encode(b"short");
        assert!(matches!(
            codec().decrypt(&blob),
            Err(CodecError::ShortBlob { len: 5 })
        ));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let blob = codec().encrypt("secret").unwrap();
        let other = SecretCodec::new("different-passphrase");

        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn debug_output_does_not_leak_key() {
        assert_eq!(format!("{:?}", codec()), "SecretCodec");
    }
}
