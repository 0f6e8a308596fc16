//! Key derivation and authenticated encryption for envsync vaults.
//!
//! A vault key is derived from a recovery phrase and a per-vault salt with
//! Argon2id. Secret values are sealed with AES-256-GCM using a fresh random
//! nonce per message. The KDF parameters are part of the on-disk contract
//! and must not change.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

mod wordlist;

pub use wordlist::WORD_LIST;

/// Argon2id passes. On-disk contract, do not change.
const KDF_TIME_COST: u32 = 1;
/// Argon2id memory in KiB (64 MiB). On-disk contract, do not change.
const KDF_MEMORY_KIB: u32 = 64 * 1024;
/// Argon2id lanes. On-disk contract, do not change.
const KDF_LANES: u32 = 4;

/// Fixed input for the key-check MAC stored next to the salt.
const KEY_CHECK_INPUT: &[u8] = b"envsync-key-check";

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Symmetric vault key derived from the recovery phrase.
///
/// Wiped on drop. Deliberately has no `Debug` impl.
#[derive(zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct VaultKey(Zeroizing<[u8; 32]>);

impl VaultKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct from raw bytes. Intended for tests and key-check fixtures.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("invalid kdf parameters")]
    InvalidParams(argon2::Error),
    #[error("key derivation failed")]
    DerivationFailed(argon2::Error),
}

/// Derive the vault key from a recovery phrase and salt.
pub fn derive_vault_key(phrase: &str, salt: &[u8]) -> Result<VaultKey, KdfError> {
    let mut key = Zeroizing::new([0u8; 32]);

    let params = argon2::Params::new(KDF_MEMORY_KIB, KDF_TIME_COST, KDF_LANES, Some(32))
        .map_err(KdfError::InvalidParams)?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    argon2
        .hash_password_into(phrase.as_bytes(), salt, key.as_mut())
        .map_err(KdfError::DerivationFailed)?;

    Ok(VaultKey(key))
}

/// HMAC-SHA256 over a fixed constant under the vault key. Stored alongside
/// the salt so a wrong phrase is detected without decrypting any secret.
pub fn key_check(key: &VaultKey) -> [u8; 32] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes()).expect("hmac accepts any key len");
    mac.update(KEY_CHECK_INPUT);
    mac.finalize().into_bytes().into()
}

/// Constant-time comparison of a stored key-check tag against `key`.
pub fn verify_key_check(key: &VaultKey, expected: &[u8]) -> bool {
    let computed = key_check(key);
    computed.as_slice().ct_eq(expected).into()
}

/// One sealed secret value: ciphertext with tag appended, the nonce used,
/// and a hex SHA-256 of the plaintext for diffing without decryption.
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub plain_hash: String,
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptFailed,
    #[error("invalid ciphertext")]
    InvalidCiphertext,
}

/// AEAD-seal a plaintext under the vault key with a fresh random nonce.
pub fn encrypt(key: &VaultKey, plaintext: &str) -> Result<SealedSecret, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: b"",
            },
        )
        .map_err(|_| CryptoError::EncryptFailed)?;

    let plain_hash = hex::encode(Sha256::digest(plaintext.as_bytes()));

    Ok(SealedSecret {
        ciphertext,
        nonce: nonce_bytes,
        plain_hash,
    })
}

/// AEAD-open a ciphertext. Any tampering, truncation or wrong key yields
/// [`CryptoError::InvalidCiphertext`].
pub fn decrypt(key: &VaultKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Zeroizing<String>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidCiphertext);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::InvalidCiphertext)?;
    let text = String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidCiphertext)?;
    Ok(Zeroizing::new(text))
}

/// `n` bytes from the OS-seeded CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    rand::fill(bytes.as_mut_slice());
    bytes
}

/// `n` random bytes rendered as lowercase hex.
pub fn random_hex(n: usize) -> String {
    hex::encode(random_bytes(n))
}

/// Generate a recovery phrase of `words` space-separated words.
///
/// Word selection draws two random bytes and rejection-samples so every word
/// is equally likely.
pub fn generate_phrase(words: usize) -> String {
    (0..words)
        .map(|_| WORD_LIST[random_word_index(WORD_LIST.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn random_word_index(max: usize) -> usize {
    debug_assert!(max > 0 && max <= u16::MAX as usize);
    // Largest multiple of `max` that fits in u16; redraw above it.
    let limit = (u16::MAX as usize + 1) / max * max;
    loop {
        let mut draw = [0u8; 2];
        rand::fill(&mut draw);
        let v = usize::from(u16::from_be_bytes(draw));
        if v < limit {
            return v % max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> VaultKey {
        derive_vault_key("test phrase", b"0123456789abcdef").unwrap()
    }

    #[test]
    fn derive_is_deterministic() {
        let a = derive_vault_key("winter harbor cedar", b"0123456789abcdef").unwrap();
        let b = derive_vault_key("winter harbor cedar", b"0123456789abcdef").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derive_differs_by_salt_and_phrase() {
        let a = derive_vault_key("winter harbor cedar", b"0123456789abcdef").unwrap();
        let b = derive_vault_key("winter harbor cedar", b"fedcba9876543210").unwrap();
        let c = derive_vault_key("summer harbor cedar", b"0123456789abcdef").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn key_check_round_trip() {
        let key = test_key();
        let tag = key_check(&key);
        assert!(verify_key_check(&key, &tag));

        let other = derive_vault_key("other phrase", b"0123456789abcdef").unwrap();
        assert!(!verify_key_check(&other, &tag));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = test_key();
        let sealed = encrypt(&key, "super-secret").unwrap();
        let opened = decrypt(&key, &sealed.ciphertext, &sealed.nonce).unwrap();
        assert_eq!(&*opened, "super-secret");
    }

    #[test]
    fn plain_hash_is_sha256_hex() {
        let key = test_key();
        let sealed = encrypt(&key, "abc").unwrap();
        assert_eq!(
            sealed.plain_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn nonces_are_unique_per_message() {
        let key = test_key();
        let a = encrypt(&key, "same").unwrap();
        let b = encrypt(&key, "same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let key = test_key();
        let mut sealed = encrypt(&key, "hello").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &sealed.ciphertext, &sealed.nonce),
            Err(CryptoError::InvalidCiphertext)
        ));
    }

    #[test]
    fn decrypt_fails_on_wrong_key() {
        let key = test_key();
        let sealed = encrypt(&key, "hello").unwrap();
        let other = derive_vault_key("wrong phrase", b"0123456789abcdef").unwrap();
        assert!(decrypt(&other, &sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn decrypt_fails_on_bad_nonce_length() {
        let key = test_key();
        let sealed = encrypt(&key, "hello").unwrap();
        assert!(decrypt(&key, &sealed.ciphertext, &sealed.nonce[..8]).is_err());
    }

    #[test]
    fn empty_plaintext_ok() {
        let key = test_key();
        let sealed = encrypt(&key, "").unwrap();
        let opened = decrypt(&key, &sealed.ciphertext, &sealed.nonce).unwrap();
        assert_eq!(&*opened, "");
    }

    #[test]
    fn random_hex_length_and_charset() {
        let id = random_hex(8);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_hex(8), random_hex(8));
    }

    #[test]
    fn word_list_has_expected_size() {
        assert_eq!(WORD_LIST.len(), 104);
    }

    #[test]
    fn generate_phrase_word_count() {
        let phrase = generate_phrase(12);
        let words: Vec<_> = phrase.split(' ').collect();
        assert_eq!(words.len(), 12);
        for w in words {
            assert!(WORD_LIST.contains(&w), "unknown word {w}");
        }
    }

    #[test]
    fn word_index_stays_in_bounds() {
        for _ in 0..1000 {
            assert!(random_word_index(WORD_LIST.len()) < WORD_LIST.len());
        }
    }

    #[test]
    fn sensitive_types_impl_zeroize() {
        fn assert_zeroize<T: zeroize::Zeroize>() {}
        assert_zeroize::<VaultKey>();
    }
}
