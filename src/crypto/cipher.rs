/// Passphrase-keyed AES cipher with digest framing.
///
/// Buffers produced by [`Cipher::encrypt`] are laid out as:
///
/// ```text
/// ┌──────────────────┬───────────────┬──────────────────────┐
/// │ digest (32 bytes)│ iv (16 bytes) │ ciphertext (n bytes) │
/// └──────────────────┴───────────────┴──────────────────────┘
/// ```
///
/// The key is the SHA-256 of the passphrase and the cipher is AES-256 in CFB
/// mode with 8-bit segments. The digest is an HMAC-SHA256 of `iv ‖ ciphertext`
/// under a key derived from the cipher key.
///
/// Older buffers carry a plain SHA-256 of `iv ‖ ciphertext` instead. Those
/// still decrypt unless the cipher is put in strict mode, but a plain digest
/// cannot tell a wrong passphrase from the right one.

use crate::error::{KitError, Result};
use aes::Aes256;
use cfb8::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type Aes256Cfb8Enc = cfb8::Encryptor<Aes256>;
type Aes256Cfb8Dec = cfb8::Decryptor<Aes256>;

/// Length of the derived AES-256 key.
pub const KEY_SIZE: usize = 32;

/// Length of the SHA-256 digest prefix.
pub const DIGEST_SIZE: usize = 32;

/// Length of the initialization vector (the AES block size).
pub const IV_SIZE: usize = 16;

/// Bytes added to every plaintext by [`Cipher::encrypt`].
pub const OVERHEAD: usize = DIGEST_SIZE + IV_SIZE;

/// Derive the 32-byte cipher key from a passphrase.
///
/// Deterministic: the same passphrase always yields the same key.
pub fn derive_key(secret: impl AsRef<[u8]>) -> Result<[u8; KEY_SIZE]> {
    let secret = secret.as_ref();
    if secret.is_empty() {
        return Err(KitError::ConfigError("Empty encryption key".to_string()));
    }
    Ok(Sha256::digest(secret).into())
}

type HmacSha256 = Hmac<Sha256>;

const MAC_KEY_CONTEXT: &[u8] = b"minikit.cipher.digest";

/// Keyed digest over the framed payload (everything after the digest prefix).
fn keyed_digest(mac_key: &[u8; KEY_SIZE], iv: &[u8], ciphertext: &[u8]) -> Result<[u8; DIGEST_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| KitError::ConfigError(format!("Invalid digest key: {}", e)))?;
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().into())
}

/// Unkeyed digest used by the legacy framing.
fn plain_digest(iv: &[u8], ciphertext: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(iv);
    hasher.update(ciphertext);
    hasher.finalize().into()
}

/// Encryption/decryption object.
///
/// One instance is meant for one operation at a time; `iv` and `digest` hold
/// the values of the most recent call.
#[derive(Default)]
pub struct Cipher {
    key: Option<Zeroizing<[u8; KEY_SIZE]>>,
    mac_key: Option<Zeroizing<[u8; KEY_SIZE]>>,
    strict: bool,
    iv: Option<[u8; IV_SIZE]>,
    digest: Option<[u8; DIGEST_SIZE]>,
}

impl Cipher {
    /// Create a cipher keyed from `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let mut cipher = Self::default();
        cipher.set_secret(secret)?;
        Ok(cipher)
    }

    /// Replace the passphrase and re-derive the key.
    pub fn set_secret(&mut self, secret: impl AsRef<[u8]>) -> Result<()> {
        let key = Zeroizing::new(derive_key(secret)?);
        let mac_key: [u8; KEY_SIZE] = Sha256::new()
            .chain_update(MAC_KEY_CONTEXT)
            .chain_update(key.as_slice())
            .finalize()
            .into();
        self.key = Some(key);
        self.mac_key = Some(Zeroizing::new(mac_key));
        Ok(())
    }

    /// Refuse buffers framed with the legacy unkeyed digest.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// IV used by the last encrypt or decrypt call.
    pub fn iv(&self) -> Option<&[u8; IV_SIZE]> {
        self.iv.as_ref()
    }

    /// Digest produced (encrypt) or received (decrypt) by the last call.
    pub fn digest(&self) -> Option<&[u8; DIGEST_SIZE]> {
        self.digest.as_ref()
    }

    fn keys(&self) -> Result<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
        match (self.key.as_deref(), self.mac_key.as_deref()) {
            (Some(key), Some(mac_key)) => Ok((*key, *mac_key)),
            _ => Err(KitError::ConfigError("Empty encryption key".to_string())),
        }
    }

    /// Encrypt `plaintext` under a fresh random IV.
    ///
    /// Returns `digest ‖ iv ‖ ciphertext`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let (key, mac_key) = self.keys()?;
        let (key, mac_key) = (Zeroizing::new(key), Zeroizing::new(mac_key));

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut ciphertext = plaintext.to_vec();
        Aes256Cfb8Enc::new_from_slices(key.as_slice(), &iv)
            .map_err(|e| KitError::ConfigError(format!("Invalid key or IV length: {}", e)))?
            .encrypt(&mut ciphertext);

        let digest = keyed_digest(&mac_key, &iv, &ciphertext)?;

        let mut framed = Vec::with_capacity(OVERHEAD + ciphertext.len());
        framed.extend_from_slice(&digest);
        framed.extend_from_slice(&iv);
        framed.extend_from_slice(&ciphertext);

        self.iv = Some(iv);
        self.digest = Some(digest);
        Ok(framed)
    }

    /// Verify and decrypt a buffer produced by [`Cipher::encrypt`].
    ///
    /// Plaintext is only returned when the digest matches.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let (key, mac_key) = self.keys()?;
        let (key, mac_key) = (Zeroizing::new(key), Zeroizing::new(mac_key));

        if data.len() < OVERHEAD {
            return Err(KitError::IntegrityError(format!(
                "Ciphertext too short: {} bytes, need at least {}",
                data.len(),
                OVERHEAD
            )));
        }

        let (digest, rest) = data.split_at(DIGEST_SIZE);
        let (iv, ciphertext) = rest.split_at(IV_SIZE);

        let mut received = [0u8; DIGEST_SIZE];
        received.copy_from_slice(digest);
        let mut iv_bytes = [0u8; IV_SIZE];
        iv_bytes.copy_from_slice(iv);
        self.digest = Some(received);
        self.iv = Some(iv_bytes);

        let keyed_ok = keyed_digest(&mac_key, iv, ciphertext)?
            .as_slice()
            .ct_eq(received.as_slice());
        let legacy_ok = plain_digest(iv, ciphertext)
            .as_slice()
            .ct_eq(received.as_slice());
        let accepted = if self.strict {
            keyed_ok
        } else {
            keyed_ok | legacy_ok
        };
        if accepted.unwrap_u8() == 0 {
            log::debug!("Rejecting ciphertext: digest mismatch");
            return Err(KitError::IntegrityError(
                "Data signatures do not match".to_string(),
            ));
        }

        let mut plaintext = ciphertext.to_vec();
        Aes256Cfb8Dec::new_from_slices(key.as_slice(), iv)
            .map_err(|e| KitError::ConfigError(format!("Invalid key or IV length: {}", e)))?
            .decrypt(&mut plaintext);

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

    const KNOWN_CIPHERTEXT: &str =
        "W+ryRfcON4HcWbwoO+25vprJF+D7GcLHDAZ1p5UCJMTm+wd4y3xL966XX/BkldyCNlHYBo1wuitT/+H9DSPU";

    #[test]
    fn test_round_trip() {
        let mut enc = Cipher::new("the-secret-key").unwrap();
        let ciphertext = enc.encrypt(b"Attack at dawn.").unwrap();
        assert_eq!(ciphertext.len(), OVERHEAD + 15);

        let mut dec = Cipher::new("the-secret-key").unwrap();
        let plaintext = dec.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"Attack at dawn.");
        assert_eq!(dec.iv(), enc.iv());
        assert_eq!(dec.digest(), enc.digest());
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let mut cipher = Cipher::new("k").unwrap();
        let ciphertext = cipher.encrypt(b"").unwrap();
        assert_eq!(ciphertext.len(), OVERHEAD);
        assert!(cipher.decrypt(&ciphertext).unwrap().is_empty());
    }

    #[test]
    fn test_known_vector() {
        let data = BASE64_STANDARD.decode(KNOWN_CIPHERTEXT).unwrap();
        let mut cipher = Cipher::new("secret-key").unwrap();
        assert_eq!(cipher.decrypt(&data).unwrap(), b"Attack at dawn.");
    }

    #[test]
    fn test_iv_is_fresh_per_call() {
        let mut cipher = Cipher::new("secret").unwrap();
        let first = cipher.encrypt(b"same message").unwrap();
        let first_iv = *cipher.iv().unwrap();
        let second = cipher.encrypt(b"same message").unwrap();
        let second_iv = *cipher.iv().unwrap();

        assert_ne!(first, second);
        assert_ne!(first_iv, second_iv);
    }

    #[test]
    fn test_tampering_is_detected_in_every_section() {
        let mut cipher = Cipher::new("secret").unwrap();
        let ciphertext = cipher.encrypt(b"Attack at dawn.").unwrap();

        for index in [0, DIGEST_SIZE - 1, DIGEST_SIZE, OVERHEAD - 1, OVERHEAD, ciphertext.len() - 1] {
            let mut tampered = ciphertext.clone();
            tampered[index] ^= 0x01;
            let result = Cipher::new("secret").unwrap().decrypt(&tampered);
            assert!(
                matches!(result, Err(KitError::IntegrityError(_))),
                "flip at byte {} was not rejected",
                index
            );
        }
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let mut cipher = Cipher::new("secret").unwrap();
        let result = cipher.decrypt(b"abc");
        assert!(matches!(result, Err(KitError::IntegrityError(_))));

        let result = cipher.decrypt(&[0u8; OVERHEAD - 1]);
        assert!(matches!(result, Err(KitError::IntegrityError(_))));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let ciphertext = Cipher::new("right key").unwrap().encrypt(b"payload").unwrap();
        let result = Cipher::new("wrong key").unwrap().decrypt(&ciphertext);
        assert!(matches!(result, Err(KitError::IntegrityError(_))));
    }

    #[test]
    fn test_strict_mode_refuses_legacy_framing() {
        let data = BASE64_STANDARD.decode(KNOWN_CIPHERTEXT).unwrap();
        let mut cipher = Cipher::new("secret-key").unwrap().strict(true);
        assert!(matches!(cipher.decrypt(&data), Err(KitError::IntegrityError(_))));

        let fresh = cipher.encrypt(b"Attack at dawn.").unwrap();
        assert_eq!(cipher.decrypt(&fresh).unwrap(), b"Attack at dawn.");
    }

    #[test]
    fn test_legacy_framing_is_detected_as_tampered() {
        let mut data = BASE64_STANDARD.decode(KNOWN_CIPHERTEXT).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x80;
        let result = Cipher::new("secret-key").unwrap().decrypt(&data);
        assert!(matches!(result, Err(KitError::IntegrityError(_))));
    }

    #[test]
    fn test_missing_key() {
        let mut cipher = Cipher::default();
        assert!(!cipher.has_key());
        assert!(matches!(cipher.encrypt(b"x"), Err(KitError::ConfigError(_))));
        assert!(matches!(cipher.decrypt(&[0u8; 64]), Err(KitError::ConfigError(_))));
    }

    #[test]
    fn test_set_secret_rekeys() {
        let mut cipher = Cipher::new("the-secret-key").unwrap();
        cipher.set_secret("a different secret key").unwrap();
        let ciphertext = cipher.encrypt(b"Attack at dawn.").unwrap();

        let plaintext = Cipher::new("a different secret key")
            .unwrap()
            .decrypt(&ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"Attack at dawn.");
    }

    #[test]
    fn test_derive_key() {
        let key = derive_key("the-secret-key").unwrap();
        assert_eq!(key.len(), KEY_SIZE);
        assert_eq!(key, derive_key(b"the-secret-key").unwrap());
        assert_eq!(derive_key("a").unwrap().len(), KEY_SIZE);
        assert_ne!(derive_key("a").unwrap(), derive_key("b").unwrap());

        assert!(matches!(derive_key(""), Err(KitError::ConfigError(_))));
        assert!(matches!(derive_key(Vec::<u8>::new()), Err(KitError::ConfigError(_))));
    }
}
