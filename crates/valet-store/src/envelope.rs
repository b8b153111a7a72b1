//! AES-256-GCM envelope for connector OAuth tokens at rest.
//!
//! Key material is derived from the configured secret with SHA-256; the
//! random nonce is prepended to the ciphertext and the whole payload is
//! base64-encoded. Decryption authenticates with a fixed AAD so ciphertexts
//! from other deployments fail closed.

use aes_gcm::aead::rand_core::{OsRng, RngCore};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

const NONCE_BYTES: usize = 12;
const ENVELOPE_AAD: &[u8] = b"valet-connector-token-v1";

#[derive(Clone)]
/// Symmetric cipher for connector token columns.
pub struct TokenCipher {
    key_material: [u8; 32],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    pub fn new(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        if secret.is_empty() {
            bail!("token cipher secret must not be empty");
        }
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(ENVELOPE_AAD);
        let digest = hasher.finalize();
        let mut key_material = [0u8; 32];
        key_material.copy_from_slice(&digest);
        Ok(Self { key_material })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key_material)
            .map_err(|_| anyhow!("token key material has invalid length"))?;
        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|_| anyhow!("token payload encryption failed"))?;

        let mut payload = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64_STANDARD.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key_material)
            .map_err(|_| anyhow!("token key material has invalid length"))?;
        let raw = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| anyhow!("token payload encoding is invalid"))?;
        if raw.len() <= NONCE_BYTES {
            bail!("token payload is truncated");
        }

        let nonce = &raw[..NONCE_BYTES];
        let ciphertext = &raw[NONCE_BYTES..];
        let plaintext = cipher
            .decrypt(
                nonce.into(),
                Payload {
                    msg: ciphertext,
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|_| anyhow!("token payload integrity check failed"))?;
        String::from_utf8(plaintext).map_err(|_| anyhow!("token payload is not valid UTF-8"))
    }
}

/// SHA-256 hex digest used for approval token hashing.
pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut rendered = String::with_capacity(digest.len() * 2);
    for byte in digest {
        rendered.push_str(&format!("{byte:02x}"));
    }
    rendered
}

/// URL-safe high-entropy token for approval links.
pub(crate) fn random_token(bytes: usize) -> String {
    let mut raw = vec![0u8; bytes];
    OsRng.fill_bytes(&mut raw);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

#[cfg(test)]
mod tests {
    use super::{random_token, sha256_hex, TokenCipher};

    #[test]
    fn encrypt_then_decrypt_round_trips_exactly() {
        let cipher = TokenCipher::new("unit-secret").expect("cipher");
        let plaintext = "ya29.a0AfH6SMB-token-material";
        let encrypted = cipher.encrypt(plaintext).expect("encrypt");
        assert_ne!(encrypted, plaintext);
        assert_eq!(cipher.decrypt(&encrypted).expect("decrypt"), plaintext);
    }

    #[test]
    fn decrypt_rejects_foreign_key_material() {
        let cipher = TokenCipher::new("secret-a").expect("cipher");
        let other = TokenCipher::new("secret-b").expect("cipher");
        let encrypted = cipher.encrypt("token").expect("encrypt");
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(TokenCipher::new("   ").is_err());
    }

    #[test]
    fn random_tokens_differ_and_hash_deterministically() {
        let a = random_token(24);
        let b = random_token(24);
        assert_ne!(a, b);
        assert_eq!(sha256_hex(&a), sha256_hex(&a));
        assert_ne!(sha256_hex(&a), sha256_hex(&b));
    }
}
