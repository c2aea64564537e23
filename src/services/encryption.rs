use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CipherError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Derives a purpose-specific key from the master key.
///
/// # Arguments
/// * `master_key` - Master key (32 bytes)
/// * `purpose` - Context string; distinct purposes yield independent keys
pub fn derive_key(master_key: &[u8], purpose: &str) -> anyhow::Result<[u8; 32]> {
    if master_key.len() != 32 {
        anyhow::bail!("Master key must be exactly 32 bytes");
    }

    let hk = Hkdf::<Sha256>::new(None, master_key);
    let info = format!("library-{purpose}");
    let mut key = [0u8; 32];
    hk.expand(info.as_bytes(), &mut key)
        .map_err(|_| anyhow::anyhow!("Failed to derive {purpose} key"))?;

    Ok(key)
}

/// Reversible transform for sensitive identity attributes.
///
/// Ciphertexts are `hex(nonce || ciphertext || tag)` under AES-256-GCM with a
/// random 96-bit nonce, so two encryptions of the same value differ. Equality
/// lookups go through [`FieldCipher::blind_index`] instead.
pub struct FieldCipher {
    cipher: Aes256Gcm,
    index_mac: Hmac<Sha256>,
}

impl FieldCipher {
    pub fn new(master_key: &[u8]) -> anyhow::Result<Self> {
        let encryption_key = derive_key(master_key, "field-encryption")?;
        let index_key = derive_key(master_key, "email-index")?;
        let cipher = Aes256Gcm::new_from_slice(&encryption_key)
            .map_err(|_| anyhow::anyhow!("Failed to create cipher"))?;
        let index_mac = <Hmac<Sha256> as Mac>::new_from_slice(&index_key)
            .map_err(|_| anyhow::anyhow!("Failed to create index MAC"))?;
        Ok(Self { cipher, index_mac })
    }

    /// Parses a 64-character hex master key (as found in the environment).
    pub fn from_hex_key(hex_key: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|_| anyhow::anyhow!("Field encryption key must be hex encoded"))?;
        Self::new(&bytes)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| {
                tracing::error!("Field encryption error: {}", e);
                CipherError::EncryptionFailed
            })?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&sealed);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let raw = hex::decode(ciphertext).map_err(|_| CipherError::DecryptionFailed)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::DecryptionFailed);
        }
        let (iv, sealed) = raw.split_at(NONCE_LEN);

        // Authentication tag check rejects tampered or foreign-key ciphertexts.
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(iv), sealed)
            .map_err(|e| {
                tracing::error!("Field decryption error: {}", e);
                CipherError::DecryptionFailed
            })?;

        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }

    /// Keyed, case-insensitive equality index for an email address.
    pub fn blind_index(&self, email: &str) -> String {
        let mut mac = self.index_mac.clone();
        mac.update(email.trim().to_lowercase().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
