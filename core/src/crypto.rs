//! At-rest encryption for the store file
//!
//! A passphrase is checked against an Argon2id hash kept in a [`KeyFile`] and
//! stretched into an AES-256-GCM key. Sealed data is
//! `header || nonce || ciphertext`.

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const NONCE_SIZE: usize = 12;
const KEY_SALT_SIZE: usize = 32;
const TAG_SIZE: usize = 16;
const SEALED_HEADER: &[u8] = b"DEVCONF_ENC_V1";

/// Passphrase verifier and key-derivation salt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u32,
    pub passphrase_hash: String,
    /// base64
    pub key_salt: String,
}

impl KeyFile {
    pub fn create(passphrase: &str) -> Result<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let passphrase_hash = Argon2::default()
            .hash_password(passphrase.as_bytes(), &salt)
            .map_err(|e| Error::crypto(format!("Failed to hash passphrase: {}", e)))?
            .to_string();

        let mut key_salt = [0u8; KEY_SALT_SIZE];
        OsRng.fill(&mut key_salt);

        Ok(Self {
            version: 1,
            passphrase_hash,
            key_salt: STANDARD.encode(key_salt),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn verify(&self, passphrase: &str) -> Result<bool> {
        let parsed = PasswordHash::new(&self.passphrase_hash)
            .map_err(|e| Error::crypto(format!("Invalid passphrase hash: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(passphrase.as_bytes(), &parsed)
            .is_ok())
    }

    fn derive_key(&self, passphrase: &str) -> Result<[u8; 32]> {
        let salt = STANDARD
            .decode(&self.key_salt)
            .map_err(|e| Error::crypto(format!("Invalid key salt: {}", e)))?;
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| Error::crypto(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }
}

/// Seals and opens store payloads
#[derive(Clone)]
pub struct Sealer {
    key: [u8; 32],
}

impl Sealer {
    /// Fails when `passphrase` does not match `key_file`
    pub fn unlock(passphrase: &str, key_file: &KeyFile) -> Result<Self> {
        if !key_file.verify(passphrase)? {
            return Err(Error::crypto("Wrong passphrase"));
        }
        Ok(Self {
            key: key_file.derive_key(passphrase)?,
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::crypto(format!("Failed to create cipher: {}", e)))
    }

    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill(&mut nonce_bytes);
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), data)
            .map_err(|e| Error::crypto(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(SEALED_HEADER.len() + NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(SEALED_HEADER);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < SEALED_HEADER.len() + NONCE_SIZE + TAG_SIZE {
            return Err(Error::crypto("Sealed data too short"));
        }
        if !Self::is_sealed(data) {
            return Err(Error::crypto("Sealed data has wrong header"));
        }
        let (nonce, ciphertext) = data[SEALED_HEADER.len()..].split_at(NONCE_SIZE);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::crypto("Decryption failed: wrong key or corrupted data"))
    }

    pub fn is_sealed(data: &[u8]) -> bool {
        data.starts_with(SEALED_HEADER)
    }
}
