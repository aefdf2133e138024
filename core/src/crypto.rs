use crate::{Error, KdfParams, Result};
use aes_gcm::Aes256Gcm;
use argon2::Argon2;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use rand::RngCore;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub struct MasterKey {
    key: Vec<u8>,
}

impl MasterKey {
    pub fn derive_from_password(password: &str, params: &KdfParams) -> Result<Self> {
        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::new(
                params.memory,
                params.iterations,
                params.parallelism,
                Some(KEY_LEN),
            )
            .map_err(|e| Error::Encryption(e.to_string()))?,
        );

        let mut key = vec![0u8; KEY_LEN];
        argon2
            .hash_password_into(password.as_bytes(), &params.salt, &mut key)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn generate() -> Self {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(key: Vec<u8>) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::Encryption("Key must be 32 bytes".to_string()));
        }
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

/// Seals the repository data key under the password-derived master key.
pub struct KeyWrapper {
    cipher: ChaCha20Poly1305,
}

impl KeyWrapper {
    pub fn new(master: &MasterKey) -> Self {
        let key = Key::from_slice(master.as_bytes());
        Self {
            cipher: ChaCha20Poly1305::new(key),
        }
    }

    pub fn wrap(&self, data_key: &MasterKey) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, data_key.as_bytes())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// A wrong password surfaces as `InvalidPassword` since the AEAD tag
    /// cannot verify.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<MasterKey> {
        if wrapped.len() < NONCE_LEN {
            return Err(Error::InvalidPassword);
        }
        let (nonce_bytes, encrypted) = wrapped.split_at(NONCE_LEN);
        let key = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|_| Error::InvalidPassword)?;
        MasterKey::from_bytes(key)
    }
}

/// AES-256-GCM payload encryption. Wire format: `[12-byte nonce][ciphertext+tag]`.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::Encryption("Key must be 32 bytes".to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(Error::Encryption("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_LEN);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, encrypted)
            .map_err(|e| Error::Encryption(e.to_string()))
    }
}
