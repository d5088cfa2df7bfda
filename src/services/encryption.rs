use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

#[derive(thiserror::Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("No keyholder key configured")]
    MissingKey,

    #[error("Invalid token format")]
    InvalidFormat,
}

/// AES-256-GCM sealing for the payload handed to keyholder door devices.
///
/// Tokens are URL-safe base64 of `[nonce (12 bytes)][ciphertext + tag]`.
pub struct KeyholderCipher {
    key: [u8; 32],
    rng: SystemRandom,
}

impl KeyholderCipher {
    /// Builds a cipher from a passphrase. SHA-256 stretches any passphrase to
    /// the 32 byte key AES-256 needs.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let hash = digest::digest(&digest::SHA256, passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(hash.as_ref());

        Self {
            key,
            rng: SystemRandom::new(),
        }
    }

    fn sealing_key(&self) -> Result<LessSafeKey, EncryptionError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| EncryptionError::EncryptionFailed("Bad key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::EncryptionFailed("Failed to generate nonce".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.sealing_key()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| EncryptionError::EncryptionFailed("Sealing failed".to_string()))?;

        let mut token = Vec::with_capacity(NONCE_LEN + in_out.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&in_out);

        Ok(URL_SAFE.encode(token))
    }

    pub fn open(&self, token: &str) -> Result<String, EncryptionError> {
        let bytes = URL_SAFE
            .decode(token)
            .map_err(|_| EncryptionError::InvalidFormat)?;

        if bytes.len() < NONCE_LEN {
            return Err(EncryptionError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| EncryptionError::InvalidFormat)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .sealing_key()?
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| EncryptionError::DecryptionFailed("Opening failed".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| EncryptionError::DecryptionFailed("Invalid UTF-8".to_string()))
    }
}
