//! Crypto port: keypair generation, session key unwrapping, file encryption, checksum.
//! `X25519Crypto` is the bundled adapter; the session only sees the trait.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::identity::{PrivateKey, PublicKey, SessionKey};
use crate::protocol::ENCRYPTED_KEY_FIELD_SIZE;

/// Everything the protocol engine needs from cryptography.
pub trait CryptoProvider {
    /// New asymmetric keypair: (encoded private key, encoded public key).
    fn generate_keypair(&self) -> Result<(PrivateKey, PublicKey), CryptoError>;

    /// Decrypt a server-supplied encrypted session key with the client's private key.
    fn decrypt_with_private(
        &self,
        private_key: &PrivateKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Encrypt file content under the session key.
    fn encrypt_with_symmetric(
        &self,
        key: &SessionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Checksum of plaintext, compared against the server's checksum.
    fn checksum(&self, bytes: &[u8]) -> u32;
}

const X25519_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// Sealed session key: ephemeral public key followed by the AEAD-wrapped 32-byte key.
pub const SEALED_KEY_LEN: usize = X25519_KEY_LEN + 32 + TAG_LEN;

/// X25519 key agreement with an ephemeral sender key, ChaCha20-Poly1305 for the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519Crypto;

impl X25519Crypto {
    pub fn new() -> Self {
        X25519Crypto
    }

    /// Server half of key delivery: wrap `session_key` for `recipient` into the 160-byte field.
    pub fn seal_session_key(
        &self,
        recipient: &PublicKey,
        session_key: &SessionKey,
    ) -> Result<[u8; ENCRYPTED_KEY_FIELD_SIZE], CryptoError> {
        let recipient = x25519_public(recipient.as_bytes())?;
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&recipient).to_bytes();
        let wrap_key = derive_wrap_key(&shared, ephemeral_public.as_bytes());
        let wrapped = aead(&wrap_key)?
            .encrypt(&Nonce::default(), session_key.as_bytes().as_slice())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = [0u8; ENCRYPTED_KEY_FIELD_SIZE];
        out[..X25519_KEY_LEN].copy_from_slice(ephemeral_public.as_bytes());
        out[X25519_KEY_LEN..SEALED_KEY_LEN].copy_from_slice(&wrapped);
        Ok(out)
    }

    /// Inverse of `encrypt_with_symmetric`. The client never decrypts files; servers do.
    pub fn decrypt_with_symmetric(
        &self,
        key: &SessionKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        aead(key.as_bytes())?
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Decrypt)
    }
}

impl CryptoProvider for X25519Crypto {
    fn generate_keypair(&self) -> Result<(PrivateKey, PublicKey), CryptoError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        let public = PublicKey::from_bytes(public.as_bytes().to_vec()).ok_or(CryptoError::Key)?;
        Ok((PrivateKey::from_bytes(secret.to_bytes().to_vec()), public))
    }

    fn decrypt_with_private(
        &self,
        private_key: &PrivateKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < SEALED_KEY_LEN {
            return Err(CryptoError::Decrypt);
        }
        let secret: [u8; X25519_KEY_LEN] = private_key
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::Key)?;
        let secret = StaticSecret::from(secret);
        let ephemeral_public = x25519_public(&ciphertext[..X25519_KEY_LEN])?;
        let shared = secret.diffie_hellman(&ephemeral_public).to_bytes();
        let wrap_key = derive_wrap_key(&shared, ephemeral_public.as_bytes());
        aead(&wrap_key)?
            .decrypt(
                &Nonce::default(),
                &ciphertext[X25519_KEY_LEN..SEALED_KEY_LEN],
            )
            .map_err(|_| CryptoError::Decrypt)
    }

    fn encrypt_with_symmetric(
        &self,
        key: &SessionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let body = aead(key.as_bytes())?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + body.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn checksum(&self, bytes: &[u8]) -> u32 {
        crc32fast::hash(bytes)
    }
}

/// Fresh random session key. Servers mint these; exposed for test servers.
pub fn random_session_key() -> SessionKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    SessionKey::from_bytes(key)
}

/// Interpret decrypted key bytes as a 256-bit session key.
pub fn session_key_from_bytes(bytes: &[u8]) -> Result<SessionKey, CryptoError> {
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::SessionKeyLength(bytes.len()))?;
    Ok(SessionKey::from_bytes(key))
}

fn x25519_public(bytes: &[u8]) -> Result<X25519PublicKey, CryptoError> {
    let raw: [u8; X25519_KEY_LEN] = bytes
        .get(..X25519_KEY_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(CryptoError::Key)?;
    Ok(X25519PublicKey::from(raw))
}

fn derive_wrap_key(shared_secret: &[u8; 32], ephemeral_public: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"sealpost-session-key-v1");
    hasher.update(shared_secret);
    hasher.update(ephemeral_public);
    hasher.finalize().into()
}

fn aead(key: &[u8; 32]) -> Result<ChaCha20Poly1305, CryptoError> {
    ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Key)
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("session key must be 32 bytes, got {0}")]
    SessionKeyLength(usize),
}
