// File codec: passphrase-keyed XChaCha20-Poly1305 for side-channel files
//
// Flow:
// 1. Random 16-byte salt, random 24-byte nonce
// 2. KDF: PBKDF2-HMAC-SHA256(passphrase, salt, rounds) → symmetric_key
// 3. Encrypt: XChaCha20-Poly1305(symmetric_key, nonce, plaintext, aad = header)
// 4. Output: MAGIC | rounds (u32 BE) | salt | nonce | ciphertext
//
// Peers share the passphrase out of band. The header is bound as AAD so
// tampering with the round count or salt fails authentication.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::Sha256;
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Container magic. Changing this breaks every file already in flight.
const MAGIC: &[u8; 4] = b"FLK1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = MAGIC.len() + 4 + SALT_LEN + NONCE_LEN;

/// Default PBKDF2 iteration count
pub const DEFAULT_KDF_ROUNDS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum FileCodecError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Not an encrypted exchange file")]
    BadHeader,
    #[error("Decryption failed: wrong key or tampered file")]
    Authentication,
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Background task failed: {0}")]
    Join(String),
}

impl FileCodecError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        FileCodecError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Encrypts and decrypts whole files with a shared passphrase
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FileCodec {
    passphrase: Vec<u8>,
    #[zeroize(skip)]
    rounds: u32,
}

impl std::fmt::Debug for FileCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCodec")
            .field("rounds", &self.rounds)
            .finish_non_exhaustive()
    }
}

impl FileCodec {
    pub fn new(passphrase: impl AsRef<[u8]>) -> Self {
        Self {
            passphrase: passphrase.as_ref().to_vec(),
            rounds: DEFAULT_KDF_ROUNDS,
        }
    }

    /// Override the KDF round count used for new files
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    fn derive_key(&self, salt: &[u8], rounds: u32) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.passphrase, salt, rounds, &mut key);
        key
    }

    /// Encrypt an in-memory buffer into the container format
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, FileCodecError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&self.rounds.to_be_bytes());
        header.extend_from_slice(&salt);
        header.extend_from_slice(&nonce_bytes);

        let mut key = self.derive_key(&salt, self.rounds);
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| FileCodecError::Encryption(e.to_string()));
        key.zeroize();
        let cipher = cipher?;

        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|e| FileCodecError::Encryption(e.to_string()))?;

        let mut out = header;
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a container produced by [`FileCodec::encrypt_bytes`]
    pub fn decrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>, FileCodecError> {
        if data.len() < HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
            return Err(FileCodecError::BadHeader);
        }

        let (header, ciphertext) = data.split_at(HEADER_LEN);
        let mut rounds_bytes = [0u8; 4];
        rounds_bytes.copy_from_slice(&header[MAGIC.len()..MAGIC.len() + 4]);
        let rounds = u32::from_be_bytes(rounds_bytes);
        if rounds == 0 {
            return Err(FileCodecError::BadHeader);
        }

        let salt = &header[MAGIC.len() + 4..MAGIC.len() + 4 + SALT_LEN];
        let nonce = XNonce::from_slice(&header[MAGIC.len() + 4 + SALT_LEN..]);

        let mut key = self.derive_key(salt, rounds);
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| FileCodecError::Encryption(e.to_string()));
        key.zeroize();

        cipher?
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| FileCodecError::Authentication)
    }

    /// Encrypt `src` into `dst`
    pub async fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<(), FileCodecError> {
        let plaintext = tokio::fs::read(src)
            .await
            .map_err(|e| FileCodecError::io(src, e))?;

        let codec = self.clone();
        let sealed = tokio::task::spawn_blocking(move || codec.encrypt_bytes(&plaintext))
            .await
            .map_err(|e| FileCodecError::Join(e.to_string()))??;

        tokio::fs::write(dst, sealed)
            .await
            .map_err(|e| FileCodecError::io(dst, e))?;

        debug!("Encrypted {} -> {}", src.display(), dst.display());
        Ok(())
    }

    /// Decrypt `src` into `dst`
    pub async fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<(), FileCodecError> {
        let sealed = tokio::fs::read(src)
            .await
            .map_err(|e| FileCodecError::io(src, e))?;

        let codec = self.clone();
        let plaintext = tokio::task::spawn_blocking(move || codec.decrypt_bytes(&sealed))
            .await
            .map_err(|e| FileCodecError::Join(e.to_string()))??;

        tokio::fs::write(dst, plaintext)
            .await
            .map_err(|e| FileCodecError::io(dst, e))?;

        debug!("Decrypted {} -> {}", src.display(), dst.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FileCodec {
        FileCodec::new("shared secret").with_rounds(1_000)
    }

    #[test]
    fn test_bytes_roundtrip() {
        let codec = codec();
        let sealed = codec.encrypt_bytes(b"regex counters").unwrap();
        assert_ne!(&sealed[HEADER_LEN..], b"regex counters");
        assert_eq!(codec.decrypt_bytes(&sealed).unwrap(), b"regex counters");
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_file() {
        let codec = codec();
        let a = codec.encrypt_bytes(b"same").unwrap();
        let b = codec.encrypt_bytes(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = codec().encrypt_bytes(b"data").unwrap();
        let other = FileCodec::new("other secret").with_rounds(1_000);
        assert!(matches!(other.decrypt_bytes(&sealed), Err(FileCodecError::Authentication)));
    }

    #[test]
    fn test_tampered_header_fails() {
        let codec = codec();
        let mut sealed = codec.encrypt_bytes(b"data").unwrap();
        sealed[MAGIC.len() + 4] ^= 0xff; // first salt byte
        assert!(codec.decrypt_bytes(&sealed).is_err());
    }

    #[test]
    fn test_rejects_plain_file() {
        assert!(matches!(
            codec().decrypt_bytes(b"just some text that is long enough to pass the length check"),
            Err(FileCodecError::BadHeader)
        ));
    }

    #[tokio::test]
    async fn test_file_roundtrip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("plain.bin");
        let enc = dir.path().join("sealed.bin");
        let dec = dir.path().join("restored.bin");

        let original: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        std::fs::write(&src, &original).unwrap();

        let codec = codec();
        codec.encrypt_file(&src, &enc).await.unwrap();
        codec.decrypt_file(&enc, &dec).await.unwrap();

        assert_ne!(std::fs::read(&enc).unwrap(), original);
        assert_eq!(std::fs::read(&dec).unwrap(), original);
    }
}
