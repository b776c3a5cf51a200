/// PIN-based wrapping of private-key bytes for offline custody.
///
/// Blob layout on the volume: `[iv(16) | ciphertext]`, AES-256-CFB8 keyed
/// with the PIN-derived key. CFB-8 is a stream mode, so the ciphertext is
/// exactly as long as the plaintext.
///
/// There is no authentication tag. Unwrapping with the wrong PIN yields
/// garbage of the right length rather than an error; the only detection
/// is the private-key parse that follows (see `keys::load_private_key`).
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::Aes256;
use rand::RngCore;

use crate::crypto::kdf::{self, Pin};
use crate::crypto::sensitive::SensitiveVec;
use crate::error::{CustodyError, Result};

pub const IV_LEN: usize = 16;

type Aes256Cfb8Enc = cfb8::Encryptor<Aes256>;
type Aes256Cfb8Dec = cfb8::Decryptor<Aes256>;

/// A private key as it is stored on removable media.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedPrivateKey {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

impl WrappedPrivateKey {
    /// Serialize to the on-volume blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split an on-volume blob into IV and ciphertext.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < IV_LEN {
            return Err(CustodyError::Unwrap(format!(
                "Wrapped key too short: {} bytes (minimum {IV_LEN})",
                data.len()
            )));
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&data[..IV_LEN]);
        Ok(Self {
            iv,
            ciphertext: data[IV_LEN..].to_vec(),
        })
    }
}

/// Generate a fresh random IV.
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt private-key bytes under a PIN with a fresh IV.
pub fn wrap(private_key: &[u8], pin: &Pin) -> WrappedPrivateKey {
    wrap_with_iv(private_key, pin, generate_iv())
}

/// Encrypt with a caller-supplied IV. Reusing an IV with the same PIN
/// leaks plaintext relationships; only tests should call this directly.
pub fn wrap_with_iv(private_key: &[u8], pin: &Pin, iv: [u8; IV_LEN]) -> WrappedPrivateKey {
    let key = kdf::derive_key(pin);
    let mut ciphertext = private_key.to_vec();
    Aes256Cfb8Enc::new(key.as_bytes().into(), (&iv).into()).encrypt(&mut ciphertext);
    WrappedPrivateKey { iv, ciphertext }
}

/// Decrypt a wrapped key. Never fails on a wrong PIN; see module docs.
pub fn unwrap(wrapped: &WrappedPrivateKey, pin: &Pin) -> SensitiveVec {
    let key = kdf::derive_key(pin);
    let mut plaintext = SensitiveVec::from(wrapped.ciphertext.as_slice());
    Aes256Cfb8Dec::new(key.as_bytes().into(), (&wrapped.iv).into())
        .decrypt(plaintext.as_mut_bytes());
    plaintext
}

/// Convenience for the stored form: parse the blob, then unwrap.
pub fn unwrap_blob(blob: &[u8], pin: &Pin) -> Result<SensitiveVec> {
    let wrapped = WrappedPrivateKey::from_bytes(blob)?;
    Ok(unwrap(&wrapped, pin))
}
