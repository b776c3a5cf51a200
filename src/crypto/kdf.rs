/// PIN handling and PIN-to-key derivation.
///
/// The wrapping key is `SHA-256(utf8(pin))`: no salt and no work factor.
/// This is what existing wrapped-key files were produced with, so both
/// sides of wrap/unwrap must keep using it.
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{CustodyError, Result};

/// Length of every derived key (the SHA-256 digest size).
pub const DERIVED_KEY_LEN: usize = 32;

/// A user-entered PIN. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    /// Accept any string. Used on the unwrap path, where the format
    /// is not re-checked so that wrap and unwrap stay symmetric.
    pub fn new(pin: impl Into<String>) -> Self {
        Self(pin.into())
    }

    /// Accept only a PIN of exactly `length` ASCII digits, as required
    /// when issuing a new credential.
    pub fn parse_issuing(pin: &str, length: usize) -> Result<Self> {
        validate_format(pin, length)?;
        Ok(Self(pin.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Check that `pin` is exactly `length` ASCII digits.
pub fn validate_format(pin: &str, length: usize) -> Result<()> {
    if pin.len() == length && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CustodyError::InvalidPinFormat { expected: length })
    }
}

/// Derive the 32-byte wrapping key from a PIN.
pub fn derive_key(pin: &Pin) -> SensitiveBytes32 {
    let digest = Sha256::digest(pin.as_str().as_bytes());
    let mut key = [0u8; DERIVED_KEY_LEN];
    key.copy_from_slice(&digest);
    SensitiveBytes32::new(key)
}
