/// Containers for key material that must not outlive its use.
///
/// Both types wipe their contents on drop and deliberately do not
/// implement `Debug`, so derived keys and unwrapped private-key
/// encodings never end up in log output.
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A derived 256-bit symmetric key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes32([u8; 32]);

impl SensitiveBytes32 {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for SensitiveBytes32 {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Plaintext private-key bytes (or anything else that is secret and
/// variable-length).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveVec(Vec<u8>);

impl SensitiveVec {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Mutable access for in-place stream cipher operations.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SensitiveVec {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for SensitiveVec {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_bytes32_equality() {
        assert!(SensitiveBytes32::new([1; 32]) == SensitiveBytes32::new([1; 32]));
        assert!(SensitiveBytes32::new([1; 32]) != SensitiveBytes32::new([2; 32]));
    }

    #[test]
    fn test_sensitive_vec_in_place_edit() {
        let mut v = SensitiveVec::from(&b"abc"[..]);
        v.as_mut_bytes()[0] = b'x';
        assert_eq!(v.as_bytes(), b"xbc");
        assert_eq!(v.len(), 3);
        assert!(!v.is_empty());
    }
}
