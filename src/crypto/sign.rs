/// Detached RSA signatures appended to documents.
///
/// A signed artifact is `[payload | signature]` with no header: the
/// signature length (the modulus size in bytes) is the only framing.
///
/// The signed message is the 32-byte SHA-256 digest of the payload, fed
/// through RSASSA-PKCS1-v1_5 with SHA-256 as the scheme hash. Existing
/// signed files were produced that way, so the digest is hashed again
/// inside the padding scheme.
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{CustodyError, Result};

pub const DIGEST_LEN: usize = 32;

/// Signature length in bytes for a modulus of `modulus_bits`.
pub const fn signature_len(modulus_bits: usize) -> usize {
    modulus_bits.div_ceil(8)
}

/// SHA-256 of the document bytes.
pub fn document_digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(payload).into()
}

/// A document together with its trailing signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedArtifact {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedArtifact {
    /// `payload` followed by `signature`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + self.signature.len());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.signature);
        out
    }

    /// Split off the trailing `signature_len` bytes.
    pub fn split(data: &[u8], signature_len: usize) -> Result<(&[u8], &[u8])> {
        if data.len() < signature_len {
            return Err(CustodyError::MalformedArtifact {
                len: data.len(),
                expected: signature_len,
            });
        }
        Ok(data.split_at(data.len() - signature_len))
    }
}

/// Why a signed artifact was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Artifact shorter than the expected signature.
    MalformedArtifact { len: usize, expected: usize },
    /// Trailing bytes could not be decoded as a signature for this key.
    MalformedSignature(String),
    /// Well-formed signature that does not match the payload and key.
    Mismatch,
}

impl Rejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MalformedArtifact { .. } => "malformed_artifact",
            Self::MalformedSignature(_) => "malformed_signature",
            Self::Mismatch => "signature_mismatch",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedArtifact { len, expected } => write!(
                f,
                "artifact is {len} bytes, shorter than the {expected}-byte signature"
            ),
            Self::MalformedSignature(e) => write!(f, "malformed signature: {e}"),
            Self::Mismatch => f.write_str("signature does not match document and key"),
        }
    }
}

/// Outcome of a verification. Rejection is an expected result, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(Rejection),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Convert to the error kinds used at flow boundaries.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(Rejection::MalformedArtifact { len, expected }) => {
                Err(CustodyError::MalformedArtifact { len, expected })
            }
            Self::Invalid(rejection) => Err(CustodyError::VerificationFailed(rejection.to_string())),
        }
    }
}

/// Sign a document and append the signature.
pub fn sign_document(payload: &[u8], private_key: &RsaPrivateKey) -> Result<SignedArtifact> {
    let digest = document_digest(payload);
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign(&digest)
        .map_err(|e| CustodyError::Signing(e.to_string()))?;
    Ok(SignedArtifact {
        payload: payload.to_vec(),
        signature: signature.to_vec(),
    })
}

/// Verify `[payload | signature]` against a public key.
pub fn verify_artifact(data: &[u8], public_key: &RsaPublicKey, signature_len: usize) -> Verdict {
    let (payload, signature) = match SignedArtifact::split(data, signature_len) {
        Ok(parts) => parts,
        Err(_) => {
            return Verdict::Invalid(Rejection::MalformedArtifact {
                len: data.len(),
                expected: signature_len,
            })
        }
    };

    if signature.len() != public_key.size() {
        return Verdict::Invalid(Rejection::MalformedSignature(format!(
            "expected {}-byte signature for this key, framed {}",
            public_key.size(),
            signature.len()
        )));
    }

    let signature = match Signature::try_from(signature) {
        Ok(s) => s,
        Err(e) => return Verdict::Invalid(Rejection::MalformedSignature(e.to_string())),
    };

    let digest = document_digest(payload);
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    match verifying_key.verify(&digest, &signature) {
        Ok(()) => Verdict::Valid,
        Err(_) => Verdict::Invalid(Rejection::Mismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{test_key_pair, KeyPair};

    fn sig_len() -> usize {
        signature_len(test_key_pair().modulus_bits())
    }

    #[test]
    fn test_signature_len() {
        assert_eq!(signature_len(4096), 512);
        assert_eq!(signature_len(2048), 256);
        assert_eq!(signature_len(1024), 128);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let kp = test_key_pair();
        let artifact = sign_document(b"0123456789", kp.private_key()).unwrap();
        assert_eq!(artifact.signature.len(), sig_len());

        let bytes = artifact.to_bytes();
        assert_eq!(&bytes[..10], b"0123456789");
        assert_eq!(verify_artifact(&bytes, kp.public_key(), sig_len()), Verdict::Valid);
    }

    #[test]
    fn test_signature_is_deterministic() {
        let kp = test_key_pair();
        let a = sign_document(b"same", kp.private_key()).unwrap();
        let b = sign_document(b"same", kp.private_key()).unwrap();
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn test_every_payload_byte_is_covered() {
        let kp = test_key_pair();
        let bytes = sign_document(b"tamper-evident", kp.private_key())
            .unwrap()
            .to_bytes();
        for i in 0..b"tamper-evident".len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            assert_eq!(
                verify_artifact(&tampered, kp.public_key(), sig_len()),
                Verdict::Invalid(Rejection::Mismatch),
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let kp = test_key_pair();
        let mut bytes = sign_document(b"doc", kp.private_key()).unwrap().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(!verify_artifact(&bytes, kp.public_key(), sig_len()).is_valid());
    }

    #[test]
    fn test_truncated_artifact_is_malformed() {
        let kp = test_key_pair();
        let bytes = sign_document(b"doc", kp.private_key()).unwrap().to_bytes();
        let short = &bytes[..sig_len() - 1];
        assert_eq!(
            verify_artifact(short, kp.public_key(), sig_len()),
            Verdict::Invalid(Rejection::MalformedArtifact {
                len: sig_len() - 1,
                expected: sig_len()
            })
        );
        assert!(verify_artifact(&[], kp.public_key(), sig_len()).into_result().is_err());
    }

    #[test]
    fn test_empty_document() {
        let kp = test_key_pair();
        let bytes = sign_document(b"", kp.private_key()).unwrap().to_bytes();
        assert_eq!(bytes.len(), sig_len());
        assert!(verify_artifact(&bytes, kp.public_key(), sig_len()).is_valid());
    }

    #[test]
    fn test_wrong_signature_len_is_rejected() {
        let kp = test_key_pair();
        let bytes = sign_document(b"document body", kp.private_key())
            .unwrap()
            .to_bytes();
        let verdict = verify_artifact(&bytes, kp.public_key(), 512);
        assert!(!verdict.is_valid());
    }

    #[test]
    fn test_other_public_key_rejected() {
        let kp = test_key_pair();
        let other = KeyPair::generate(1024).unwrap();
        let bytes = sign_document(b"doc", kp.private_key()).unwrap().to_bytes();
        assert_eq!(
            verify_artifact(&bytes, other.public_key(), sig_len()),
            Verdict::Invalid(Rejection::Mismatch)
        );
    }

    #[test]
    fn test_verdict_into_result_kinds() {
        let malformed = Verdict::Invalid(Rejection::MalformedArtifact { len: 3, expected: 512 });
        assert_eq!(malformed.into_result().unwrap_err().reason_code(), "malformed_artifact");
        let mismatch = Verdict::Invalid(Rejection::Mismatch);
        assert_eq!(mismatch.into_result().unwrap_err().reason_code(), "verification_failed");
    }

    #[test]
    fn test_signature_len_rounds_up_without_overflow() {
        assert_eq!(signature_len(4096), 512);
        assert_eq!(signature_len(1023), 128);
        assert_eq!(signature_len(usize::MAX), usize::MAX / 8 + 1);
    }

    #[test]
    fn test_split() {
        let (payload, sig) = SignedArtifact::split(b"abcdef", 2).unwrap();
        assert_eq!(payload, b"abcd");
        assert_eq!(sig, b"ef");
        assert!(SignedArtifact::split(b"a", 2).is_err());
    }
}
