/// Verification of signed documents against a public key.
///
/// Signed files carry no length header, so the verifier must be told the
/// signature length the signer's key produces (512 bytes at 4096 bits).
use std::path::Path;

use rsa::RsaPublicKey;
use tracing::{info, warn};

use crate::crypto::keys;
use crate::crypto::sign::{self, signature_len, Verdict};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct DocumentVerifier {
    signature_len: usize,
}

impl DocumentVerifier {
    pub fn new(signature_len: usize) -> Self {
        Self { signature_len }
    }

    pub fn for_key_bits(modulus_bits: usize) -> Self {
        Self::new(signature_len(modulus_bits))
    }

    pub fn signature_len(&self) -> usize {
        self.signature_len
    }

    pub fn verify(&self, artifact: &[u8], public_key: &RsaPublicKey) -> Verdict {
        sign::verify_artifact(artifact, public_key, self.signature_len)
    }

    /// Verify a signed file with a PEM public key from disk.
    ///
    /// I/O and key-parse failures are errors; every outcome of the
    /// cryptographic check itself is a `Verdict`.
    pub async fn verify_file(&self, signed: &Path, public_key_pem: &Path) -> Result<Verdict> {
        let pem = tokio::fs::read_to_string(public_key_pem).await?;
        let public_key = keys::load_public_key(&pem)?;
        let artifact = tokio::fs::read(signed).await?;

        let verdict = self.verify(&artifact, &public_key);
        match &verdict {
            Verdict::Valid => info!(document = %signed.display(), "Signature is valid"),
            Verdict::Invalid(rejection) => warn!(
                document = %signed.display(),
                reason = rejection.reason_code(),
                "Signature verification failed: {rejection}"
            ),
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::test_key_pair;
    use crate::crypto::sign::{sign_document, Rejection};
    use crate::error::CustodyError;

    fn write_fixture(dir: &Path, payload: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
        let kp = test_key_pair();
        let signed = dir.join("doc_signed.pdf");
        let public = dir.join("pub.pem");
        std::fs::write(
            &signed,
            sign_document(payload, kp.private_key()).unwrap().to_bytes(),
        )
        .unwrap();
        std::fs::write(&public, kp.export_public().unwrap()).unwrap();
        (signed, public)
    }

    #[test]
    fn test_for_key_bits() {
        assert_eq!(DocumentVerifier::for_key_bits(4096).signature_len(), 512);
    }

    #[test]
    fn test_absurd_key_bits_rejects_instead_of_panicking() {
        let verifier = DocumentVerifier::for_key_bits(usize::MAX);
        let verdict = verifier.verify(b"payload", test_key_pair().public_key());
        assert!(matches!(
            verdict,
            Verdict::Invalid(Rejection::MalformedArtifact { len: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_file_valid() {
        let dir = tempfile::tempdir().unwrap();
        let (signed, public) = write_fixture(dir.path(), b"0123456789");
        let verdict = DocumentVerifier::for_key_bits(1024)
            .verify_file(&signed, &public)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Valid);
    }

    #[tokio::test]
    async fn test_verify_file_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let (signed, public) = write_fixture(dir.path(), b"0123456789");
        let mut bytes = std::fs::read(&signed).unwrap();
        bytes[3] = b'X';
        std::fs::write(&signed, bytes).unwrap();

        let verdict = DocumentVerifier::for_key_bits(1024)
            .verify_file(&signed, &public)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Invalid(Rejection::Mismatch));
    }

    #[tokio::test]
    async fn test_verify_file_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let (signed, public) = write_fixture(dir.path(), b"x");
        std::fs::write(&signed, b"short").unwrap();

        let verdict = DocumentVerifier::for_key_bits(1024)
            .verify_file(&signed, &public)
            .await
            .unwrap();
        assert!(matches!(
            verdict,
            Verdict::Invalid(Rejection::MalformedArtifact { len: 5, expected: 128 })
        ));
    }

    #[tokio::test]
    async fn test_verify_file_bad_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let (signed, public) = write_fixture(dir.path(), b"x");
        std::fs::write(&public, "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n").unwrap();

        let err = DocumentVerifier::for_key_bits(1024)
            .verify_file(&signed, &public)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::PublicKey(_)));
    }
}
