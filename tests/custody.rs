use std::sync::OnceLock;

use keycustody::config::CustodyConfig;
use keycustody::crypto::kdf::Pin;
use keycustody::crypto::keys::{self, KeyPair, DEFAULT_MODULUS_BITS};
use keycustody::crypto::sign::{self, signature_len, Rejection, Verdict};
use keycustody::crypto::wrap;
use keycustody::issuer::{CredentialIssuer, IssueOutcome};
use keycustody::media::VolumeHandle;
use keycustody::prompt::StaticPrompter;
use keycustody::session::Session;
use keycustody::signer::{DocumentSigner, UnlockOutcome};
use keycustody::verifier::DocumentVerifier;

fn full_size_key() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| KeyPair::generate(DEFAULT_MODULUS_BITS).unwrap())
}

#[test]
fn test_full_size_wrap_sign_verify() {
    let pair = full_size_key();
    assert_eq!(pair.modulus_bits(), 4096);

    let pin = Pin::new("1234");
    let private = pair.export_private().unwrap();
    let wrapped = wrap::wrap(private.as_bytes(), &pin);
    let unwrapped = wrap::unwrap_blob(&wrapped.to_bytes(), &pin).unwrap();
    assert_eq!(unwrapped.as_bytes(), private.as_bytes());

    let restored = keys::load_private_key(unwrapped.as_bytes()).unwrap();
    let document = b"0123456789";
    let artifact = sign::sign_document(document, &restored).unwrap();
    assert_eq!(artifact.signature.len(), 512);

    let signed = artifact.to_bytes();
    assert_eq!(signed.len(), 522);

    let verifier = DocumentVerifier::new(signature_len(4096));
    assert_eq!(verifier.verify(&signed, pair.public_key()), Verdict::Valid);

    let other = KeyPair::generate(DEFAULT_MODULUS_BITS).unwrap();
    assert_eq!(
        verifier.verify(&signed, other.public_key()),
        Verdict::Invalid(Rejection::Mismatch)
    );
}

#[tokio::test]
async fn test_issue_then_sign_then_verify() {
    let volume_dir = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let public_key_path = workspace.path().join("public.pem");

    let config = CustodyConfig {
        key_bits: 1024,
        ..Default::default()
    };
    let session = Session::new();
    let volume = VolumeHandle::new(volume_dir.path());

    let issuing = StaticPrompter::new(vec![Pin::new("1234")], Some(public_key_path.clone()));
    let outcome = CredentialIssuer::new(&config, &issuing, &session)
        .handle_arrival(&volume)
        .await
        .unwrap();
    let credential = match outcome {
        IssueOutcome::Issued(credential) => credential,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(credential.public_key_path, public_key_path);
    assert!(credential.wrapped_key_path.starts_with(volume_dir.path()));

    let document = workspace.path().join("invoice.txt");
    std::fs::write(&document, b"pay 10 units").unwrap();

    let unlocking = StaticPrompter::new(vec![Pin::new("1234")], None);
    let signer = DocumentSigner::new(&config, &unlocking, &session);
    assert!(signer.holds_wrapped_key(&volume).await);
    assert_eq!(signer.unlock(&volume).await.unwrap(), UnlockOutcome::Unlocked);
    let signed = signer.sign_file(&document, None).await.unwrap();
    assert_eq!(signed, workspace.path().join("invoice_signed.txt"));

    let verifier = DocumentVerifier::for_key_bits(1024);
    let verdict = verifier.verify_file(&signed, &public_key_path).await.unwrap();
    assert_eq!(verdict, Verdict::Valid);

    let mut tampered = std::fs::read(&signed).unwrap();
    tampered[0] ^= 0x01;
    std::fs::write(&signed, tampered).unwrap();
    let verdict = verifier.verify_file(&signed, &public_key_path).await.unwrap();
    assert_eq!(verdict, Verdict::Invalid(Rejection::Mismatch));
}
