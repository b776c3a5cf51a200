/// Signing documents with the key held on removable media.
///
/// Unlocking reads the wrapped key from the volume once, then asks for
/// the PIN up to `pin_attempts` times. A failed attempt is reported as
/// "decryption or key load failed": a wrong PIN and a damaged key file
/// cannot be told apart.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CustodyConfig;
use crate::crypto::keys;
use crate::crypto::sign::{self, SignedArtifact};
use crate::crypto::wrap::{self, WrappedPrivateKey};
use crate::error::{CustodyError, Result};
use crate::media::VolumeHandle;
use crate::prompt::{notify_error, Notice, PinPurpose, Prompt, Prompter};
use crate::session::{FlowKind, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    Cancelled,
}

pub struct DocumentSigner<'a> {
    config: &'a CustodyConfig,
    prompter: &'a dyn Prompter,
    session: &'a Session,
}

impl<'a> DocumentSigner<'a> {
    pub fn new(config: &'a CustodyConfig, prompter: &'a dyn Prompter, session: &'a Session) -> Self {
        Self {
            config,
            prompter,
            session,
        }
    }

    pub fn wrapped_key_path(&self, volume: &VolumeHandle) -> PathBuf {
        volume.file(&self.config.wrapped_key_file)
    }

    /// Whether `volume` carries a wrapped key at the well-known name.
    pub async fn holds_wrapped_key(&self, volume: &VolumeHandle) -> bool {
        tokio::fs::metadata(self.wrapped_key_path(volume))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Unwrap the key on `volume` into the session.
    pub async fn unlock(&self, volume: &VolumeHandle) -> Result<UnlockOutcome> {
        let permit = self.session.begin(FlowKind::Unlock)?;
        info!(flow_id = %permit.id(), volume = %volume, "Unlocking wrapped key");

        let result = self.unlock_inner(volume).await;
        if let Err(e) = &result {
            notify_error(self.prompter, e);
        }
        result
    }

    async fn unlock_inner(&self, volume: &VolumeHandle) -> Result<UnlockOutcome> {
        let path = self.wrapped_key_path(volume);
        let blob = tokio::fs::read(&path)
            .await
            .map_err(|e| CustodyError::Unwrap(format!("could not read {}: {e}", path.display())))?;
        let wrapped = WrappedPrivateKey::from_bytes(&blob)?;
        self.prompter
            .notify(Notice::Info(format!("Wrapped key found at {}", path.display())));

        let max_attempts = self.config.pin_attempts;
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let pin = match self
                .prompter
                .request_pin(PinPurpose::Unlock {
                    attempt,
                    max_attempts,
                })
                .await
            {
                Prompt::Provided(pin) => pin,
                Prompt::Cancelled => {
                    self.prompter
                        .notify(Notice::Info("PIN entry cancelled.".into()));
                    return Ok(UnlockOutcome::Cancelled);
                }
            };

            let plaintext = wrap::unwrap(&wrapped, &pin);
            match keys::load_private_key(plaintext.as_bytes()) {
                Ok(key) => {
                    self.session.set_signing_key(key);
                    self.prompter
                        .notify(Notice::Info("Private key unlocked.".into()));
                    return Ok(UnlockOutcome::Unlocked);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, reason = e.reason_code(), "Key load failed");
                    if attempt < max_attempts {
                        notify_error(self.prompter, &e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CustodyError::Signing("no PIN attempts allowed".into())))
    }

    /// Sign bytes with the unlocked key.
    pub async fn sign_bytes(&self, document: Vec<u8>) -> Result<SignedArtifact> {
        let key = self
            .session
            .signing_key()
            .ok_or_else(|| CustodyError::Signing("no private key is unlocked".into()))?;
        sign_off_runtime(document, key).await
    }

    /// Sign a file and write `[document | signature]` next to it (or to
    /// `output`). Returns the path written.
    pub async fn sign_file(&self, document: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let result = self.sign_file_inner(document, output).await;
        if let Err(e) = &result {
            notify_error(self.prompter, e);
        }
        result
    }

    async fn sign_file_inner(&self, document: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let payload = tokio::fs::read(document).await?;
        self.prompter
            .notify(Notice::Info("Signing document using RSA private key...".into()));

        let artifact = self.sign_bytes(payload).await?;
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| signed_output_path(document));
        tokio::fs::write(&output, artifact.to_bytes()).await?;

        info!(
            document = %document.display(),
            output = %output.display(),
            signature_len = artifact.signature.len(),
            "Document signed"
        );
        self.prompter.notify(Notice::Info(format!(
            "Document signed and saved as: {}",
            output.display()
        )));
        Ok(output)
    }
}

async fn sign_off_runtime(
    document: Vec<u8>,
    key: Arc<rsa::RsaPrivateKey>,
) -> Result<SignedArtifact> {
    tokio::task::spawn_blocking(move || sign::sign_document(&document, &key))
        .await
        .map_err(|e| CustodyError::Signing(format!("signing task failed: {e}")))?
}

/// `report.pdf` -> `report_signed.pdf`, `notes` -> `notes_signed`.
pub fn signed_output_path(document: &Path) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match document.extension() {
        Some(ext) => format!("{stem}_signed.{}", ext.to_string_lossy()),
        None => format!("{stem}_signed"),
    };
    document.with_file_name(name)
}
