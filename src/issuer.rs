/// Credential issuance on a freshly inserted volume.
///
/// Flow for one arrival:
/// 1. Ask for a PIN of the configured length (re-prompt on bad format)
/// 2. Generate the RSA key pair off the async runtime
/// 3. Ask where to save the public key; cancelling aborts with nothing written
/// 4. Write the public key (and certificate, if configured) locally
/// 5. Wrap the private key with the PIN and write it to the volume
///
/// The volume is only touched after the public half is safely on disk,
/// so a cancelled or failed issuance never leaves an orphaned private key.
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::CustodyConfig;
use crate::crypto::certificate;
use crate::crypto::kdf::{self, Pin};
use crate::crypto::keys::{self, KeyPair};
use crate::crypto::wrap;
use crate::error::{CustodyError, Result};
use crate::media::VolumeHandle;
use crate::prompt::{notify_error, Notice, PinPurpose, Prompt, Prompter};
use crate::session::{FlowKind, Session};

/// Files produced by a completed issuance.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub volume: VolumeHandle,
    pub public_key_path: PathBuf,
    pub certificate_path: Option<PathBuf>,
    pub wrapped_key_path: PathBuf,
    /// Hex SHA-256 of the DER public key.
    pub fingerprint: String,
}

/// Which request the user declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStage {
    Pin,
    PublicKeyDestination,
}

#[derive(Debug)]
pub enum IssueOutcome {
    Issued(IssuedCredential),
    Cancelled(CancelStage),
}

pub struct CredentialIssuer<'a> {
    config: &'a CustodyConfig,
    prompter: &'a dyn Prompter,
    session: &'a Session,
}

impl<'a> CredentialIssuer<'a> {
    pub fn new(config: &'a CustodyConfig, prompter: &'a dyn Prompter, session: &'a Session) -> Self {
        Self {
            config,
            prompter,
            session,
        }
    }

    /// Run the interactive issuance for one arrival event.
    ///
    /// Failures are reported through the prompter before being returned.
    pub async fn handle_arrival(&self, volume: &VolumeHandle) -> Result<IssueOutcome> {
        let permit = self.session.begin(FlowKind::Issuance)?;
        info!(flow_id = %permit.id(), volume = %volume, "Starting credential issuance");

        let result = self.run(volume).await;
        if let Err(e) = &result {
            notify_error(self.prompter, e);
        }
        result
    }

    async fn run(&self, volume: &VolumeHandle) -> Result<IssueOutcome> {
        self.prompter
            .notify(Notice::Info(format!("Removable volume detected at {volume}")));

        let pin = match self.prompt_for_pin().await {
            Some(pin) => pin,
            None => {
                self.prompter
                    .notify(Notice::Info("Key generation cancelled by user.".into()));
                return Ok(IssueOutcome::Cancelled(CancelStage::Pin));
            }
        };

        self.prompter.notify(Notice::Info(format!(
            "Generating {}-bit RSA key pair...",
            self.config.key_bits
        )));
        let key_pair = generate_off_runtime(self.config.key_bits).await?;

        let destination = match self
            .prompter
            .request_public_key_destination(self.config.public_key_path.as_deref())
            .await
        {
            Prompt::Provided(path) => path,
            Prompt::Cancelled => {
                self.prompter
                    .notify(Notice::Warning("Public key was not saved. Aborting.".into()));
                return Ok(IssueOutcome::Cancelled(CancelStage::PublicKeyDestination));
            }
        };

        let issued = self.issue(volume, &pin, &key_pair, &destination).await?;
        Ok(IssueOutcome::Issued(issued))
    }

    /// Ask until a correctly formatted PIN arrives; `None` on cancel.
    async fn prompt_for_pin(&self) -> Option<Pin> {
        let length = self.config.pin_length;
        loop {
            let candidate = match self.prompter.request_pin(PinPurpose::Issue { length }).await {
                Prompt::Provided(pin) => pin,
                Prompt::Cancelled => return None,
            };
            match kdf::validate_format(candidate.as_str(), length) {
                Ok(()) => return Some(candidate),
                Err(e) => notify_error(self.prompter, &e),
            }
        }
    }

    /// Persist a generated identity: public half locally first, then the
    /// wrapped private half onto `volume`.
    pub async fn issue(
        &self,
        volume: &VolumeHandle,
        pin: &Pin,
        key_pair: &KeyPair,
        public_key_path: &Path,
    ) -> Result<IssuedCredential> {
        kdf::validate_format(pin.as_str(), self.config.pin_length)?;

        let public_pem = key_pair.export_public()?;
        let certificate = match &self.config.certificate {
            Some(cert) => Some((
                cert.path.clone(),
                certificate::self_signed(key_pair, &cert.subject)?,
            )),
            None => None,
        };

        tokio::fs::write(public_key_path, public_pem.as_bytes()).await?;
        self.prompter.notify(Notice::Info(format!(
            "Public key saved to: {}",
            public_key_path.display()
        )));

        let certificate_path = match certificate {
            Some((path, pem)) => {
                tokio::fs::write(&path, pem.as_bytes()).await?;
                self.prompter.notify(Notice::Info(format!(
                    "Certificate saved to: {}",
                    path.display()
                )));
                Some(path)
            }
            None => None,
        };

        let wrapped = {
            let private = key_pair.export_private()?;
            wrap::wrap(private.as_bytes(), pin)
        };

        let wrapped_key_path = volume.file(&self.config.wrapped_key_file);
        if tokio::fs::try_exists(&wrapped_key_path).await.unwrap_or(false) {
            warn!(path = %wrapped_key_path.display(), "Replacing existing wrapped key on volume");
        }
        tokio::fs::write(&wrapped_key_path, wrapped.to_bytes())
            .await
            .map_err(|e| CustodyError::Wrap(format!("{}: {e}", wrapped_key_path.display())))?;
        self.prompter.notify(Notice::Info(format!(
            "Encrypted private key saved to volume: {}",
            wrapped_key_path.display()
        )));

        let fingerprint = keys::fingerprint(key_pair.public_key())?;
        info!(
            volume = %volume,
            fingerprint = %fingerprint,
            bits = key_pair.modulus_bits(),
            "Credential issued"
        );

        Ok(IssuedCredential {
            volume: volume.clone(),
            public_key_path: public_key_path.to_path_buf(),
            certificate_path,
            wrapped_key_path,
            fingerprint,
        })
    }
}

/// RSA generation can take seconds at 4096 bits.
pub async fn generate_off_runtime(bits: usize) -> Result<KeyPair> {
    tokio::task::spawn_blocking(move || KeyPair::generate(bits))
        .await
        .map_err(|e| CustodyError::Generation(format!("key generation task failed: {e}")))?
}
