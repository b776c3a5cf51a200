/// Runtime configuration, optionally loaded from a TOML file.
///
/// ```toml
/// key_bits = 4096
/// poll_interval_ms = 1000
/// public_key_path = "/home/user/rsa_public_key.pem"
///
/// [certificate]
/// path = "/home/user/rsa_certificate.pem"
/// common_name = "User A"
///
/// [media]
/// mount_prefixes = ["/media", "/run/media"]
/// ```
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::crypto::certificate::CertificateSubject;
use crate::crypto::keys::DEFAULT_MODULUS_BITS;
use crate::crypto::sign::signature_len;
use crate::error::{CustodyError, Result};

pub const WRAPPED_KEY_FILE: &str = "private_encrypted.pem";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// RSA modulus size. Also fixes the trailing signature length.
    pub key_bits: usize,
    /// Number of digits required when issuing.
    pub pin_length: usize,
    /// PIN prompts allowed per unlock before the flow gives up.
    pub pin_attempts: u32,
    pub poll_interval_ms: u64,
    /// Well-known file name at the root of a volume.
    pub wrapped_key_file: String,
    /// Suggested destination offered when asking where to save the public key.
    pub public_key_path: Option<PathBuf>,
    pub certificate: Option<CertificateConfig>,
    pub media: MediaConfig,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_MODULUS_BITS,
            pin_length: 4,
            pin_attempts: 3,
            poll_interval_ms: 1000,
            wrapped_key_file: WRAPPED_KEY_FILE.to_string(),
            public_key_path: None,
            certificate: None,
            media: MediaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateConfig {
    /// Local destination of the PEM certificate.
    pub path: PathBuf,
    #[serde(flatten)]
    pub subject: CertificateSubject,
}

/// Where volumes are discovered.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub mount_table: PathBuf,
    /// Only mount points under these prefixes count as removable media.
    pub mount_prefixes: Vec<PathBuf>,
    /// If set, every subdirectory of this directory is a volume and the
    /// mount table is ignored.
    pub directory: Option<PathBuf>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            mount_table: PathBuf::from("/proc/self/mounts"),
            mount_prefixes: vec![
                PathBuf::from("/media"),
                PathBuf::from("/run/media"),
                PathBuf::from("/mnt"),
            ],
            directory: None,
        }
    }
}

impl CustodyConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CustodyError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CustodyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_bits < 1024 || self.key_bits % 8 != 0 {
            return Err(CustodyError::Config(format!(
                "key_bits must be a multiple of 8 and at least 1024, got {}",
                self.key_bits
            )));
        }
        if self.pin_length == 0 {
            return Err(CustodyError::Config("pin_length must be positive".into()));
        }
        if self.pin_attempts == 0 {
            return Err(CustodyError::Config("pin_attempts must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CustodyError::Config("poll_interval_ms must be positive".into()));
        }
        if self.wrapped_key_file.is_empty() || self.wrapped_key_file.contains(['/', '\\']) {
            return Err(CustodyError::Config(
                "wrapped_key_file must be a bare file name".into(),
            ));
        }
        Ok(())
    }

    /// Public key destination for issuance with nobody at the terminal.
    pub fn unattended_public_key_path(&self) -> Result<&Path> {
        self.public_key_path.as_deref().ok_or_else(|| {
            CustodyError::Config(
                "unattended issuance needs public_key_path (set it in the config or pass --public-key)"
                    .into(),
            )
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn signature_len(&self) -> usize {
        signature_len(self.key_bits)
    }
}
