use thiserror::Error;

#[derive(Error, Debug)]
pub enum CustodyError {
    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error("Failed to wrap private key: {0}")]
    Wrap(String),

    #[error("Failed to unwrap private key: {0}")]
    Unwrap(String),

    #[error("PIN must be exactly {expected} digits")]
    InvalidPinFormat { expected: usize },

    /// Wrong PIN and a corrupted key file look identical at this point.
    #[error("Decryption or key load failed: {0}")]
    Signing(String),

    #[error("Signed artifact is {len} bytes, shorter than the {expected}-byte signature")]
    MalformedArtifact { len: usize, expected: usize },

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid public key: {0}")]
    PublicKey(String),

    #[error("Certificate generation failed: {0}")]
    Certificate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another credential flow is already in progress")]
    FlowBusy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CustodyError {
    /// Stable short code logged next to the user-facing message.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Generation(_) => "generation_error",
            Self::Wrap(_) => "wrap_error",
            Self::Unwrap(_) => "unwrap_error",
            Self::InvalidPinFormat { .. } => "invalid_pin_format",
            Self::Signing(_) => "signing_error",
            Self::MalformedArtifact { .. } => "malformed_artifact",
            Self::VerificationFailed(_) => "verification_failed",
            Self::PublicKey(_) => "public_key_error",
            Self::Certificate(_) => "certificate_error",
            Self::Config(_) => "config_error",
            Self::FlowBusy => "flow_busy",
            Self::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CustodyError>;
