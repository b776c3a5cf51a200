pub mod config;
pub mod crypto;
pub mod error;
pub mod issuer;
pub mod media;
pub mod prompt;
pub mod session;
pub mod signer;
pub mod verifier;
