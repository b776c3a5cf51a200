/// Cryptographic building blocks: PIN derivation, key wrapping, RSA key
/// handling, detached signatures and the optional certificate.
pub mod certificate;
pub mod kdf;
pub mod keys;
pub mod sensitive;
pub mod sign;
pub mod wrap;
