/// Optional self-signed X.509 certificate binding the public key to a name.
///
/// Independent of the wrap/sign path: nothing reads the certificate back.
use std::str::FromStr;
use std::time::Duration;

use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey};
use serde::Deserialize;
use sha2::Sha256;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::EncodePem;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

use crate::crypto::keys::KeyPair;
use crate::error::{CustodyError, Result};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Subject fields for the self-signed certificate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CertificateSubject {
    pub country: String,
    pub organization: String,
    pub common_name: String,
    pub validity_days: u32,
}

impl Default for CertificateSubject {
    fn default() -> Self {
        Self {
            country: "PL".to_string(),
            organization: "Test Organization".to_string(),
            common_name: "User A".to_string(),
            validity_days: 365,
        }
    }
}

impl CertificateSubject {
    /// RFC 4514 string, most specific attribute first.
    pub fn distinguished_name(&self) -> String {
        format!(
            "CN={},O={},C={}",
            escape_rdn_value(&self.common_name),
            escape_rdn_value(&self.organization),
            escape_rdn_value(&self.country)
        )
    }
}

fn escape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Random positive 16-byte serial.
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::new(&bytes).map_err(|e| CustodyError::Certificate(e.to_string()))
}

/// Build and sign an end-entity certificate (CA=false) for `key_pair`,
/// returned as PEM.
pub fn self_signed(key_pair: &KeyPair, subject: &CertificateSubject) -> Result<String> {
    let name = Name::from_str(&subject.distinguished_name())
        .map_err(|e| CustodyError::Certificate(format!("invalid subject: {e}")))?;
    let spki = SubjectPublicKeyInfoOwned::from_key(key_pair.public_key().clone())
        .map_err(|e| CustodyError::Certificate(e.to_string()))?;
    let validity =
        Validity::from_now(Duration::from_secs(u64::from(subject.validity_days) * SECONDS_PER_DAY))
            .map_err(|e| CustodyError::Certificate(e.to_string()))?;

    let signer = SigningKey::<Sha256>::new(key_pair.private_key().clone());
    let profile = Profile::Leaf {
        issuer: name.clone(),
        enable_key_agreement: false,
        enable_key_encipherment: false,
    };

    let builder = CertificateBuilder::new(profile, random_serial()?, validity, name, spki, &signer)
        .map_err(|e| CustodyError::Certificate(e.to_string()))?;
    let certificate = builder
        .build::<Signature>()
        .map_err(|e| CustodyError::Certificate(e.to_string()))?;

    certificate
        .to_pem(LineEnding::LF)
        .map_err(|e| CustodyError::Certificate(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::test_key_pair;
    use x509_cert::der::DecodePem;
    use x509_cert::Certificate;

    #[test]
    fn test_distinguished_name() {
        let subject = CertificateSubject::default();
        assert_eq!(subject.distinguished_name(), "CN=User A,O=Test Organization,C=PL");
    }

    #[test]
    fn test_distinguished_name_escapes() {
        let subject = CertificateSubject {
            organization: "Acme, Inc".into(),
            ..Default::default()
        };
        assert!(subject.distinguished_name().contains("O=Acme\\, Inc"));
    }

    #[test]
    fn test_self_signed_parses_back() {
        let kp = test_key_pair();
        let pem = self_signed(kp, &CertificateSubject::default()).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));

        let cert = Certificate::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(cert.tbs_certificate.subject, cert.tbs_certificate.issuer);
        let subject = cert.tbs_certificate.subject.to_string();
        assert!(subject.contains("CN=User A"));
        assert!(subject.contains("O=Test Organization"));
    }
}
