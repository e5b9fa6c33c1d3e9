//! Chain verification for issued certificates.
//!
//! A leaf only counts as issued once [`verify_chain`] accepts it against the CA
//! certificate it was signed for.

use tracing::{debug, warn};

use crate::cert::Certificate;
use crate::cert::extensions::KeyUsages;
use crate::cert::SignatureAlgorithm;
use crate::error::{PkiError, Result};

/// Parses `leaf_der` and checks that it was signed by `ca`.
///
/// Malformed input is a `ParseFailure`; everything else that does not hold up is a
/// `VerificationFailure`. A self-signed root verifies against itself.
pub fn verify_chain(leaf_der: &[u8], ca: &Certificate) -> Result<()> {
    let leaf = Certificate::from_der(leaf_der)?;
    leaf.verify_signed_by(ca)
}

impl Certificate {
    /// Checks that `ca` may issue certificates and that its key produced this
    /// certificate's signature.
    pub fn verify_signed_by(&self, ca: &Certificate) -> Result<()> {
        let result = check_signed_by(self, ca);
        match &result {
            Ok(()) => debug!(subject = %self.subject_name(), "certificate verified"),
            Err(err) => warn!(subject = %self.subject_name(), error = %err, "certificate rejected"),
        }
        result
    }
}

fn check_signed_by(cert: &Certificate, ca: &Certificate) -> Result<()> {
    if !ca.is_ca()? {
        return Err(PkiError::VerificationFailure(
            "issuer certificate is not a CA".to_string(),
        ));
    }
    if let Some(key_usage) = ca.key_usage()? {
        if !key_usage.contains(KeyUsages::KeyCertSign) {
            return Err(PkiError::VerificationFailure(
                "issuer certificate may not sign certificates".to_string(),
            ));
        }
    }
    if cert.issuer_name() != ca.subject_name() {
        return Err(PkiError::VerificationFailure(format!(
            "issuer {} does not match CA subject {}",
            cert.issuer_name(),
            ca.subject_name()
        )));
    }
    if cert.inner.tbs_certificate.signature != cert.inner.signature_algorithm {
        return Err(PkiError::VerificationFailure(
            "inner and outer signature algorithms differ".to_string(),
        ));
    }

    let algorithm = SignatureAlgorithm::try_from(&cert.inner.signature_algorithm)
        .map_err(|e| PkiError::VerificationFailure(e.to_string()))?;
    let tbs_der = cert.tbs_der()?;
    ca.public_key()?
        .verify(&algorithm, &tbs_der, cert.inner.signature.raw_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::params::{CertificateRequest, DistinguishedName};
    use crate::issuer::CertificateAuthority;
    use crate::key::{KeyAlgorithm, KeyPair};

    fn identity(cn: &str) -> DistinguishedName {
        DistinguishedName::builder()
            .common_name(cn.to_string())
            .organization("Crab widgits SE".to_string())
            .build()
    }

    #[test]
    fn test_root_verifies_against_itself() {
        let ca = CertificateAuthority::init(&identity("myca.local"), KeyAlgorithm::Ed25519).unwrap();
        verify_chain(&ca.cert.to_der().unwrap(), &ca.cert).unwrap();
    }

    #[test]
    fn test_leaf_is_not_a_ca() {
        let ca = CertificateAuthority::init(&identity("myca.local"), KeyAlgorithm::EcdsaP256).unwrap();
        let issued = ca.issue_leaf("server.myca.local", KeyAlgorithm::EcdsaP256).unwrap();
        let other = ca.issue_leaf("other.myca.local", KeyAlgorithm::EcdsaP256).unwrap();
        let err = verify_chain(&other.certificate.to_der().unwrap(), &issued.certificate)
            .unwrap_err();
        assert!(matches!(err, PkiError::VerificationFailure(_)));
    }

    #[test]
    fn test_other_ca_rejects_leaf() {
        let ca = CertificateAuthority::init(&identity("myca.local"), KeyAlgorithm::EcdsaP256).unwrap();
        let other = CertificateAuthority::init(&identity("otherca.local"), KeyAlgorithm::EcdsaP256).unwrap();
        let issued = ca.issue_leaf("server.myca.local", KeyAlgorithm::EcdsaP256).unwrap();
        let err = verify_chain(&issued.certificate.to_der().unwrap(), &other.cert).unwrap_err();
        assert!(matches!(err, PkiError::VerificationFailure(_)));
    }

    #[test]
    fn test_same_name_different_key_is_rejected() {
        let ca = CertificateAuthority::init(&identity("myca.local"), KeyAlgorithm::EcdsaP256).unwrap();
        let twin = CertificateAuthority::init(&identity("myca.local"), KeyAlgorithm::EcdsaP256).unwrap();
        let issued = ca.issue_leaf("server.myca.local", KeyAlgorithm::EcdsaP256).unwrap();
        let err = verify_chain(&issued.certificate.to_der().unwrap(), &twin.cert).unwrap_err();
        assert!(matches!(err, PkiError::VerificationFailure(_)));
    }

    #[test]
    fn test_tampered_signature_is_rejected() {
        let ca = CertificateAuthority::init(&identity("myca.local"), KeyAlgorithm::EcdsaP256).unwrap();
        let request = CertificateRequest::leaf("server.myca.local", &identity("x")).unwrap();
        let leaf_key = KeyPair::generate_ed25519();
        let mut cert = ca.sign(&request, &leaf_key.public_key()).unwrap();
        let mut serial = cert.serial_number().to_vec();
        let last = serial.len() - 1;
        serial[last] ^= 1;
        cert.inner.tbs_certificate.serial_number =
            x509_cert::serial_number::SerialNumber::new(&serial).unwrap();
        assert!(cert.verify_signed_by(&ca.cert).is_err());
    }

    #[test]
    fn test_garbage_is_parse_failure() {
        let ca = CertificateAuthority::init(&identity("myca.local"), KeyAlgorithm::EcdsaP256).unwrap();
        let err = verify_chain(&[0x30, 0x82, 0x01], &ca.cert).unwrap_err();
        assert!(matches!(err, PkiError::ParseFailure(_)));
    }
}
