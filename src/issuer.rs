use std::collections::BTreeSet;

use der::Encode;
use tracing::{debug, info, warn};
use x509_cert::certificate::CertificateInner;
use x509_cert::name::Name;

use crate::cert::Certificate;
use crate::cert::extensions::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAltName,
    SubjectKeyIdentifier,
};
use crate::cert::params::{CertificateRequest, DistinguishedName, ExtensionParam};
use crate::error::{PkiError, Result};
use crate::key::{KeyAlgorithm, KeyPair, PublicKey};
use crate::source::KeySource;
use crate::tbs_certificate::TbsCertificate;
use crate::verify::verify_chain;

/// Represents an entity capable of issuing certificates.
///
/// This trait provides methods to retrieve issuer details and issue certificates.
pub trait Issuer {
    /// Returns the name written as the issuer of issued certificates.
    fn issuer_name(&self) -> Result<Name>;

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Returns the key identifier for the Authority Key Identifier extension, if any.
    fn authority_key_id(&self) -> Result<Option<Vec<u8>>>;

    /// Signs a certificate for `subject_public_key` from the given template.
    ///
    /// The template is validated first. Whether the signing key belongs to the
    /// issuer's certificate is not checked here; see [`crate::verify`].
    fn issue(
        &self,
        request: &CertificateRequest,
        subject_public_key: &PublicKey,
    ) -> Result<Certificate> {
        request.validate()?;

        let signature_algorithm = self.signing_key().signature_algorithm();
        let subject_key_id = match &request.subject_key_id {
            Some(id) => id.clone(),
            None => subject_public_key.key_identifier()?,
        };

        let mut extensions: Vec<ExtensionParam> = Vec::new();
        if !request.key_usage.is_empty() {
            extensions.push(ExtensionParam::from_extension(
                KeyUsage(request.key_usage),
                true,
            )?);
        }
        if !request.usages.is_empty() {
            let extended_key_usage = ExtendedKeyUsage {
                usage: request.usages.clone(),
            };
            extensions.push(ExtensionParam::from_extension(extended_key_usage, false)?);
        }
        if request.basic_constraints_valid {
            let basic_constraints = BasicConstraints {
                is_ca: request.is_ca,
                max_path_length: None,
            };
            extensions.push(ExtensionParam::from_extension(basic_constraints, true)?);
        }
        extensions.push(ExtensionParam::from_extension(
            SubjectKeyIdentifier(subject_key_id),
            false,
        )?);
        if let Some(key_identifier) = self.authority_key_id()? {
            extensions.push(ExtensionParam::from_extension(
                AuthorityKeyIdentifier { key_identifier },
                false,
            )?);
        }
        if !request.dns_names.is_empty() {
            let san = SubjectAltName {
                names: request.dns_names.clone(),
            };
            extensions.push(ExtensionParam::from_extension(san, false)?);
        }

        let combined_extensions: Vec<ExtensionParam> = request
            .extensions
            .iter()
            .cloned()
            .chain(extensions)
            .collect();
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = combined_extensions.iter().find(|ext| !seen.insert(ext.oid)) {
            return Err(PkiError::TemplateError(format!(
                "extension {} appears more than once",
                duplicate.oid
            )));
        }

        let tbs_cert = TbsCertificate {
            serial_number: request.serial_number.clone(),
            signature_algorithm,
            issuer: self.issuer_name()?,
            validity: request.validity.clone(),
            subject: request.subject.clone(),
            subject_public_key: subject_public_key.clone(),
            extensions: combined_extensions,
        };

        let tbs_cert_inner = tbs_cert.to_tbs_certificate_inner()?;
        let tbs_der = tbs_cert_inner
            .to_der()
            .map_err(|e| PkiError::SigningFailure(format!("cannot encode template: {e}")))?;

        debug!(
            subject = %tbs_cert_inner.subject,
            issuer = %tbs_cert_inner.issuer,
            algorithm = ?signature_algorithm,
            "signing certificate"
        );
        let signature = self.signing_key().sign_data(&tbs_der)?;

        let cert_inner = CertificateInner {
            tbs_certificate: tbs_cert_inner,
            signature_algorithm: signature_algorithm.into(),
            signature: der::asn1::BitString::from_bytes(&signature)
                .map_err(|e| PkiError::SigningFailure(e.to_string()))?,
        };

        Ok(Certificate { inner: cert_inner })
    }
}

/// A CA certificate together with its private key.
///
/// The pair is taken on trust: a key that does not belong to the certificate yields
/// certificates that fail [`verify_chain`], which [`CertificateAuthority::issue_leaf`]
/// always runs.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    pub cert: Certificate,
    pub key: KeyPair,
}

/// A freshly issued certificate and the private key it was issued for.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub key: KeyPair,
}

impl IssuedCertificate {
    pub fn certificate_pem(&self) -> Result<String> {
        self.certificate.to_pem()
    }

    pub fn key_pem(&self) -> Result<String> {
        self.key.to_pem()
    }
}

impl CertificateAuthority {
    pub fn new(cert: Certificate, key: KeyPair) -> Self {
        Self { cert, key }
    }

    /// Creates a new root CA: generates a key, self-signs a root template for
    /// `identity` and confirms the result before handing it out.
    pub fn init(identity: &DistinguishedName, algorithm: KeyAlgorithm) -> Result<Self> {
        let request = CertificateRequest::root_ca(identity);
        request.validate()?;
        let key = KeyPair::generate(algorithm)?;
        let cert = Certificate::new_self_signed(&request, &key)?;

        if cert.public_key()? != key.public_key() {
            return Err(PkiError::VerificationFailure(
                "root certificate does not embed the generated public key".to_string(),
            ));
        }
        verify_chain(&cert.to_der()?, &cert)?;

        info!(subject = %cert.subject_name(), %algorithm, "created root CA");
        Ok(Self { cert, key })
    }

    /// Loads a CA from its PEM certificate and a key source.
    ///
    /// The certificate is parsed before the key is requested, so a broken
    /// certificate never prompts the operator.
    pub fn load(cert_pem: &str, key_source: &mut dyn KeySource) -> Result<Self> {
        let cert = Certificate::from_pem(cert_pem)?;
        debug!(subject = %cert.subject_name(), "loaded CA certificate");
        let key = KeyPair::from_pem(&key_source.read_key()?)?;
        Ok(Self { cert, key })
    }

    /// Signs `request` for `subject_public_key` with the CA key.
    ///
    /// No verification happens here; use [`CertificateAuthority::issue_leaf`] for
    /// the checked flow.
    pub fn sign(
        &self,
        request: &CertificateRequest,
        subject_public_key: &PublicKey,
    ) -> Result<Certificate> {
        self.issue(request, subject_public_key)
    }

    /// Issues a verified leaf certificate for `subject_name` with a fresh key.
    ///
    /// The leaf shares the organization fields of the CA subject. The certificate is
    /// only returned once it verifies against the CA certificate.
    pub fn issue_leaf(
        &self,
        subject_name: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<IssuedCertificate> {
        let identity = DistinguishedName {
            common_name: None,
            ..self.cert.subject()
        };
        let request = CertificateRequest::leaf(subject_name, &identity)?;
        request.validate()?;

        let key = KeyPair::generate(algorithm)?;
        let certificate = self.sign(&request, &key.public_key())?;

        if let Err(err) = verify_chain(&certificate.to_der()?, &self.cert) {
            warn!(subject = subject_name, error = %err, "discarding unverifiable certificate");
            return Err(err);
        }

        info!(subject = subject_name, %algorithm, "issued certificate");
        Ok(IssuedCertificate { certificate, key })
    }
}

impl Issuer for CertificateAuthority {
    fn issuer_name(&self) -> Result<Name> {
        // The name of the issuer is the subject of the certificate
        Ok(self.cert.subject_name().clone())
    }

    fn signing_key(&self) -> &KeyPair {
        &self.key
    }

    /// The CA's subject key identifier, or one derived from its public key when
    /// the certificate carries none.
    fn authority_key_id(&self) -> Result<Option<Vec<u8>>> {
        match self.cert.subject_key_id()? {
            Some(id) => Ok(Some(id)),
            None => Ok(Some(self.cert.public_key()?.key_identifier()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::params::ExtendedKeyUsageOption;

    struct CountingSource {
        key: String,
        reads: usize,
    }

    impl CountingSource {
        fn new(key: &str) -> Self {
            Self {
                key: key.to_string(),
                reads: 0,
            }
        }
    }

    impl KeySource for CountingSource {
        fn read_key(&mut self) -> Result<String> {
            self.reads += 1;
            Ok(self.key.clone())
        }
    }

    fn identity() -> DistinguishedName {
        DistinguishedName::builder()
            .common_name("ca.chown.me".to_string())
            .organization("Jean Canard cult.".to_string())
            .country("CA".to_string())
            .build()
    }

    #[test]
    fn test_leaf_inherits_ca_organization() {
        let ca = CertificateAuthority::init(&identity(), KeyAlgorithm::EcdsaP256).unwrap();
        let issued = ca.issue_leaf("crabs.example", KeyAlgorithm::Ed25519).unwrap();
        let subject = issued.certificate.subject();
        assert_eq!(subject.common_name.as_deref(), Some("crabs.example"));
        assert_eq!(subject.organization.as_deref(), Some("Jean Canard cult."));
        assert_eq!(subject.country.as_deref(), Some("CA"));
        assert_eq!(issued.key.algorithm(), KeyAlgorithm::Ed25519);
    }

    #[test]
    fn test_leaf_authority_key_id_matches_ca() {
        let ca = CertificateAuthority::init(&identity(), KeyAlgorithm::EcdsaP256).unwrap();
        let issued = ca.issue_leaf("crabs.example", KeyAlgorithm::EcdsaP256).unwrap();
        assert_eq!(
            issued.certificate.authority_key_id().unwrap(),
            ca.cert.subject_key_id().unwrap()
        );
        assert!(!issued.certificate.is_ca().unwrap());
        assert_eq!(
            issued.certificate.extended_key_usage().unwrap(),
            vec![
                ExtendedKeyUsageOption::ClientAuth,
                ExtendedKeyUsageOption::ServerAuth,
                ExtendedKeyUsageOption::Any,
            ]
        );
    }

    #[test]
    fn test_issue_leaf_rejects_empty_name() {
        let ca = CertificateAuthority::init(&identity(), KeyAlgorithm::EcdsaP256).unwrap();
        let err = ca.issue_leaf("", KeyAlgorithm::EcdsaP256).unwrap_err();
        assert!(matches!(err, PkiError::TemplateError(_)));
    }

    #[test]
    fn test_issue_leaf_with_wrong_key_fails_verification() {
        let ca = CertificateAuthority::init(&identity(), KeyAlgorithm::EcdsaP256).unwrap();
        let impostor = CertificateAuthority::new(ca.cert.clone(), KeyPair::generate_ecdsa_p256());
        let err = impostor
            .issue_leaf("crabs.example", KeyAlgorithm::EcdsaP256)
            .unwrap_err();
        assert!(matches!(err, PkiError::VerificationFailure(_)));
    }

    #[test]
    fn test_duplicate_extension_is_template_error() {
        let ca = CertificateAuthority::init(&identity(), KeyAlgorithm::EcdsaP256).unwrap();
        let mut request = CertificateRequest::leaf("crabs.example", &identity()).unwrap();
        request.extensions.push(
            ExtensionParam::from_extension(
                SubjectAltName {
                    names: vec!["other.example".to_string()],
                },
                false,
            )
            .unwrap(),
        );
        let key = KeyPair::generate_ecdsa_p256();
        let err = ca.sign(&request, &key.public_key()).unwrap_err();
        assert!(matches!(err, PkiError::TemplateError(_)));
    }

    #[test]
    fn test_load_parses_certificate_before_reading_key() {
        let mut source = CountingSource::new("never read");
        let err = CertificateAuthority::load("garbage", &mut source).unwrap_err();
        assert!(matches!(err, PkiError::ParseFailure(_)));
        assert_eq!(source.reads, 0);
    }

    #[test]
    fn test_load_round_trip() {
        let ca = CertificateAuthority::init(&identity(), KeyAlgorithm::EcdsaP384).unwrap();
        let mut source = CountingSource::new(&ca.key.to_pem().unwrap());
        let loaded = CertificateAuthority::load(&ca.cert.to_pem().unwrap(), &mut source).unwrap();
        assert_eq!(loaded.key.public_key(), ca.key.public_key());
        loaded
            .issue_leaf("crabs.example", KeyAlgorithm::EcdsaP256)
            .unwrap();
    }
}
