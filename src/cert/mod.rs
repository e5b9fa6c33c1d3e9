pub mod extensions;
pub mod params;

use der::{Decode, Encode, EncodePem};
use extensions::{
    BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption, FlagSet, KeyUsage, KeyUsages,
    SubjectAltName, SubjectKeyIdentifier, ToAndFromX509Extension,
};
use params::{CertificateRequest, DistinguishedName, Validity};
use time::OffsetDateTime;
use tracing::debug;
use x509_cert::certificate::CertificateInner;
use x509_cert::name::Name;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{PkiError, Result};
use crate::issuer::Issuer;
use crate::key::{KeyPair, PublicKey};
use crate::pem_utils::pem_to_der_labelled;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Represents the supported signature algorithms for certificates.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA encryption (PKCS#1 v1.5).
    Sha256WithRSA,
    /// SHA-256 with ECDSA.
    Sha256WithECDSA,
    /// SHA-384 with ECDSA.
    Sha384WithECDSA,
    /// Pure Ed25519.
    Ed25519,
}

impl From<SignatureAlgorithm> for AlgorithmIdentifierOwned {
    /// RSA carries explicit NULL parameters (RFC 4055), the others none.
    fn from(value: SignatureAlgorithm) -> Self {
        match value {
            SignatureAlgorithm::Sha256WithRSA => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(der::asn1::Any::null()),
            },
            SignatureAlgorithm::Sha256WithECDSA => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            },
            SignatureAlgorithm::Sha384WithECDSA => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_384,
                parameters: None,
            },
            SignatureAlgorithm::Ed25519 => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc8410::ID_ED_25519,
                parameters: None,
            },
        }
    }
}

impl TryFrom<&AlgorithmIdentifierOwned> for SignatureAlgorithm {
    type Error = PkiError;

    fn try_from(value: &AlgorithmIdentifierOwned) -> Result<Self> {
        match value.oid {
            const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION => {
                Ok(SignatureAlgorithm::Sha256WithRSA)
            }
            const_oid::db::rfc5912::ECDSA_WITH_SHA_256 => Ok(SignatureAlgorithm::Sha256WithECDSA),
            const_oid::db::rfc5912::ECDSA_WITH_SHA_384 => Ok(SignatureAlgorithm::Sha384WithECDSA),
            const_oid::db::rfc8410::ID_ED_25519 => Ok(SignatureAlgorithm::Ed25519),
            oid => Err(PkiError::ParseFailure(format!(
                "certificate: unsupported signature algorithm {oid}"
            ))),
        }
    }
}

/// Represents an X.509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    /// Parses a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertificateInner::from_der(der)
            .map_err(|e| PkiError::ParseFailure(format!("certificate: {e}")))?;
        Ok(Self { inner })
    }

    /// Parses a PEM `CERTIFICATE` block.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let der = pem_to_der_labelled(pem_str, CERTIFICATE_LABEL)?;
        Self::from_der(&der)
    }

    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    /// Creates a new self-signed certificate.
    ///
    /// The issuer is the request's subject and the signature is made with `key`,
    /// whose public half becomes the embedded public key.
    pub fn new_self_signed(request: &CertificateRequest, key: &KeyPair) -> Result<Self> {
        let self_issuer = SelfIssuer {
            name: request.subject.as_x509_name()?,
            key,
        };
        self_issuer.issue(request, &key.public_key())
    }

    pub fn subject_name(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn issuer_name(&self) -> &Name {
        &self.inner.tbs_certificate.issuer
    }

    pub fn subject(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(self.subject_name())
    }

    pub fn issuer(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(self.issuer_name())
    }

    /// True when issuer and subject are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.subject_name() == self.issuer_name()
    }

    /// Big-endian serial number bytes.
    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    pub fn validity(&self) -> Validity {
        let validity = &self.inner.tbs_certificate.validity;
        Validity {
            not_before: OffsetDateTime::from(validity.not_before.to_system_time()),
            not_after: OffsetDateTime::from(validity.not_after.to_system_time()),
        }
    }

    /// The embedded subject public key.
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(&self.inner.tbs_certificate.subject_public_key_info)
    }

    pub fn signature_algorithm(&self) -> Result<SignatureAlgorithm> {
        SignatureAlgorithm::try_from(&self.inner.signature_algorithm)
    }

    /// DER encoding of the to-be-signed part, the bytes the signature covers.
    pub fn tbs_der(&self) -> Result<Vec<u8>> {
        self.inner
            .tbs_certificate
            .to_der()
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    /// Finds and decodes the extension `E`, if present.
    pub fn extension<E: ToAndFromX509Extension>(&self) -> Result<Option<E>> {
        let Some(extensions) = &self.inner.tbs_certificate.extensions else {
            return Ok(None);
        };
        extensions
            .iter()
            .find(|ext| ext.extn_id == E::OID)
            .map(|ext| E::from_x509_extension_value(ext.extn_value.as_bytes()))
            .transpose()
    }

    pub fn dns_names(&self) -> Result<Vec<String>> {
        Ok(self
            .extension::<SubjectAltName>()?
            .map(|san| san.names)
            .unwrap_or_default())
    }

    /// True when basic constraints are present and mark the certificate as a CA.
    pub fn is_ca(&self) -> Result<bool> {
        Ok(self
            .extension::<BasicConstraints>()?
            .is_some_and(|bc| bc.is_ca))
    }

    pub fn key_usage(&self) -> Result<Option<FlagSet<KeyUsages>>> {
        Ok(self.extension::<KeyUsage>()?.map(|ku| ku.0))
    }

    pub fn extended_key_usage(&self) -> Result<Vec<ExtendedKeyUsageOption>> {
        Ok(self
            .extension::<ExtendedKeyUsage>()?
            .map(|eku| eku.usage)
            .unwrap_or_default())
    }

    pub fn subject_key_id(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.extension::<SubjectKeyIdentifier>()?.map(|ski| ski.0))
    }

    pub fn authority_key_id(&self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .extension::<extensions::AuthorityKeyIdentifier>()?
            .map(|aki| aki.key_identifier))
    }
}

// Helper struct for self-signed certificates
struct SelfIssuer<'a> {
    name: Name,
    key: &'a KeyPair,
}

impl Issuer for SelfIssuer<'_> {
    fn issuer_name(&self) -> Result<Name> {
        debug!(issuer = %self.name, "self-signing");
        Ok(self.name.clone())
    }

    fn signing_key(&self) -> &KeyPair {
        self.key
    }

    fn authority_key_id(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
