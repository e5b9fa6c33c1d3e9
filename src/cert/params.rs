use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{Any, Ia5StringRef, PrintableStringRef, SetOfVec, Utf8StringRef};
use der::flagset::FlagSet;
use der::{Tag, Tagged};
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

use super::extensions::ToAndFromX509Extension;
pub use crate::cert::extensions::ExtendedKeyUsageOption;
pub use crate::cert::extensions::KeyUsages;
use crate::error::{PkiError, Result};

/// Years a certificate issued by this crate stays valid.
pub const VALIDITY_YEARS: i32 = 10;

/// The unsigned attributes of a certificate-to-be.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `dns_names` - DNS names for the Subject Alternative Name extension.
/// * `validity` - The validity window.
/// * `serial_number` - Big-endian, positive serial number.
/// * `subject_key_id` - Overrides the identifier derived from the subject public key.
/// * `key_usage` - Key usage flags.
/// * `usages` - Extended key usage options.
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `basic_constraints_valid` - Whether a Basic Constraints extension is written at all.
/// * `extensions` - Additional X.509 extensions.
#[derive(Clone, Debug, Builder)]
pub struct CertificateRequest {
    pub subject: DistinguishedName,
    #[builder(default)]
    pub dns_names: Vec<String>,
    #[builder(default = Validity::years_from_now(VALIDITY_YEARS))]
    pub validity: Validity,
    #[builder(default = time_derived_serial())]
    pub serial_number: Vec<u8>,
    pub subject_key_id: Option<Vec<u8>>,
    #[builder(default)]
    pub key_usage: FlagSet<KeyUsages>,
    #[builder(default)]
    pub usages: Vec<ExtendedKeyUsageOption>,
    #[builder(default)]
    pub is_ca: bool,
    #[builder(default)]
    pub basic_constraints_valid: bool,
    #[builder(default)]
    pub extensions: Vec<ExtensionParam>,
}

/// Extended key usages every certificate of this PKI carries.
pub const DEFAULT_USAGES: [ExtendedKeyUsageOption; 3] = [
    ExtendedKeyUsageOption::ClientAuth,
    ExtendedKeyUsageOption::ServerAuth,
    ExtendedKeyUsageOption::Any,
];

impl CertificateRequest {
    /// Template for a self-signed root CA with the given identity.
    pub fn root_ca(identity: &DistinguishedName) -> Self {
        CertificateRequest::builder()
            .subject(identity.clone())
            .key_usage(KeyUsages::DigitalSignature | KeyUsages::KeyCertSign)
            .usages(DEFAULT_USAGES.to_vec())
            .is_ca(true)
            .basic_constraints_valid(true)
            .build()
    }

    /// Template for a leaf certificate for `subject_name`.
    ///
    /// The organization fields are taken from `identity`, the common name and the
    /// only DNS name are `subject_name`. DNS syntax is the caller's business.
    pub fn leaf(subject_name: &str, identity: &DistinguishedName) -> Result<Self> {
        if subject_name.trim().is_empty() {
            return Err(PkiError::TemplateError(
                "subject name must not be empty".to_string(),
            ));
        }
        let subject = DistinguishedName {
            common_name: Some(subject_name.to_string()),
            ..identity.clone()
        };
        Ok(CertificateRequest::builder()
            .subject(subject)
            .dns_names(vec![subject_name.to_string()])
            .key_usage(FlagSet::from(KeyUsages::DigitalSignature))
            .usages(DEFAULT_USAGES.to_vec())
            .build())
    }

    /// Checks the fields every signed certificate needs.
    pub fn validate(&self) -> Result<()> {
        if self.serial_number.iter().all(|b| *b == 0) {
            return Err(PkiError::TemplateError(
                "serial number must be present and non-zero".to_string(),
            ));
        }
        if self.serial_number.len() > 20 {
            return Err(PkiError::TemplateError(
                "serial number must not exceed 20 octets".to_string(),
            ));
        }
        if self.validity.not_before > self.validity.not_after {
            return Err(PkiError::TemplateError(
                "not-before is later than not-after".to_string(),
            ));
        }
        if self.is_ca && !self.basic_constraints_valid {
            return Err(PkiError::TemplateError(
                "a CA template needs valid basic constraints".to_string(),
            ));
        }
        if self.dns_names.iter().any(|name| name.is_empty()) {
            return Err(PkiError::TemplateError(
                "DNS names must not be empty".to_string(),
            ));
        }
        if self.subject.is_empty() {
            return Err(PkiError::TemplateError(
                "subject name has no attributes".to_string(),
            ));
        }
        Ok(())
    }
}

/// A serial number derived from the current time in nanoseconds.
///
/// Encoded as a minimal positive DER INTEGER body. Two certificates issued within
/// the same nanosecond would collide; callers issuing in batches must deduplicate.
pub fn time_derived_serial() -> Vec<u8> {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos().max(1) as u128;
    positive_integer_bytes(&nanos.to_be_bytes())
}

fn positive_integer_bytes(be: &[u8]) -> Vec<u8> {
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
    let mut bytes = be[first..].to_vec();
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    bytes
}

/// Distinguished name parameters for building an X.509 certificate.
///
/// # Fields
/// * `common_name` - The common name (CN).
/// * `country` - The country (C).
/// * `state` - The state or province (ST).
/// * `locality` - The locality or city (L).
/// * `organization` - The organization (O).
/// * `organization_unit` - The organizational unit (OU).
#[derive(Clone, Debug, Builder, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub common_name: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub organization_unit: Option<String>,
}

impl DistinguishedName {
    fn attributes(&self) -> [(ObjectIdentifier, Option<&String>); 6] {
        use const_oid::db::rfc4519;
        [
            (rfc4519::C, self.country.as_ref()),
            (rfc4519::ST, self.state.as_ref()),
            (rfc4519::L, self.locality.as_ref()),
            (rfc4519::O, self.organization.as_ref()),
            (rfc4519::OU, self.organization_unit.as_ref()),
            (rfc4519::CN, self.common_name.as_ref()),
        ]
    }

    /// True when no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.attributes().iter().all(|(_, value)| value.is_none())
    }

    /// Converts the distinguished name to an X.509-compatible format.
    ///
    /// Unset attributes are left out. Country is a PrintableString, everything
    /// else a UTF8String.
    pub fn as_x509_name(&self) -> Result<x509_cert::name::DistinguishedName> {
        let mut rdns = Vec::new();
        for (oid, value) in self.attributes() {
            let Some(value) = value else { continue };
            let invalid = |e: der::Error| {
                PkiError::TemplateError(format!("invalid value {value:?} for {oid}: {e}"))
            };
            let value = if oid == const_oid::db::rfc4519::C {
                Any::encode_from(&PrintableStringRef::new(value).map_err(invalid)?)
            } else {
                Any::encode_from(&Utf8StringRef::new(value).map_err(invalid)?)
            }
            .map_err(invalid)?;

            let mut set = SetOfVec::new();
            set.insert_ordered(AttributeTypeAndValue { oid, value })
                .map_err(invalid)?;
            rdns.push(RelativeDistinguishedName::from(set));
        }
        Ok(RdnSequence(rdns))
    }

    /// Creates a `DistinguishedName` from an X.509-compatible format.
    ///
    /// Attributes this type does not model, and values that are not text, are skipped.
    pub fn from_x509_name(x509dn: &x509_cert::name::DistinguishedName) -> Self {
        use const_oid::db::rfc4519;
        let mut dn = DistinguishedName::default();
        for rdn in x509dn.0.iter() {
            for attr in rdn.0.iter() {
                let Some(value) = attribute_text(&attr.value) else {
                    continue;
                };
                let slot = match attr.oid {
                    rfc4519::CN => &mut dn.common_name,
                    rfc4519::C => &mut dn.country,
                    rfc4519::ST => &mut dn.state,
                    rfc4519::L => &mut dn.locality,
                    rfc4519::O => &mut dn.organization,
                    rfc4519::OU => &mut dn.organization_unit,
                    _ => continue,
                };
                *slot = Some(value);
            }
        }
        dn
    }
}

fn attribute_text(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String => value
            .decode_as::<Utf8StringRef<'_>>()
            .ok()
            .map(|s| s.as_str().to_string()),
        Tag::PrintableString => value
            .decode_as::<PrintableStringRef<'_>>()
            .ok()
            .map(|s| s.as_str().to_string()),
        Tag::Ia5String => value
            .decode_as::<Ia5StringRef<'_>>()
            .ok()
            .map(|s| s.as_str().to_string()),
        _ => None,
    }
}

/// Certificate validity period.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// A validity period starting now and ending on the same calendar day and
    /// time `years` later. February 29 maps to February 28.
    pub fn years_from_now(years: i32) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            not_before: now,
            not_after: add_years(now, years),
        }
    }
}

fn add_years(at: OffsetDateTime, years: i32) -> OffsetDateTime {
    let year = at.year() + years;
    at.replace_year(year)
        .or_else(|_| at.replace_day(28).and_then(|d| d.replace_year(year)))
        .unwrap_or(at)
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: E, critical: bool) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        E::from_x509_extension_value(&self.value)
    }
}
