//! # smallca - A Tiny Single-Tier PKI
//!
//! smallca creates a self-signed root certificate authority and issues leaf
//! certificates signed by it, built entirely with rustcrypto libraries. There is one
//! level of hierarchy: a root, and the leaves it signs.
//!
//! ## Supported Key Types
//!
//! - **RSA**: 2048 (default), 3072 and 4096-bit keys
//! - **ECDSA**: P-256 and P-384 curves
//! - **Ed25519**: Edwards curve digital signature algorithm
//!
//! ## Issuance
//!
//! Every issuance goes through the same steps: a fresh key pair is generated, a
//! template is built, the template is signed, and the result is verified against
//! the CA before anything is handed back. Certificates are valid for ten years and
//! carry a serial number derived from the current time.
//!
//! ### Creating a Root CA
//!
//! ```rust,no_run
//! use smallca::{
//!     cert::params::DistinguishedName,
//!     issuer::CertificateAuthority,
//!     key::KeyAlgorithm,
//! };
//!
//! # fn main() -> Result<(), smallca::error::PkiError> {
//! let identity = DistinguishedName::builder()
//!     .common_name("ca.example.com".to_string())
//!     .organization("Example Corp".to_string())
//!     .country("US".to_string())
//!     .build();
//!
//! let ca = CertificateAuthority::init(&identity, KeyAlgorithm::default())?;
//!
//! println!("{}", ca.cert.to_pem()?);
//! println!("{}", ca.key.to_pem()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Issuing a Leaf Certificate
//!
//! ```rust,no_run
//! use smallca::{issuer::CertificateAuthority, key::KeyAlgorithm, source::FileKeySource};
//!
//! # fn main() -> Result<(), smallca::error::PkiError> {
//! let cert_pem = std::fs::read_to_string("ca.crt")?;
//! let ca = CertificateAuthority::load(&cert_pem, &mut FileKeySource::new("ca.key"))?;
//!
//! let issued = ca.issue_leaf("example.org", KeyAlgorithm::default())?;
//! std::fs::write("example.org.key", issued.key_pem()?)?;
//! std::fs::write("example.org.crt", issued.certificate_pem()?)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Signing Without the Checked Flow
//!
//! [`issuer::CertificateAuthority::sign`] signs any template. It does not check that
//! the CA key belongs to the CA certificate; [`verify::verify_chain`] does.
//!
//! ```rust,no_run
//! use smallca::{
//!     cert::params::{CertificateRequest, DistinguishedName},
//!     issuer::CertificateAuthority,
//!     key::{KeyAlgorithm, KeyPair},
//!     verify::verify_chain,
//! };
//!
//! # fn main() -> Result<(), smallca::error::PkiError> {
//! let identity = DistinguishedName::builder()
//!     .common_name("ca.example.com".to_string())
//!     .build();
//! let ca = CertificateAuthority::init(&identity, KeyAlgorithm::EcdsaP256)?;
//!
//! let request = CertificateRequest::leaf("www.example.com", &identity)?;
//! let key = KeyPair::generate_ecdsa_p256();
//! let cert = ca.sign(&request, &key.public_key())?;
//! verify_chain(&cert.to_der()?, &ca.cert)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Each failure names the stage it happened in:
//!
//! ```rust
//! use smallca::{cert::Certificate, error::PkiError};
//!
//! match Certificate::from_pem("invalid pem data") {
//!     Ok(_) => println!("Certificate parsed"),
//!     Err(PkiError::ParseFailure(msg)) => println!("Failed to parse {}", msg),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`key`]: Key generation, PEM import/export, signing
//! - [`cert`]: Certificates, templates and extensions
//! - [`issuer`]: Signing templates and the CA issuance flows
//! - [`verify`]: Checking a certificate against its CA
//! - [`source`]: Where the CA private key is read from
//! - [`error`]: Error types
//! - [`tbs_certificate`]: Low-level certificate structure

pub mod cert;
pub mod error;
pub mod issuer;
pub mod key;
pub mod pem_utils;
pub mod source;
pub mod tbs_certificate;
pub mod verify;
