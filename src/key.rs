//! Key generation, PEM import/export and raw signing.

use std::fmt;

use der::{Decode, Encode};
use ecdsa::{SigningKey, VerifyingKey};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use p256::NistP256;
use p384::NistP384;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand_core::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use tracing::debug;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::SignatureAlgorithm;
use crate::error::{PkiError, Result};
use crate::pem_utils::{der_to_pem, pem_to_der};

/// RSA modulus sizes accepted by [`KeyPair::generate`].
pub const SUPPORTED_RSA_BITS: [usize; 3] = [2048, 3072, 4096];

const RSA_PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";
const PKCS8_PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Algorithm and strength of a key pair to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA with the given modulus length in bits.
    Rsa { bits: usize },
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        KeyAlgorithm::Rsa { bits: 2048 }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa { bits } => write!(f, "RSA-{bits}"),
            KeyAlgorithm::EcdsaP256 => f.write_str("ECDSA P-256"),
            KeyAlgorithm::EcdsaP384 => f.write_str("ECDSA P-384"),
            KeyAlgorithm::Ed25519 => f.write_str("Ed25519"),
        }
    }
}

/// Supported key types for certificate operations.
#[derive(Clone, Debug)]
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: SigningKey<NistP256>,
    },
    EcdsaP384 {
        signing_key: SigningKey<NistP384>,
    },
    Ed25519 {
        signing_key: Ed25519SigningKey,
    },
}

impl KeyPair {
    /// Generate a fresh key pair from the operating system's random source.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        debug!(%algorithm, "generating key pair");
        match algorithm {
            KeyAlgorithm::Rsa { bits } => Self::generate_rsa(bits),
            KeyAlgorithm::EcdsaP256 => Ok(Self::generate_ecdsa_p256()),
            KeyAlgorithm::EcdsaP384 => Ok(Self::generate_ecdsa_p384()),
            KeyAlgorithm::Ed25519 => Ok(Self::generate_ed25519()),
        }
    }

    /// Generate an RSA key pair with the specified number of bits.
    ///
    /// Sizes outside [`SUPPORTED_RSA_BITS`] are rejected.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        if !SUPPORTED_RSA_BITS.contains(&bits) {
            return Err(PkiError::KeyGenerationFailure(format!(
                "unsupported RSA modulus size {bits}, expected one of {SUPPORTED_RSA_BITS:?}"
            )));
        }
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| PkiError::KeyGenerationFailure(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate an ECDSA P-256 key pair.
    pub fn generate_ecdsa_p256() -> Self {
        KeyPair::EcdsaP256 {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Generate an ECDSA P-384 key pair.
    pub fn generate_ecdsa_p384() -> Self {
        KeyPair::EcdsaP384 {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Generate an Ed25519 key pair.
    pub fn generate_ed25519() -> Self {
        KeyPair::Ed25519 {
            signing_key: Ed25519SigningKey::generate(&mut OsRng),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyPair::Rsa { public, .. } => KeyAlgorithm::Rsa {
                bits: public.size() * 8,
            },
            KeyPair::EcdsaP256 { .. } => KeyAlgorithm::EcdsaP256,
            KeyPair::EcdsaP384 { .. } => KeyAlgorithm::EcdsaP384,
            KeyPair::Ed25519 { .. } => KeyAlgorithm::Ed25519,
        }
    }

    /// Returns the public half of the key pair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_key_pair(self)
    }

    /// The algorithm certificates signed by this key are signed with.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            KeyPair::Rsa { .. } => SignatureAlgorithm::Sha256WithRSA,
            KeyPair::EcdsaP256 { .. } => SignatureAlgorithm::Sha256WithECDSA,
            KeyPair::EcdsaP384 { .. } => SignatureAlgorithm::Sha384WithECDSA,
            KeyPair::Ed25519 { .. } => SignatureAlgorithm::Ed25519,
        }
    }

    /// Signs `data` with the algorithm reported by [`KeyPair::signature_algorithm`].
    ///
    /// ECDSA signatures are DER-encoded as X.509 requires.
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signing_failure = |e: rsa::signature::Error| PkiError::SigningFailure(e.to_string());
        match self {
            KeyPair::Rsa { private, .. } => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new((**private).clone());
                let signature = signing_key.try_sign(data).map_err(signing_failure)?;
                Ok(signature.to_vec())
            }
            KeyPair::EcdsaP256 { signing_key } => {
                let signature: ecdsa::Signature<NistP256> =
                    signing_key.try_sign(data).map_err(signing_failure)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::EcdsaP384 { signing_key } => {
                let signature: ecdsa::Signature<NistP384> =
                    signing_key.try_sign(data).map_err(signing_failure)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::Ed25519 { signing_key } => {
                let signature = signing_key.try_sign(data).map_err(signing_failure)?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }

    /// Encodes the private key as PEM.
    ///
    /// RSA keys use PKCS#1 (`RSA PRIVATE KEY`), every other algorithm PKCS#8
    /// (`PRIVATE KEY`).
    pub fn to_pem(&self) -> Result<String> {
        let encoding_error = |e: pkcs8::Error| PkiError::EncodingError(e.to_string());
        let pem = match self {
            KeyPair::Rsa { private, .. } => {
                let der = private
                    .to_pkcs1_der()
                    .map_err(|e| PkiError::EncodingError(e.to_string()))?;
                der_to_pem(der.as_bytes(), RSA_PRIVATE_KEY_LABEL)
            }
            KeyPair::EcdsaP256 { signing_key } => {
                let der = signing_key.to_pkcs8_der().map_err(encoding_error)?;
                der_to_pem(der.as_bytes(), PKCS8_PRIVATE_KEY_LABEL)
            }
            KeyPair::EcdsaP384 { signing_key } => {
                let der = signing_key.to_pkcs8_der().map_err(encoding_error)?;
                der_to_pem(der.as_bytes(), PKCS8_PRIVATE_KEY_LABEL)
            }
            KeyPair::Ed25519 { signing_key } => {
                // PKCS#8 v1: OpenSSL rejects the v2 form with the embedded public key.
                let keypair = ed25519_dalek::pkcs8::KeypairBytes {
                    secret_key: signing_key.to_bytes(),
                    public_key: None,
                };
                let der = keypair.to_pkcs8_der().map_err(encoding_error)?;
                der_to_pem(der.as_bytes(), PKCS8_PRIVATE_KEY_LABEL)
            }
        };
        Ok(pem)
    }

    /// Parses a PEM private key as produced by [`KeyPair::to_pem`].
    ///
    /// Accepts PKCS#1 RSA keys and PKCS#8 RSA, P-256, P-384 and Ed25519 keys.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let (label, der) = pem_to_der(pem_str)?;
        match label.as_str() {
            RSA_PRIVATE_KEY_LABEL => {
                let private = RsaPrivateKey::from_pkcs1_der(&der)
                    .map_err(|e| PkiError::ParseFailure(format!("RSA private key: {e}")))?;
                Ok(Self::from_rsa(private))
            }
            PKCS8_PRIVATE_KEY_LABEL => Self::from_pkcs8_der(&der),
            other => Err(PkiError::ParseFailure(format!(
                "private key: unsupported PEM label {other}"
            ))),
        }
    }

    /// Parses a DER-encoded PKCS#8 private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let parse_failure = |e: pkcs8::Error| PkiError::ParseFailure(format!("private key: {e}"));
        let info = pkcs8::PrivateKeyInfo::try_from(der).map_err(parse_failure)?;
        match info.algorithm.oid {
            const_oid::db::rfc5912::RSA_ENCRYPTION => {
                let private = RsaPrivateKey::from_pkcs8_der(der).map_err(parse_failure)?;
                Ok(Self::from_rsa(private))
            }
            const_oid::db::rfc5912::ID_EC_PUBLIC_KEY => {
                if let Ok(signing_key) = SigningKey::<NistP256>::from_pkcs8_der(der) {
                    return Ok(KeyPair::EcdsaP256 { signing_key });
                }
                let signing_key =
                    SigningKey::<NistP384>::from_pkcs8_der(der).map_err(parse_failure)?;
                Ok(KeyPair::EcdsaP384 { signing_key })
            }
            const_oid::db::rfc8410::ID_ED_25519 => {
                let signing_key = Ed25519SigningKey::from_pkcs8_der(der).map_err(parse_failure)?;
                Ok(KeyPair::Ed25519 { signing_key })
            }
            oid => Err(PkiError::ParseFailure(format!(
                "private key: unsupported algorithm {oid}"
            ))),
        }
    }

    fn from_rsa(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        KeyPair::Rsa {
            private: Box::new(private),
            public,
        }
    }
}

/// The public half of a [`KeyPair`], as embedded in a certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(VerifyingKey<NistP256>),
    EcdsaP384(VerifyingKey<NistP384>),
    Ed25519(Ed25519VerifyingKey),
}

impl PublicKey {
    pub fn from_key_pair(key_pair: &KeyPair) -> Self {
        match key_pair {
            KeyPair::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            KeyPair::EcdsaP256 { signing_key } => PublicKey::EcdsaP256(*signing_key.verifying_key()),
            KeyPair::EcdsaP384 { signing_key } => PublicKey::EcdsaP384(*signing_key.verifying_key()),
            KeyPair::Ed25519 { signing_key } => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    /// Encodes the key as a DER SubjectPublicKeyInfo.
    pub fn to_public_key_der(&self) -> Result<Vec<u8>> {
        let document = match self {
            PublicKey::Rsa(key) => key.to_public_key_der(),
            PublicKey::EcdsaP256(key) => key.to_public_key_der(),
            PublicKey::EcdsaP384(key) => key.to_public_key_der(),
            PublicKey::Ed25519(key) => key.to_public_key_der(),
        }
        .map_err(|e| PkiError::EncodingError(format!("public key: {e}")))?;
        Ok(document.as_bytes().to_vec())
    }

    /// Converts the key to the x509-cert SubjectPublicKeyInfo structure.
    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let der = self.to_public_key_der()?;
        SubjectPublicKeyInfoOwned::from_der(&der)
            .map_err(|e| PkiError::EncodingError(format!("public key: {e}")))
    }

    /// Reads the key out of a certificate's SubjectPublicKeyInfo.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let der = spki.to_der()?;
        let parse_failure = |e: pkcs8::spki::Error| PkiError::ParseFailure(format!("public key: {e}"));
        match spki.algorithm.oid {
            const_oid::db::rfc5912::RSA_ENCRYPTION => RsaPublicKey::from_public_key_der(&der)
                .map(PublicKey::Rsa)
                .map_err(parse_failure),
            const_oid::db::rfc5912::ID_EC_PUBLIC_KEY => {
                if let Ok(key) = VerifyingKey::<NistP256>::from_public_key_der(&der) {
                    return Ok(PublicKey::EcdsaP256(key));
                }
                VerifyingKey::<NistP384>::from_public_key_der(&der)
                    .map(PublicKey::EcdsaP384)
                    .map_err(parse_failure)
            }
            const_oid::db::rfc8410::ID_ED_25519 => Ed25519VerifyingKey::from_public_key_der(&der)
                .map(PublicKey::Ed25519)
                .map_err(parse_failure),
            oid => Err(PkiError::ParseFailure(format!(
                "public key: unsupported algorithm {oid}"
            ))),
        }
    }

    /// SHA-1 over the subject public key bits (RFC 5280, section 4.2.1.2, method 1).
    pub fn key_identifier(&self) -> Result<Vec<u8>> {
        let spki = self.to_spki()?;
        let digest = <Sha1 as sha1::Digest>::digest(spki.subject_public_key.raw_bytes());
        Ok(digest.to_vec())
    }

    /// Checks `signature` over `message` with the given certificate signature algorithm.
    pub fn verify(
        &self,
        algorithm: &SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let rejected = |e: rsa::signature::Error| PkiError::VerificationFailure(e.to_string());
        match (self, algorithm) {
            (PublicKey::Rsa(key), SignatureAlgorithm::Sha256WithRSA) => {
                let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                let signature =
                    rsa::pkcs1v15::Signature::try_from(signature).map_err(rejected)?;
                verifying_key.verify(message, &signature).map_err(rejected)
            }
            (PublicKey::EcdsaP256(key), SignatureAlgorithm::Sha256WithECDSA) => {
                let signature =
                    ecdsa::Signature::<NistP256>::from_der(signature).map_err(rejected)?;
                key.verify(message, &signature).map_err(rejected)
            }
            (PublicKey::EcdsaP384(key), SignatureAlgorithm::Sha384WithECDSA) => {
                let signature =
                    ecdsa::Signature::<NistP384>::from_der(signature).map_err(rejected)?;
                key.verify(message, &signature).map_err(rejected)
            }
            (PublicKey::Ed25519(key), SignatureAlgorithm::Ed25519) => {
                let signature =
                    ed25519_dalek::Signature::from_slice(signature).map_err(rejected)?;
                key.verify(message, &signature).map_err(rejected)
            }
            (_, algorithm) => Err(PkiError::VerificationFailure(format!(
                "{algorithm:?} signature cannot be checked with a {} key",
                self.algorithm_name()
            ))),
        }
    }

    fn algorithm_name(&self) -> &'static str {
        match self {
            PublicKey::Rsa(_) => "RSA",
            PublicKey::EcdsaP256(_) => "P-256",
            PublicKey::EcdsaP384(_) => "P-384",
            PublicKey::Ed25519(_) => "Ed25519",
        }
    }
}
