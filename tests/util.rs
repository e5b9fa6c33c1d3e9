use smallca::cert::params::DistinguishedName;
use smallca::issuer::CertificateAuthority;
use smallca::key::KeyAlgorithm;

pub fn ca_identity() -> DistinguishedName {
    DistinguishedName::builder()
        .common_name("ca.chown.me".to_string())
        .organization("Jean Canard cult.".to_string())
        .country("CA".to_string())
        .state("Quebec".to_string())
        .locality("Montreal".to_string())
        .build()
}

pub fn generate_ca(algorithm: KeyAlgorithm) -> CertificateAuthority {
    CertificateAuthority::init(&ca_identity(), algorithm).unwrap()
}
