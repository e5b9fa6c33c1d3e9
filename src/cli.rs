use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{ArgGroup, Parser, ValueEnum};
use regex::Regex;
use tracing::{debug, info};

use smallca::cert::params::DistinguishedName;
use smallca::error::Result;
use smallca::issuer::{CertificateAuthority, IssuedCertificate};
use smallca::key::{KeyAlgorithm, SUPPORTED_RSA_BITS};
use smallca::source::{FileKeySource, PromptKeySource};

const CA_CERT_FILE: &str = "ca.crt";
const SAVE_KEY_WARNING: &str = "Save the key, you'll need it to create a certificate";

const DNS_NAME: &str = r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.?$";

#[derive(Parser, Debug)]
#[command(name = "smallca", version)]
#[command(about = "Create a root CA, or a certificate signed by it", long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["init", "create"])))]
pub struct Cli {
    /// Initialize a new PKI
    #[arg(long)]
    pub init: bool,

    /// Create a new certificate (and sign it)
    #[arg(long, requires = "domain")]
    pub create: bool,

    /// Domain to create a certificate for
    #[arg(long, requires = "create", conflicts_with = "init", value_parser = parse_domain)]
    pub domain: Option<String>,

    /// Key algorithm for the new key pair
    #[arg(long, value_enum, default_value_t = KeyType::Rsa)]
    pub key_type: KeyType,

    /// RSA modulus size in bits
    #[arg(long, default_value_t = 2048, value_parser = parse_bits)]
    pub bits: usize,

    /// Directory issued files are written to
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// CA certificate (default: <out-dir>/ca.crt)
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// CA private key file; read from stdin when absent
    #[arg(long)]
    pub ca_key: Option<PathBuf>,

    /// Organization (O) of issued certificates
    #[arg(long, default_value = "Jean Canard cult.")]
    pub organization: String,

    /// Country (C) of issued certificates
    #[arg(long, default_value = "CA")]
    pub country: String,

    /// Province or state (ST) of issued certificates
    #[arg(long, default_value = "Quebec")]
    pub province: String,

    /// Locality (L) of issued certificates
    #[arg(long, default_value = "Montreal")]
    pub locality: String,

    /// Common name of the root CA
    #[arg(long, default_value = "ca.chown.me")]
    pub ca_name: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KeyType {
    Rsa,
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl Cli {
    pub fn key_algorithm(&self) -> KeyAlgorithm {
        match self.key_type {
            KeyType::Rsa => KeyAlgorithm::Rsa { bits: self.bits },
            KeyType::EcdsaP256 => KeyAlgorithm::EcdsaP256,
            KeyType::EcdsaP384 => KeyAlgorithm::EcdsaP384,
            KeyType::Ed25519 => KeyAlgorithm::Ed25519,
        }
    }

    pub fn ca_identity(&self) -> DistinguishedName {
        DistinguishedName::builder()
            .common_name(self.ca_name.clone())
            .organization(self.organization.clone())
            .country(self.country.clone())
            .state(self.province.clone())
            .locality(self.locality.clone())
            .build()
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.ca_cert
            .clone()
            .unwrap_or_else(|| self.out_dir.join(CA_CERT_FILE))
    }
}

fn parse_domain(value: &str) -> std::result::Result<String, String> {
    let pattern = Regex::new(DNS_NAME).map_err(|e| e.to_string())?;
    if value.len() > 253 || !pattern.is_match(value) {
        return Err(format!("{value:?} is not a valid DNS name"));
    }
    Ok(value.to_string())
}

fn parse_bits(value: &str) -> std::result::Result<usize, String> {
    let bits: usize = value.parse().map_err(|e| format!("{e}"))?;
    if !SUPPORTED_RSA_BITS.contains(&bits) {
        return Err(format!("expected one of {SUPPORTED_RSA_BITS:?}"));
    }
    Ok(bits)
}

pub fn run(cli: &Cli) -> Result<()> {
    match &cli.domain {
        Some(domain) if cli.create => create_certificate(cli, domain),
        _ => create_ca(cli, &mut io::stdout().lock()),
    }
}

/// The key is shown before `ca.crt` is written, so a certificate never exists
/// without its key having reached the operator.
fn create_ca(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let ca = CertificateAuthority::init(&cli.ca_identity(), cli.key_algorithm())?;
    let key_pem = ca.key.to_pem()?;
    let cert_pem = ca.cert.to_pem()?;

    writeln!(out, "{SAVE_KEY_WARNING}")?;
    write!(out, "{key_pem}")?;
    writeln!(out, "{SAVE_KEY_WARNING}")?;
    out.flush()?;

    let cert_path = cli.ca_cert_path();
    fs::write(&cert_path, cert_pem)?;
    info!(path = %cert_path.display(), "wrote CA certificate");
    Ok(())
}

fn create_certificate(cli: &Cli, domain: &str) -> Result<()> {
    let cert_path = cli.ca_cert_path();
    debug!(path = %cert_path.display(), "reading CA certificate");
    let cert_pem = fs::read_to_string(&cert_path)?;

    let ca = match &cli.ca_key {
        Some(path) => CertificateAuthority::load(&cert_pem, &mut FileKeySource::new(path))?,
        None => CertificateAuthority::load(&cert_pem, &mut PromptKeySource::stdio())?,
    };

    let issued = ca.issue_leaf(domain, cli.key_algorithm())?;
    persist(&cli.out_dir, domain, &issued)
}

/// Writes `<name>.key` and `<name>.crt`. Either both end up on disk or neither.
fn persist(dir: &Path, name: &str, issued: &IssuedCertificate) -> Result<()> {
    let key_pem = issued.key_pem()?;
    let cert_pem = issued.certificate_pem()?;

    let key_path = dir.join(format!("{name}.key"));
    let cert_path = dir.join(format!("{name}.crt"));

    fs::write(&key_path, key_pem)?;
    if let Err(err) = fs::write(&cert_path, cert_pem) {
        let _ = fs::remove_file(&key_path);
        return Err(err.into());
    }
    info!(
        key = %key_path.display(),
        certificate = %cert_path.display(),
        "wrote certificate"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use smallca::cert::Certificate;
    use smallca::key::KeyPair;
    use smallca::verify::verify_chain;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("smallca").chain(args.iter().copied()))
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("smallca-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mode_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_modes_are_exclusive() {
        assert!(parse(&["--init", "--create", "--domain", "example.org"]).is_err());
    }

    #[test]
    fn test_init_forbids_domain() {
        assert!(parse(&["--init", "--domain", "example.org"]).is_err());
    }

    #[test]
    fn test_create_requires_domain() {
        assert!(parse(&["--create"]).is_err());
    }

    #[test]
    fn test_create_with_domain() {
        let cli = parse(&["--create", "--domain", "example.org"]).unwrap();
        assert!(cli.create);
        assert_eq!(cli.domain.as_deref(), Some("example.org"));
        assert_eq!(cli.key_algorithm(), KeyAlgorithm::Rsa { bits: 2048 });
        assert_eq!(cli.ca_cert_path(), PathBuf::from("./ca.crt"));
    }

    #[test]
    fn test_domain_syntax_is_checked() {
        for bad in ["-example.org", "exa mple.org", "example..org", "ex_ample.org"] {
            assert!(parse(&["--create", "--domain", bad]).is_err(), "{bad}");
        }
        let long_label = "a".repeat(64);
        assert!(parse(&["--create", "--domain", &long_label]).is_err());
    }

    #[test]
    fn test_weak_rsa_bits_rejected() {
        assert!(parse(&["--init", "--bits", "1024"]).is_err());
        let cli = parse(&["--init", "--bits", "4096"]).unwrap();
        assert_eq!(cli.key_algorithm(), KeyAlgorithm::Rsa { bits: 4096 });
    }

    #[test]
    fn test_identity_defaults() {
        let cli = parse(&["--init", "--key-type", "ed25519"]).unwrap();
        let identity = cli.ca_identity();
        assert_eq!(identity.common_name.as_deref(), Some("ca.chown.me"));
        assert_eq!(identity.organization.as_deref(), Some("Jean Canard cult."));
        assert_eq!(identity.state.as_deref(), Some("Quebec"));
        assert_eq!(cli.key_algorithm(), KeyAlgorithm::Ed25519);
    }

    #[test]
    fn test_create_flow_writes_verified_files() {
        let dir = scratch_dir("create");
        let ca = CertificateAuthority::init(
            &DistinguishedName::builder()
                .common_name("ca.test".to_string())
                .build(),
            KeyAlgorithm::EcdsaP256,
        )
        .unwrap();
        fs::write(dir.join("ca.crt"), ca.cert.to_pem().unwrap()).unwrap();
        fs::write(dir.join("ca.key"), ca.key.to_pem().unwrap()).unwrap();

        let out_dir = dir.to_str().unwrap();
        let ca_key = dir.join("ca.key");
        let cli = parse(&[
            "--create",
            "--domain",
            "example.org",
            "--key-type",
            "ecdsa-p256",
            "--out-dir",
            out_dir,
            "--ca-key",
            ca_key.to_str().unwrap(),
        ])
        .unwrap();
        run(&cli).unwrap();

        let cert_pem = fs::read_to_string(dir.join("example.org.crt")).unwrap();
        let key_pem = fs::read_to_string(dir.join("example.org.key")).unwrap();
        let cert = Certificate::from_pem(&cert_pem).unwrap();
        verify_chain(&cert.to_der().unwrap(), &ca.cert).unwrap();
        assert_eq!(
            KeyPair::from_pem(&key_pem).unwrap().public_key(),
            cert.public_key().unwrap()
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_create_with_unparsable_ca_writes_nothing() {
        let dir = scratch_dir("broken-ca");
        fs::write(dir.join("ca.crt"), "not a certificate").unwrap();
        let cli = parse(&[
            "--create",
            "--domain",
            "example.org",
            "--out-dir",
            dir.to_str().unwrap(),
            "--ca-key",
            "/nonexistent/ca.key",
        ])
        .unwrap();
        assert!(run(&cli).is_err());
        assert!(!dir.join("example.org.key").exists());
        assert!(!dir.join("example.org.crt").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn test_init_prints_key_then_writes_certificate() {
        let dir = scratch_dir("init");
        let cli = parse(&["--init", "--key-type", "ecdsa-p256", "--out-dir", dir.to_str().unwrap()])
            .unwrap();
        let mut out = Vec::new();
        create_ca(&cli, &mut out).unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches(SAVE_KEY_WARNING).count(), 2);
        let block_start = printed.find("-----BEGIN").unwrap();
        let block_end = printed.rfind(SAVE_KEY_WARNING).unwrap();
        let key = KeyPair::from_pem(&printed[block_start..block_end]).unwrap();
        let cert = Certificate::from_pem(&fs::read_to_string(dir.join("ca.crt")).unwrap()).unwrap();
        assert_eq!(cert.public_key().unwrap(), key.public_key());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_init_writes_nothing_when_key_cannot_be_shown() {
        let dir = scratch_dir("init-closed");
        let cli = parse(&["--init", "--key-type", "ed25519", "--out-dir", dir.to_str().unwrap()])
            .unwrap();
        let err = create_ca(&cli, &mut ClosedPipe).unwrap_err();
        assert!(matches!(err, smallca::error::PkiError::Io(_)));
        assert!(!dir.join("ca.crt").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_persist_removes_key_when_certificate_write_fails() {
        let dir = scratch_dir("persist");
        let ca = CertificateAuthority::init(
            &DistinguishedName::builder()
                .common_name("ca.test".to_string())
                .build(),
            KeyAlgorithm::Ed25519,
        )
        .unwrap();
        let issued = ca.issue_leaf("example.org", KeyAlgorithm::Ed25519).unwrap();
        // A directory where the certificate should go makes the second write fail.
        fs::create_dir_all(dir.join("example.org.crt")).unwrap();

        assert!(persist(&dir, "example.org", &issued).is_err());
        assert!(!dir.join("example.org.key").exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
