use crate::error::{PkiError, Result};

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
///
/// Lines are wrapped at 64 columns and end with LF.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(
        &pem,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// Convert a PEM‑encoded string to its label and DER‑encoded bytes.
///
/// Only the first block of the input is considered.
pub fn pem_to_der(pem_str: &str) -> Result<(String, Vec<u8>)> {
    let pem = pem::parse(pem_str)?;
    if pem.contents().is_empty() {
        return Err(PkiError::ParseFailure(format!(
            "PEM block: empty {} block",
            pem.tag()
        )));
    }
    Ok((pem.tag().to_string(), pem.contents().to_vec()))
}

/// Convert a PEM‑encoded string to DER, requiring the given label.
pub fn pem_to_der_labelled(pem_str: &str, label: &str) -> Result<Vec<u8>> {
    let (tag, der) = pem_to_der(pem_str)?;
    if tag != label {
        return Err(PkiError::ParseFailure(format!(
            "PEM block: expected {label}, got {tag}"
        )));
    }
    Ok(der)
}
