//! Device identity from a provisioned X.509 certificate.

use std::{fs, io::ErrorKind, path::Path};

use tracing::debug;
use x509_parser::pem::parse_x509_pem;

use crate::error::{IotCoreError, Result};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Returns the subject common name of the PEM certificate at `cert_path`.
///
/// # Errors
/// - `CertNotFound` if the file does not exist
/// - `CertParse` if the file holds no PEM block, the block is not a
///   certificate, or the certificate cannot be decoded
pub fn device_id_from_certificate(cert_path: impl AsRef<Path>) -> Result<String> {
    let path = cert_path.as_ref();
    let data = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => IotCoreError::CertNotFound(path.to_path_buf()),
        _ => IotCoreError::Io(e),
    })?;

    let (_, pem) = parse_x509_pem(&data)
        .map_err(|e| IotCoreError::CertParse(format!("{}: no PEM block: {e}", path.display())))?;
    if pem.label != CERTIFICATE_LABEL {
        return Err(IotCoreError::CertParse(format!(
            "{}: expected {CERTIFICATE_LABEL} block, found {}",
            path.display(),
            pem.label
        )));
    }

    let cert = pem
        .parse_x509()
        .map_err(|e| IotCoreError::CertParse(format!("{}: {e}", path.display())))?;

    let device_id = cert
        .subject()
        .iter_common_name()
        .last()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            IotCoreError::CertParse(format!("{}: subject has no common name", path.display()))
        })?;

    debug!("Derived device id {device_id:?} from {}", path.display());
    Ok(device_id)
}
