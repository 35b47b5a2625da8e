//! Fixtures shared by the unit tests: throwaway keys, certificates and devices.

use std::{
    fs,
    path::{Path, PathBuf},
};

use p256::{
    pkcs8::{DecodePrivateKey, LineEnding},
    SecretKey,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tempfile::TempDir;

use crate::device::Device;

/// Temporary directory holding a freshly generated device key.
///
/// Everything is removed when the value is dropped.
pub(crate) struct TestDir {
    dir: TempDir,
    key_path: PathBuf,
}

impl TestDir {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let key_path = write_pkcs8_key(dir.path(), "device.pem");
        Self { dir, key_path }
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub(crate) fn device(&self, project_id: &str) -> Device {
        Device::new(
            project_id,
            "us-central1",
            "myregistry",
            "foo",
            self.key_path.clone(),
        )
    }
}

/// Writes a new P-256 key in PKCS#8 PEM form.
pub(crate) fn write_pkcs8_key(dir: &Path, name: &str) -> PathBuf {
    let key_pair = KeyPair::generate().expect("Failed to generate key pair");
    let path = dir.join(name);
    fs::write(&path, key_pair.serialize_pem()).expect("Failed to write key");
    path
}

/// Writes a new P-256 key in SEC1 (`EC PRIVATE KEY`) PEM form, the format
/// produced by `openssl ecparam -genkey`.
pub(crate) fn write_sec1_key(dir: &Path, name: &str) -> PathBuf {
    let key_pair = KeyPair::generate().expect("Failed to generate key pair");
    let secret = SecretKey::from_pkcs8_pem(&key_pair.serialize_pem()).expect("Failed to parse key");
    let pem = secret.to_sec1_pem(LineEnding::LF).expect("Failed to encode key");
    let path = dir.join(name);
    fs::write(&path, pem.as_bytes()).expect("Failed to write key");
    path
}

/// Returns a self-signed certificate whose subject CN is `common_name`.
pub(crate) fn self_signed_cert(common_name: &str) -> String {
    let mut params =
        CertificateParams::new(vec!["localhost".to_string()]).expect("Failed to create params");
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    params.distinguished_name = name;

    let key_pair = KeyPair::generate().expect("Failed to generate key pair");
    params
        .self_signed(&key_pair)
        .expect("Failed to self-sign certificate")
        .pem()
}
