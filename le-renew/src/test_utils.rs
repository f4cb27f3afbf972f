use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use fs_err as fs;
use tracing_subscriber::{layer::SubscriberExt, Registry};

use crate::{BufferLayer, LogBuffer};

/// Marker the fake `openssl` looks for to report an expiring certificate.
pub(crate) const EXPIRING: &str = "EXPIRING";

/// Writes an executable `/bin/sh` script into `dir`.
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A stand-in for `openssl x509 -checkend N -noout -in FILE`.
///
/// Exits 1 when FILE contains [`EXPIRING`], 0 otherwise.
pub(crate) fn fake_openssl(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "openssl",
        &format!(
            r#"[ "$1" = x509 ] && [ "$2" = -checkend ] || exit 2
if grep -q {EXPIRING} "$6"; then
    echo "Certificate will expire"
    exit 1
fi
echo "Certificate will not expire""#
        ),
    )
}

/// A stand-in for acme-tiny that prints a certificate named after the CSR.
pub(crate) fn fake_issuer(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "acme-tiny",
        r#"[ "$1" = --account-key ] && [ "$3" = --csr ] && [ "$5" = --acme-dir ] || exit 2
echo "Signing certificate..." >&2
echo "-----BEGIN CERTIFICATE-----"
echo "issued for $(basename "$4" .csr)"
echo "-----END CERTIFICATE-----""#,
    )
}

pub(crate) fn buffered_subscriber(buffer: &LogBuffer) -> impl tracing::Subscriber + Send + Sync {
    Registry::default().with(BufferLayer::new(buffer.clone()))
}
