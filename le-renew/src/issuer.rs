use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use fs_err as fs;
use tokio::process::Command;
use tracing::debug;

use crate::process::{output_with_timeout, warn_stderr};

/// Trusted root certificate appended to every issued certificate.
#[derive(Debug, Clone)]
pub struct RootCert {
    pem: String,
}

impl RootCert {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let pem = fs::read_to_string(path.as_ref()).context("failed to read root certificate")?;
        Ok(Self { pem })
    }

    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self { pem: pem.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.pem
    }
}

/// An acme-tiny compatible issuer executable.
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(PathBuf, into))]
pub struct AcmeTiny {
    program: PathBuf,
    account_key: PathBuf,
    challenge_dir: PathBuf,
    /// Working directory of the issuer process.
    cert_dir: PathBuf,
    timeout: Duration,
}

impl AcmeTiny {
    /// Request a certificate for `csr` and return it bundled with `root_cert`.
    pub async fn issue(&self, csr: &Path, root_cert: &RootCert) -> Result<String> {
        debug!("requesting certificate for {}", csr.display());
        let mut command = Command::new(&self.program);
        command
            .arg("--account-key")
            .arg(&self.account_key)
            .arg("--csr")
            .arg(csr)
            .arg("--acme-dir")
            .arg(&self.challenge_dir)
            .current_dir(&self.cert_dir);
        let output = output_with_timeout(command, self.timeout)
            .await
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        warn_stderr("acme-tiny", &output.stderr);
        if !output.status.success() {
            bail!("issuer failed with {}", output.status);
        }
        let issued = String::from_utf8(output.stdout).context("issuer output is not utf-8")?;
        if issued.trim().is_empty() {
            bail!("issuer returned no certificate");
        }
        Ok(make_bundle(&issued, root_cert.as_str()))
    }
}

fn make_bundle(issued: &str, root_pem: &str) -> String {
    let mut bundle = String::with_capacity(issued.len() + root_pem.len() + 1);
    bundle.push_str(issued);
    if !issued.ends_with('\n') {
        bundle.push('\n');
    }
    bundle.push_str(root_pem);
    bundle
}
