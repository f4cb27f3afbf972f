use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use enum_dispatch::enum_dispatch;
use fs_err as fs;
use tokio::process::Command;
use tracing::debug;
use x509_parser::prelude::Pem;

use crate::process::{output_with_timeout, warn_stderr};

#[enum_dispatch]
#[allow(async_fn_in_trait)]
pub trait ExpiryCheck {
    /// Returns `true` if the certificate at `cert_file` expires within `max_ttl`.
    async fn needs_renewal(&self, cert_file: &Path, max_ttl: Duration) -> Result<bool>;
}

/// Decides whether a certificate is due for renewal.
#[derive(Debug, Clone)]
#[enum_dispatch(ExpiryCheck)]
pub enum ExpiryChecker {
    Openssl(OpensslChecker),
    Builtin(BuiltinChecker),
}

/// Runs `openssl x509 -checkend`.
#[derive(Debug, Clone)]
pub struct OpensslChecker {
    program: PathBuf,
    timeout: Duration,
}

impl OpensslChecker {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl ExpiryCheck for OpensslChecker {
    async fn needs_renewal(&self, cert_file: &Path, max_ttl: Duration) -> Result<bool> {
        let mut command = Command::new(&self.program);
        command
            .arg("x509")
            .arg("-checkend")
            .arg(max_ttl.as_secs().to_string())
            .arg("-noout")
            .arg("-in")
            .arg(cert_file);
        let output = output_with_timeout(command, self.timeout)
            .await
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        warn_stderr("openssl", &output.stderr);
        debug!(
            "openssl checkend for {}: {}",
            cert_file.display(),
            String::from_utf8_lossy(&output.stdout).trim()
        );
        if output.status.success() {
            return Ok(false);
        }
        match output.status.code() {
            Some(_) => Ok(true),
            None => bail!("openssl terminated by signal: {}", output.status),
        }
    }
}

/// Reads `notAfter` from the first PEM block of the certificate file.
#[derive(Debug, Clone, Default)]
pub struct BuiltinChecker;

impl ExpiryCheck for BuiltinChecker {
    async fn needs_renewal(&self, cert_file: &Path, max_ttl: Duration) -> Result<bool> {
        let cert_pem = fs::read_to_string(cert_file)?;
        expires_within(&cert_pem, max_ttl)
    }
}

fn expires_within(cert_pem: &str, max_ttl: Duration) -> Result<bool> {
    let pem = Pem::iter_from_buffer(cert_pem.as_bytes())
        .next()
        .transpose()
        .context("invalid pem")?
        .context("no certificate in pem")?;
    let cert = pem.parse_x509().context("invalid x509 certificate")?;
    let not_after = cert.validity().not_after.to_datetime();
    let now = time::OffsetDateTime::now_utc();
    debug!("will expire in {:?}", not_after - now);

    let window = time::Duration::try_from(max_ttl).ok();
    match window.and_then(|window| now.checked_add(window)) {
        Some(deadline) => Ok(not_after < deadline),
        // The window reaches past the last representable date.
        None => Ok(true),
    }
}
