use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use fs_err as fs;
use tracing::{debug, error, info, warn};

use crate::{
    process::{output_with_timeout, warn_stderr},
    AcmeTiny, ExpiryCheck, ExpiryChecker, RootCert,
};

const CERT_EXT: &str = "crt";
const CSR_EXT: &str = "csr";

#[derive(Clone, Debug, bon::Builder)]
#[builder(on(PathBuf, into))]
pub struct RenewerConfig {
    cert_dir: PathBuf,
    csr_dir: PathBuf,
    /// Renew certificates that expire within this window.
    max_ttl: Duration,
    /// Renew every certificate without checking its expiry.
    #[builder(default)]
    force: bool,
    renewed_hook: Option<String>,
    #[builder(default = Duration::from_secs(60))]
    hook_timeout: Duration,
    backup_dir: Option<PathBuf>,
}

/// A `<domain>.crt` file in the certificate directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertEntry {
    pub domain: String,
    pub cert_path: PathBuf,
}

impl CertEntry {
    pub fn csr_path(&self, csr_dir: &Path) -> PathBuf {
        csr_dir.join(format!("{}.{CSR_EXT}", self.domain))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    NotDue,
    Renewed,
    MissingCsr,
    Failed(String),
}

impl fmt::Display for RenewalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewalOutcome::NotDue => write!(f, "not due"),
            RenewalOutcome::Renewed => write!(f, "renewed"),
            RenewalOutcome::MissingCsr => write!(f, "missing csr"),
            RenewalOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Per-certificate outcomes of one pass, in processing order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<(String, RenewalOutcome)>,
}

impl RunReport {
    pub fn checked(&self) -> usize {
        self.outcomes.len()
    }

    pub fn renewed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Renewed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::MissingCsr))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn outcome(&self, domain: &str) -> Option<&RenewalOutcome> {
        self.outcomes
            .iter()
            .find(|(d, _)| d == domain)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&RenewalOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

pub struct Renewer {
    config: RenewerConfig,
    checker: ExpiryChecker,
    issuer: AcmeTiny,
    root_cert: RootCert,
}

impl Renewer {
    pub fn new(
        config: RenewerConfig,
        checker: ExpiryChecker,
        issuer: AcmeTiny,
        root_cert: RootCert,
    ) -> Self {
        Self {
            config,
            checker,
            issuer,
            root_cert,
        }
    }

    /// List the certificates in the certificate directory, sorted by file name.
    pub fn list_certs(&self) -> Result<Vec<CertEntry>> {
        list_certs(&self.config.cert_dir)
    }

    /// Check every certificate once and renew those that are due.
    ///
    /// Failures are confined to the certificate they happen on; only a failure
    /// to list the certificate directory aborts the pass.
    pub async fn run_once(&self) -> Result<RunReport> {
        let certs = self
            .list_certs()
            .context("failed to list certificates")?;
        let mut report = RunReport::default();
        for entry in certs {
            let outcome = self.process(&entry).await;
            report.outcomes.push((entry.domain, outcome));
        }
        info!(
            "checked {} certificates: {} renewed, {} skipped, {} failed",
            report.checked(),
            report.renewed(),
            report.skipped(),
            report.failed()
        );
        if report.renewed() > 0 {
            self.run_renewed_hook().await;
        }
        Ok(report)
    }

    async fn process(&self, entry: &CertEntry) -> RenewalOutcome {
        let domain = &entry.domain;
        let due = if self.config.force {
            true
        } else {
            match self
                .checker
                .needs_renewal(&entry.cert_path, self.config.max_ttl)
                .await
            {
                Ok(due) => due,
                Err(err) => {
                    error!("failed to check {domain}: {err:#}");
                    return RenewalOutcome::Failed(format!("{err:#}"));
                }
            }
        };
        if !due {
            debug!("certificate for {domain} is up to date");
            return RenewalOutcome::NotDue;
        }
        info!("certificate for {domain} needs renewal");
        match self.renew(entry).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("failed to renew certificate for {domain}: {err:#}");
                RenewalOutcome::Failed(format!("{err:#}"))
            }
        }
    }

    async fn renew(&self, entry: &CertEntry) -> Result<RenewalOutcome> {
        let csr_path = entry.csr_path(&self.config.csr_dir);
        if !csr_path.is_file() {
            warn!("CSR file not found for {}", entry.domain);
            return Ok(RenewalOutcome::MissingCsr);
        }
        let bundle = self
            .issuer
            .issue(&csr_path, &self.root_cert)
            .await
            .context("failed to issue certificate")?;
        self.store_cert(entry, &bundle)?;
        info!("renewed certificate for {}", entry.domain);
        Ok(RenewalOutcome::Renewed)
    }

    fn store_cert(&self, entry: &CertEntry, bundle: &str) -> Result<()> {
        if let Some(backup_dir) = &self.config.backup_dir {
            let backup_path = new_backup_dir(backup_dir)?.join(
                entry
                    .cert_path
                    .file_name()
                    .context("certificate path has no file name")?,
            );
            fs::copy(&entry.cert_path, &backup_path).context("failed to back up certificate")?;
            debug!("backed up {} to {}", entry.domain, backup_path.display());
        }
        safe_write::safe_write(&entry.cert_path, bundle).with_context(|| {
            format!("failed to write {}", entry.cert_path.display())
        })?;
        Ok(())
    }

    async fn run_renewed_hook(&self) {
        let Some(hook) = &self.config.renewed_hook else {
            return;
        };
        info!("running renewed hook");
        let mut command = tokio::process::Command::new("/bin/sh");
        command.arg("-c").arg(hook);
        match output_with_timeout(command, self.config.hook_timeout).await {
            Ok(output) => {
                warn_stderr("renewed hook", &output.stderr);
                if !output.status.success() {
                    error!("renewed hook failed with status: {}", output.status);
                }
            }
            Err(err) => {
                error!("failed to run renewed hook: {err:#}");
            }
        }
    }
}

pub fn list_certs(cert_dir: impl AsRef<Path>) -> Result<Vec<CertEntry>> {
    let mut certs = vec![];
    for entry in fs::read_dir(cert_dir.as_ref())? {
        let path = entry?.path();
        let is_cert = path.extension().is_some_and(|ext| ext == CERT_EXT);
        let domain = path.file_stem().and_then(|stem| stem.to_str());
        match domain {
            Some(domain) if is_cert && path.is_file() => certs.push(CertEntry {
                domain: domain.to_string(),
                cert_path: path.clone(),
            }),
            _ => debug!("skipping {}", path.display()),
        }
    }
    certs.sort_by(|a, b| a.cert_path.cmp(&b.cert_path));
    Ok(certs)
}

/// Creates `{backup_dir}/{ISO-8601 timestamp}`.
fn new_backup_dir(backup_dir: &Path) -> Result<PathBuf> {
    let timestamp = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Iso8601::DEFAULT)
        .context("failed to format timestamp")?;
    let path = backup_dir.join(timestamp);
    fs::create_dir_all(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests;
