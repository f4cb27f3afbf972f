use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::{error::ErrorKind, CommandFactory, Parser};
use le_renew::{
    load_settings, notify, AcmeTiny, BufferLayer, LogBuffer, Renewer, RenewerConfig, RootCert,
    Settings,
};
use tracing::{debug, error};

/// Check Let's Encrypt certificates and renew those which are about to expire
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Certificate directory
    #[arg(long, alias = "cert_path")]
    cert_path: PathBuf,
    /// Path to acme-tiny script
    #[arg(long, alias = "acme_tiny_path")]
    acme_tiny_path: PathBuf,
    /// Path to acme-tiny account key
    #[arg(long, alias = "acme_account_key")]
    acme_account_key: PathBuf,
    /// Path to csr files directory
    #[arg(long, alias = "csr_path")]
    csr_path: PathBuf,
    /// Path to ACME challenge directory
    #[arg(long, alias = "acme_challenge")]
    acme_challenge: PathBuf,
    /// Path to Let's Encrypt root certificate
    #[arg(long, alias = "le_root_cert")]
    le_root_cert: PathBuf,
    /// Max expiration time (in seconds) to renew
    #[arg(long, alias = "max_ttl", default_value_t = 86400)]
    max_ttl: u64,
    /// Path to the settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Renew all certificates regardless of their expiry
    #[arg(long)]
    force: bool,
}

impl Args {
    fn validate(&self) -> Result<(), String> {
        let dirs = [
            (&self.cert_path, "cert path does not exist"),
            (&self.csr_path, "csr path does not exist"),
            (&self.acme_challenge, "acme challenge directory does not exist"),
        ];
        let files = [
            (&self.acme_tiny_path, "acme-tiny is not found"),
            (&self.acme_account_key, "acme account key is not found"),
            (&self.le_root_cert, "root certificate is not found"),
        ];
        for (dir, msg) in dirs {
            if !dir.is_dir() {
                return Err(format!("{msg}: {}", dir.display()));
            }
        }
        for (file, msg) in files {
            if !file.is_file() {
                return Err(format!("{msg}: {}", file.display()));
            }
        }
        Ok(())
    }
}

fn init_tracing(settings: &Settings, buffer: &LogBuffer) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let mail_level = settings.mail.level_filter()?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .with(BufferLayer::new(buffer.clone()).with_filter(mail_level))
        .try_init()
        .context("failed to install tracing subscriber")
}

fn build_renewer(args: &Args, settings: &Settings) -> Result<Renewer> {
    let root_cert = RootCert::load(&args.le_root_cert)?;
    let config = RenewerConfig::builder()
        .cert_dir(args.cert_path.clone())
        .csr_dir(args.csr_path.clone())
        .max_ttl(Duration::from_secs(args.max_ttl))
        .force(args.force)
        .maybe_renewed_hook(settings.renewed_hook.clone())
        .hook_timeout(settings.hook_timeout)
        .maybe_backup_dir(settings.backup_dir.clone())
        .build();
    let issuer = AcmeTiny::builder()
        .program(args.acme_tiny_path.clone())
        .account_key(args.acme_account_key.clone())
        .challenge_dir(args.acme_challenge.clone())
        .cert_dir(args.cert_path.clone())
        .timeout(settings.issuer.timeout)
        .build();
    Ok(Renewer::new(
        config,
        settings.expiry.checker(),
        issuer,
        root_cert,
    ))
}

async fn renew(args: &Args, settings: &Settings) -> Result<bool> {
    let renewer = build_renewer(args, settings)?;
    let report = renewer.run_once().await?;
    Ok(!report.has_failures())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let args = Args::parse();
    if let Err(msg) = args.validate() {
        Args::command().error(ErrorKind::ValueValidation, msg).exit();
    }

    let settings = match load_settings(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: failed to load settings: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    let buffer = LogBuffer::new();
    if let Err(err) = init_tracing(&settings, &buffer) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    let code = match renew(&args, &settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("renewal run failed: {err:#}");
            ExitCode::FAILURE
        }
    };

    match notify::flush(&buffer, &settings.mail, &settings.mail.mailer()).await {
        Ok(true) => debug!("report sent"),
        Ok(false) => debug!("nothing to report"),
        Err(err) => error!("{err:#}"),
    }
    code
}
