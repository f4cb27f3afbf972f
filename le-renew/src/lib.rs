//! Renew Let's Encrypt certificates that are about to expire.
//!
//! This library drives an acme-tiny style issuer over a directory of
//! certificates. It does not speak ACME itself: expiry is checked with
//! `openssl x509 -checkend` (or in-process with `x509-parser`) and new
//! certificates are obtained by running the external issuer.
//!
//! # Features
//!
//! - Expiry check per certificate with a configurable renewal window
//! - Issuance through an external ACME client with bounded run time
//! - Atomic replacement of the certificate bundle, with optional backups
//! - A buffered report of every log event, mailed once at shutdown
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use le_renew::{AcmeTiny, ExpiryChecker, OpensslChecker, Renewer, RenewerConfig, RootCert};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RenewerConfig::builder()
//!         .cert_dir("/etc/ssl/le/certs")
//!         .csr_dir("/etc/ssl/le/csr")
//!         .max_ttl(Duration::from_secs(86400))
//!         .build();
//!     let issuer = AcmeTiny::builder()
//!         .program("/usr/local/bin/acme-tiny")
//!         .account_key("/etc/ssl/le/account.key")
//!         .challenge_dir("/var/www/challenges")
//!         .cert_dir("/etc/ssl/le/certs")
//!         .timeout(Duration::from_secs(120))
//!         .build();
//!     let checker = ExpiryChecker::from(OpensslChecker::new("openssl", Duration::from_secs(10)));
//!     let root_cert = RootCert::load("/etc/ssl/le/root.pem")?;
//!
//!     let report = Renewer::new(config, checker, issuer, root_cert).run_once().await?;
//!     println!("{} certificates renewed", report.renewed());
//!     Ok(())
//! }
//! ```

pub use expiry::{BuiltinChecker, ExpiryCheck, ExpiryChecker, OpensslChecker};
pub use issuer::{AcmeTiny, RootCert};
pub use log_buffer::{BufferLayer, LogBuffer};
pub use notify::{MailTransport, Mailer, MemoryMailer, Notification, SmtpMailer, SmtpSecurity};
pub use runner::{CertEntry, RenewalOutcome, Renewer, RenewerConfig, RunReport};
pub use settings::{load_settings, ExpiryBackend, MailSettings, Settings};

pub mod notify;
pub mod settings;

mod expiry;
mod issuer;
mod log_buffer;
mod process;
mod runner;

#[cfg(test)]
mod test_utils;
