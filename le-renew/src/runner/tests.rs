use super::*;
use crate::{
    test_utils::{buffered_subscriber, fake_issuer, fake_openssl, write_script, EXPIRING},
    LogBuffer, OpensslChecker,
};
use tempfile::TempDir;

const ROOT: &str = "ROOT CERT\n";

struct Fixture {
    dir: TempDir,
    cert_dir: PathBuf,
    csr_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cert_dir = dir.path().join("certs");
        let csr_dir = dir.path().join("csr");
        fs::create_dir_all(&cert_dir).unwrap();
        fs::create_dir_all(&csr_dir).unwrap();
        Self {
            dir,
            cert_dir,
            csr_dir,
        }
    }

    fn add_cert(&self, domain: &str, content: &str, with_csr: bool) -> PathBuf {
        let path = self.cert_dir.join(format!("{domain}.crt"));
        fs::write(&path, content).unwrap();
        if with_csr {
            fs::write(self.csr_dir.join(format!("{domain}.csr")), "CSR").unwrap();
        }
        path
    }

    fn config(&self) -> RenewerConfig {
        RenewerConfig::builder()
            .cert_dir(&self.cert_dir)
            .csr_dir(&self.csr_dir)
            .max_ttl(Duration::from_secs(86400))
            .build()
    }

    fn renewer_with(&self, config: RenewerConfig, issuer_program: PathBuf) -> Renewer {
        let bin = self.dir.path();
        let checker = OpensslChecker::new(fake_openssl(bin), Duration::from_secs(5)).into();
        let issuer = AcmeTiny::builder()
            .program(issuer_program)
            .account_key(bin.join("account.key"))
            .challenge_dir(bin)
            .cert_dir(&self.cert_dir)
            .timeout(Duration::from_secs(5))
            .build();
        Renewer::new(config, checker, issuer, RootCert::from_pem(ROOT))
    }

    fn renewer(&self) -> Renewer {
        self.renewer_with(self.config(), fake_issuer(self.dir.path()))
    }
}

fn issued(domain: &str) -> String {
    format!("-----BEGIN CERTIFICATE-----\nissued for {domain}\n-----END CERTIFICATE-----\n{ROOT}")
}

#[tokio::test]
async fn valid_certificate_is_left_alone() {
    let fx = Fixture::new();
    let cert = fx.add_cert("fresh.example", "FRESH", true);

    let report = fx.renewer().run_once().await.unwrap();

    assert_eq!(report.outcome("fresh.example"), Some(&RenewalOutcome::NotDue));
    assert_eq!(fs::read_to_string(cert).unwrap(), "FRESH");
}

#[tokio::test]
async fn expiring_certificate_is_replaced_with_bundle() {
    let fx = Fixture::new();
    let cert = fx.add_cert("old.example", EXPIRING, true);

    let report = fx.renewer().run_once().await.unwrap();

    assert_eq!(report.outcome("old.example"), Some(&RenewalOutcome::Renewed));
    assert_eq!(fs::read_to_string(cert).unwrap(), issued("old.example"));
}

#[tokio::test]
async fn missing_csr_is_a_warning() {
    let fx = Fixture::new();
    let cert = fx.add_cert("nocsr.example", EXPIRING, false);
    let buffer = LogBuffer::new();

    let _guard = tracing::subscriber::set_default(buffered_subscriber(&buffer));
    let report = fx.renewer().run_once().await.unwrap();

    assert_eq!(
        report.outcome("nocsr.example"),
        Some(&RenewalOutcome::MissingCsr)
    );
    assert!(!report.has_failures());
    assert_eq!(fs::read_to_string(cert).unwrap(), EXPIRING);
    assert!(buffer
        .records()
        .iter()
        .any(|r| r.contains("WARN") && r.ends_with("CSR file not found for nocsr.example")));
}

#[tokio::test]
async fn failing_issuer_leaves_certificate_untouched() {
    let fx = Fixture::new();
    let cert = fx.add_cert("old.example", EXPIRING, true);
    let program = write_script(fx.dir.path(), "broken-acme", "echo half-written; exit 1");
    let buffer = LogBuffer::new();

    let _guard = tracing::subscriber::set_default(buffered_subscriber(&buffer));
    let report = fx
        .renewer_with(fx.config(), program)
        .run_once()
        .await
        .unwrap();

    assert!(matches!(
        report.outcome("old.example"),
        Some(RenewalOutcome::Failed(_))
    ));
    assert_eq!(fs::read_to_string(cert).unwrap(), EXPIRING);
    assert!(buffer
        .records()
        .iter()
        .any(|r| r.contains("ERROR") && r.contains("failed to renew certificate for old.example")));
}

#[tokio::test]
async fn timed_out_issuer_leaves_certificate_untouched() {
    let fx = Fixture::new();
    let cert = fx.add_cert("old.example", EXPIRING, true);
    let program = write_script(fx.dir.path(), "slow-acme", "exec sleep 10");
    let mut renewer = fx.renewer_with(fx.config(), program.clone());
    renewer.issuer = AcmeTiny::builder()
        .program(program)
        .account_key(fx.dir.path().join("account.key"))
        .challenge_dir(fx.dir.path())
        .cert_dir(&fx.cert_dir)
        .timeout(Duration::from_millis(200))
        .build();

    let report = renewer.run_once().await.unwrap();

    match report.outcome("old.example") {
        Some(RenewalOutcome::Failed(reason)) => assert!(reason.contains("timed out")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(fs::read_to_string(cert).unwrap(), EXPIRING);
}

#[tokio::test]
async fn one_failure_does_not_stop_the_pass() {
    let fx = Fixture::new();
    // Fails only for a.example, which sorts first.
    let program = write_script(
        fx.dir.path(),
        "picky-acme",
        r#"case "$4" in *a.example.csr) exit 1;; esac
echo "issued for $(basename "$4" .csr)""#,
    );
    let a = fx.add_cert("a.example", EXPIRING, true);
    let b = fx.add_cert("b.example", EXPIRING, true);
    let c = fx.add_cert("c.example", EXPIRING, false);

    let report = fx
        .renewer_with(fx.config(), program)
        .run_once()
        .await
        .unwrap();

    let domains: Vec<&str> = report.outcomes.iter().map(|(d, _)| d.as_str()).collect();
    assert_eq!(domains, ["a.example", "b.example", "c.example"]);
    assert!(matches!(
        report.outcome("a.example"),
        Some(RenewalOutcome::Failed(_))
    ));
    assert_eq!(report.outcome("b.example"), Some(&RenewalOutcome::Renewed));
    assert_eq!(
        report.outcome("c.example"),
        Some(&RenewalOutcome::MissingCsr)
    );
    assert_eq!((report.renewed(), report.skipped(), report.failed()), (1, 1, 1));
    assert_eq!(fs::read_to_string(a).unwrap(), EXPIRING);
    assert_eq!(
        fs::read_to_string(b).unwrap(),
        format!("issued for b.example\n{ROOT}")
    );
    assert_eq!(fs::read_to_string(c).unwrap(), EXPIRING);
}

#[tokio::test]
async fn check_error_is_isolated() {
    let fx = Fixture::new();
    fx.add_cert("a.example", EXPIRING, true);
    let b = fx.add_cert("b.example", EXPIRING, true);
    let mut renewer = fx.renewer();
    renewer.checker =
        OpensslChecker::new(fx.dir.path().join("missing-openssl"), Duration::from_secs(5)).into();

    let buffer = LogBuffer::new();

    let _guard = tracing::subscriber::set_default(buffered_subscriber(&buffer));
    let report = renewer.run_once().await.unwrap();

    assert_eq!(report.failed(), 2);
    assert_eq!(fs::read_to_string(b).unwrap(), EXPIRING);
    let records = buffer.records();
    for domain in ["a.example", "b.example"] {
        assert!(records
            .iter()
            .any(|r| r.contains("ERROR") && r.contains(&format!("failed to check {domain}: "))));
    }
}

#[tokio::test]
async fn force_renews_valid_certificates() {
    let fx = Fixture::new();
    let cert = fx.add_cert("fresh.example", "FRESH", true);
    let renewer = fx.renewer_with(
        RenewerConfig {
            force: true,
            ..fx.config()
        },
        fake_issuer(fx.dir.path()),
    );

    let report = renewer.run_once().await.unwrap();

    assert_eq!(report.renewed(), 1);
    assert_eq!(fs::read_to_string(cert).unwrap(), issued("fresh.example"));
}

#[tokio::test]
async fn previous_certificate_is_backed_up() {
    let fx = Fixture::new();
    fx.add_cert("old.example", EXPIRING, true);
    let backup_dir = fx.dir.path().join("backup");
    let renewer = fx.renewer_with(
        RenewerConfig {
            backup_dir: Some(backup_dir.clone()),
            ..fx.config()
        },
        fake_issuer(fx.dir.path()),
    );

    renewer.run_once().await.unwrap();

    let snapshots: Vec<PathBuf> = fs::read_dir(&backup_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(
        fs::read_to_string(snapshots[0].join("old.example.crt")).unwrap(),
        EXPIRING
    );
}

#[tokio::test]
async fn hook_runs_only_after_renewal() {
    let fx = Fixture::new();
    let marker = fx.dir.path().join("hook-ran");
    let hook = format!("touch {}", marker.display());
    fx.add_cert("fresh.example", "FRESH", true);

    let renewer = fx.renewer_with(
        RenewerConfig {
            renewed_hook: Some(hook),
            ..fx.config()
        },
        fake_issuer(fx.dir.path()),
    );
    renewer.run_once().await.unwrap();
    assert!(!marker.exists());

    fx.add_cert("old.example", EXPIRING, true);
    renewer.run_once().await.unwrap();
    assert!(marker.exists());
}

#[tokio::test]
async fn hung_hook_is_killed() {
    let fx = Fixture::new();
    let cert = fx.add_cert("old.example", EXPIRING, true);
    let renewer = fx.renewer_with(
        RenewerConfig {
            renewed_hook: Some("exec sleep 30".into()),
            hook_timeout: Duration::from_millis(200),
            ..fx.config()
        },
        fake_issuer(fx.dir.path()),
    );
    let buffer = LogBuffer::new();

    let _guard = tracing::subscriber::set_default(buffered_subscriber(&buffer));
    let report = tokio::time::timeout(Duration::from_secs(5), renewer.run_once())
        .await
        .expect("run should not wait for the hook")
        .unwrap();

    assert_eq!(report.renewed(), 1);
    assert!(!report.has_failures());
    assert_eq!(fs::read_to_string(cert).unwrap(), issued("old.example"));
    assert!(buffer.records().iter().any(|r| r.contains("ERROR")
        && r.contains("failed to run renewed hook")
        && r.contains("timed out")));
}

#[test]
fn only_crt_files_are_listed() {
    let fx = Fixture::new();
    fx.add_cert("b.example", "", false);
    fx.add_cert("a.example", "", false);
    fs::write(fx.cert_dir.join("a.example.key"), "KEY").unwrap();
    fs::write(fx.cert_dir.join("README"), "").unwrap();
    fs::create_dir_all(fx.cert_dir.join("dir.crt")).unwrap();

    let certs = list_certs(&fx.cert_dir).unwrap();
    let domains: Vec<&str> = certs.iter().map(|c| c.domain.as_str()).collect();
    assert_eq!(domains, ["a.example", "b.example"]);
    assert_eq!(
        certs[0].csr_path(&fx.csr_dir),
        fx.csr_dir.join("a.example.csr")
    );
}

#[tokio::test]
async fn missing_cert_dir_aborts_the_pass() {
    let fx = Fixture::new();
    let renewer = fx.renewer_with(
        RenewerConfig::builder()
            .cert_dir(fx.dir.path().join("nowhere"))
            .csr_dir(&fx.csr_dir)
            .max_ttl(Duration::from_secs(60))
            .build(),
        fake_issuer(fx.dir.path()),
    );

    assert!(renewer.run_once().await.is_err());
}
