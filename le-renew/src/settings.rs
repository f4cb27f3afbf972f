//! Settings file loading.
//!
//! Settings are layered with figment: the embedded defaults, then
//! `/etc/le-renew/le-renew.{toml,json}`, then `./le-renew.{toml,json}`, then an
//! explicit file, then `LE_RENEW_*` environment variables (`__` separates
//! nested keys, e.g. `LE_RENEW_MAIL__HOST`). At least one settings file must
//! exist, and it must provide the `[mail]` table.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::{debug, level_filters::LevelFilter};

use crate::{BuiltinChecker, ExpiryChecker, Mailer, OpensslChecker, SmtpMailer, SmtpSecurity};

const NAME: &str = "le-renew";
const DEFAULT_SETTINGS: &str = include_str!("../defaults.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub mail: MailSettings,
    pub expiry: ExpirySettings,
    pub issuer: IssuerSettings,
    /// Shell command run once after a pass that renewed anything.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub renewed_hook: Option<String>,
    /// Upper bound on the renewed hook's run time.
    #[serde(with = "duration")]
    pub hook_timeout: Duration,
    /// Where replaced certificates are copied before being overwritten.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    /// Lowest level of log events copied into the report.
    pub level: String,
}

impl MailSettings {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.level)
            .with_context(|| format!("invalid mail level: {}", self.level))
    }

    pub fn mailer(&self) -> Mailer {
        SmtpMailer::builder()
            .host(self.host.clone())
            .port(self.port)
            .security(self.security)
            .maybe_username(self.username.clone())
            .maybe_password(self.password.clone())
            .build()
            .into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryBackend {
    Openssl,
    Builtin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpirySettings {
    pub backend: ExpiryBackend,
    pub openssl: PathBuf,
    #[serde(with = "duration")]
    pub timeout: Duration,
}

impl ExpirySettings {
    pub fn checker(&self) -> ExpiryChecker {
        match self.backend {
            ExpiryBackend::Openssl => OpensslChecker::new(self.openssl.clone(), self.timeout).into(),
            ExpiryBackend::Builtin => BuiltinChecker.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuerSettings {
    #[serde(with = "duration")]
    pub timeout: Duration,
}

/// Load the settings from the standard locations plus an optional explicit file.
pub fn load_settings(config_file: Option<&Path>) -> Result<Settings> {
    let search_dirs = [PathBuf::from(format!("/etc/{NAME}")), PathBuf::from(".")];
    settings_figment(&search_dirs, config_file)?
        .extract()
        .context("invalid settings")
}

fn settings_figment(search_dirs: &[PathBuf], config_file: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Toml::string(DEFAULT_SETTINGS));
    let mut found = false;
    for dir in search_dirs {
        for ext in ["toml", "json"] {
            let path = dir.join(format!("{NAME}.{ext}"));
            if path.is_file() {
                debug!("loading settings from {}", path.display());
                figment = merge_file(figment, &path);
                found = true;
            }
        }
    }
    if let Some(path) = config_file {
        if !path.is_file() {
            bail!("settings file {} not found", path.display());
        }
        figment = merge_file(figment, path);
        found = true;
    }
    if !found {
        let searched = search_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        bail!("no {NAME}.toml or {NAME}.json found in {searched}");
    }
    Ok(figment.merge(Env::prefixed("LE_RENEW_").split("__")))
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Durations written as `"30s"`, `"5m"`, `"2h"`, `"1d"` or plain seconds.
mod duration {
    use serde::{de::Error, Deserialize, Deserializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Secs(u64),
        Text(String),
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Secs(secs) => Ok(Duration::from_secs(secs)),
            Repr::Text(text) => parse(&text).map_err(D::Error::custom),
        }
    }

    pub(super) fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (value, unit) = text.split_at(split);
        let value: u64 = value
            .parse()
            .map_err(|_| format!("invalid duration: {text:?}"))?;
        let scale = match unit {
            "" | "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 24 * 3600,
            _ => return Err(format!("invalid duration unit in {text:?}")),
        };
        Ok(Duration::from_secs(value * scale))
    }
}
