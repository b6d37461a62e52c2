//! Run configuration: an optional TOML file merged under command line values.
//!
//! ```toml
//! domain = "registry.example.com"
//! architectures = ["amd64", "arm64"]
//! all-architectures = ["amd64", "arm64", "s390x", "ppc64le"]
//! interval = "10m"
//! backend = "docker"
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;

use crate::arch::Architectures;
use crate::error::ConfigurationError;
use crate::ledger::DecrementPolicy;
use crate::run::Options;

/// Architectures processed when none are given.
pub const DEFAULT_ARCHITECTURES: &str = "amd64,s390x";

/// Architecture prefixes known when none are given.
pub const DEFAULT_ALL_ARCHITECTURES: &str = "amd64,s390x,ppc64le,arm64";

/// Concurrent registry units when no limit is given.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Per-request timeout when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How manifest lists are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Through the registry API
    #[default]
    Registry,

    /// With `docker manifest create` and `docker manifest push`
    Docker,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registry" => Ok(Backend::Registry),
            "docker" => Ok(Backend::Docker),
            _ => Err(format!("unknown backend '{s}', expected 'registry' or 'docker'")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Registry => f.write_str("registry"),
            Backend::Docker => f.write_str("docker"),
        }
    }
}

/// Split a comma separated list, dropping empty items.
pub fn parse_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        humantime::parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Unvalidated settings, from a file or the command line.
///
/// Every field is optional so sources can be layered with [`Settings::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    /// Registry domain
    pub domain: Option<String>,

    /// Architectures processed this run
    pub architectures: Option<Vec<String>>,

    /// Every architecture prefix in the registry
    pub all_architectures: Option<Vec<String>>,

    /// Time between passes
    #[serde(default, with = "duration")]
    pub interval: Option<Duration>,

    /// Per-request timeout
    #[serde(default, with = "duration")]
    pub timeout: Option<Duration>,

    /// Print instead of publishing
    pub dry_run: Option<bool>,

    /// Publish backend
    pub backend: Option<Backend>,

    /// Which list entries are decremented
    pub decrement: Option<DecrementPolicy>,

    /// Maximum concurrent registry units
    pub concurrency: Option<usize>,

    /// Use plain HTTP
    pub insecure: Option<bool>,
}

impl Settings {
    /// Read settings from a TOML file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml_edit::de::from_str(&text).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Layer `over` on top of these settings. Values set in `over` win.
    pub fn merge(self, over: Settings) -> Settings {
        Settings {
            domain: over.domain.or(self.domain),
            architectures: over.architectures.or(self.architectures),
            all_architectures: over.all_architectures.or(self.all_architectures),
            interval: over.interval.or(self.interval),
            timeout: over.timeout.or(self.timeout),
            dry_run: over.dry_run.or(self.dry_run),
            backend: over.backend.or(self.backend),
            decrement: over.decrement.or(self.decrement),
            concurrency: over.concurrency.or(self.concurrency),
            insecure: over.insecure.or(self.insecure),
        }
    }

    /// Fill in defaults and check the result.
    pub fn validate(self) -> Result<Config, ConfigurationError> {
        let domain = self.domain.ok_or(ConfigurationError::MissingDomain)?;
        registry::validate_domain(&domain).map_err(ConfigurationError::Domain)?;

        let architectures = Architectures::new(
            self.all_architectures
                .unwrap_or_else(|| parse_list(DEFAULT_ALL_ARCHITECTURES)),
            self.architectures
                .unwrap_or_else(|| parse_list(DEFAULT_ARCHITECTURES)),
        )?;

        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ConfigurationError::Concurrency);
        }

        Ok(Config {
            domain,
            architectures: Arc::new(architectures),
            interval: self.interval.unwrap_or(Duration::ZERO),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            dry_run: self.dry_run.unwrap_or(false),
            backend: self.backend.unwrap_or_default(),
            decrement: self.decrement.unwrap_or_default(),
            concurrency,
            insecure: self.insecure.unwrap_or(false),
        })
    }
}

/// Validated configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Registry domain
    pub domain: String,

    /// Architecture prefixes known and selected
    pub architectures: Arc<Architectures>,

    /// Time between passes, zero for a single pass
    pub interval: Duration,

    /// Per-request timeout
    pub timeout: Duration,

    /// Print instead of publishing
    pub dry_run: bool,

    /// Publish backend
    pub backend: Backend,

    /// Which list entries are decremented
    pub decrement: DecrementPolicy,

    /// Maximum concurrent registry units
    pub concurrency: usize,

    /// Use plain HTTP
    pub insecure: bool,
}

impl Config {
    /// Options for the run loop.
    pub fn options(&self) -> Options {
        Options {
            architectures: self.architectures.clone(),
            policy: self.decrement,
            concurrency: self.concurrency,
            interval: self.interval,
            dry_run: self.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn settings(domain: &str) -> Settings {
        Settings {
            domain: Some(domain.into()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let config = settings("r.example").validate().unwrap();
        assert_eq!(config.interval, Duration::ZERO);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.backend, Backend::Registry);
        assert_eq!(config.decrement, DecrementPolicy::All);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(config.architectures.is_selected("amd64"));
        assert!(config.architectures.is_selected("s390x"));
        assert!(config.architectures.is_known("arm64"));
        assert!(!config.architectures.is_selected("arm64"));
    }

    #[test]
    fn invalid_settings() {
        assert!(matches!(
            Settings::default().validate(),
            Err(ConfigurationError::MissingDomain)
        ));
        assert!(matches!(
            settings("https://r.example").validate(),
            Err(ConfigurationError::Domain(_))
        ));
        assert_eq!(
            crate::run::report(&settings("https://r.example").validate().unwrap_err()),
            "invalid registry domain: https://r.example"
        );

        let mut empty = settings("r.example");
        empty.architectures = Some(parse_list(","));
        assert_eq!(
            empty.validate().unwrap_err().to_string(),
            "list of '-a' architectures not allowed to be empty"
        );

        let mut unknown = settings("r.example");
        unknown.architectures = Some(parse_list("amd64,riscv64"));
        assert!(matches!(
            unknown.validate(),
            Err(ConfigurationError::UnknownArchitectures(list)) if list == "riscv64"
        ));

        let mut zero = settings("r.example");
        zero.concurrency = Some(0);
        assert!(matches!(zero.validate(), Err(ConfigurationError::Concurrency)));
    }

    #[test]
    fn parse_toml() {
        let parsed: Settings = toml_edit::de::from_str(indoc! {r#"
            domain = "r.example"
            architectures = ["amd64", "arm64"]
            interval = "5m"
            backend = "docker"
            decrement = "selected"
        "#})
        .unwrap();

        assert_eq!(parsed.domain.as_deref(), Some("r.example"));
        assert_eq!(parsed.interval, Some(Duration::from_secs(300)));
        assert_eq!(parsed.backend, Some(Backend::Docker));
        assert_eq!(parsed.decrement, Some(DecrementPolicy::Selected));
        assert_eq!(parsed.timeout, None);

        assert!(toml_edit::de::from_str::<Settings>("colour = \"red\"").is_err());
        assert!(toml_edit::de::from_str::<Settings>("interval = \"soon\"").is_err());
    }

    #[test]
    fn later_sources_win() {
        let file = Settings {
            domain: Some("file.example".into()),
            interval: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let cli = Settings {
            domain: Some("cli.example".into()),
            ..Default::default()
        };

        let merged = file.merge(cli);
        assert_eq!(merged.domain.as_deref(), Some("cli.example"));
        assert_eq!(merged.interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn lists() {
        assert_eq!(parse_list("amd64, arm64,,"), ["amd64", "arm64"]);
        assert!(parse_list("").is_empty());
        assert_eq!("docker".parse::<Backend>(), Ok(Backend::Docker));
        assert!("podman".parse::<Backend>().is_err());
    }
}
