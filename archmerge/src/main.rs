//! Merge architecture-prefixed images into multi-arch manifest lists.
//!
//! Usage:
//!     archmerge -a amd64,arm64 -d 10m registry.example.com

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use archmerge::config::{parse_list, Backend, Settings};
use archmerge::publish::{DockerPusher, DryRun, IndexPusher, RegistryPusher};
use archmerge::{DecrementPolicy, Reconciler, SharedRegistry};
use camino::Utf8PathBuf;
use clap::{CommandFactory as _, Parser};
use eyre::WrapErr as _;
use registry::{DockerConfig, RegistryClient};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "archmerge", version, about)]
struct Args {
    /// Registry domain, e.g. registry.example.com:5000
    domain: Option<String>,

    /// Architectures to process this run [default: amd64,s390x]
    #[arg(short = 'a', value_name = "LIST")]
    architectures: Option<String>,

    /// Every architecture prefix in the registry [default: amd64,s390x,ppc64le,arm64]
    #[arg(long = "all", value_name = "LIST")]
    all_architectures: Option<String>,

    /// Repeat every interval, e.g. 30s or 5m. Zero runs once [default: 0]
    #[arg(short = 'd', value_name = "DURATION", value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Print what would be published without changing anything
    #[arg(long)]
    dry_run: bool,

    /// How manifest lists are written: registry or docker [default: registry]
    #[arg(long)]
    backend: Option<Backend>,

    /// Which list entries count against images: all or selected [default: all]
    #[arg(long)]
    decrement: Option<DecrementPolicy>,

    /// Maximum concurrent registry requests [default: 16]
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-request timeout [default: 60s]
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Talk plain HTTP to the registry
    #[arg(long)]
    insecure: bool,

    /// TOML file supplying any of the above
    #[arg(long, value_name = "FILE")]
    config: Option<Utf8PathBuf>,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            domain: self.domain.clone(),
            architectures: self.architectures.as_deref().map(parse_list),
            all_architectures: self.all_architectures.as_deref().map(parse_list),
            interval: self.interval,
            timeout: self.timeout,
            dry_run: self.dry_run.then_some(true),
            backend: self.backend,
            decrement: self.decrement,
            concurrency: self.concurrency,
            insecure: self.insecure.then_some(true),
        }
    }
}

/// Exit status when no registry domain is given.
const USAGE_EXIT: u8 = 1;

/// Usage text to print when no source supplied a registry domain.
fn missing_domain(settings: &Settings) -> Option<String> {
    settings
        .domain
        .is_none()
        .then(|| Args::command().render_help().to_string())
}

/// Accept the single-dash `-all` spelling.
fn normalize(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|arg| {
        if arg == "-all" {
            "--all".to_string()
        } else if let Some(value) = arg.strip_prefix("-all=") {
            format!("--all={value}")
        } else {
            arg
        }
    })
    .collect()
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse_from(normalize(std::env::args()));

    let mut settings = Settings::default();
    if let Some(path) = &args.config {
        settings = Settings::from_file(path)?;
    }
    let settings = settings.merge(args.settings());

    if let Some(usage) = missing_domain(&settings) {
        eprintln!("{usage}");
        return Ok(ExitCode::from(USAGE_EXIT));
    }
    let config = settings.validate()?;

    let credentials = DockerConfig::from_env().wrap_err("reading docker configuration")?;
    let client = RegistryClient::builder(&config.domain)
        .credentials_from(&credentials)?
        .insecure(config.insecure)
        .timeout(config.timeout)
        .build()?;
    let registry: SharedRegistry = Arc::new(client);

    let mut pusher: Arc<dyn IndexPusher> = match config.backend {
        Backend::Registry => Arc::new(RegistryPusher::new(registry.clone())),
        Backend::Docker => Arc::new(DockerPusher::new(config.insecure)),
    };
    if config.dry_run {
        pusher = Arc::new(DryRun::new(pusher, archmerge::publish::stdout()));
    }

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping");
                token.cancel();
            }
        }
    });

    tracing::info!(
        domain = %config.domain,
        backend = %config.backend,
        decrement = %config.decrement,
        "reconciling"
    );
    Reconciler::new(registry, pusher, config.options())
        .run(token)
        .await?;

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(normalize(args.iter().map(|arg| arg.to_string())))
    }

    #[test]
    fn single_dash_all() {
        let args = parse(&[
            "archmerge", "-all", "amd64,arm64", "-a", "amd64", "-d", "0", "--dry-run", "r.example",
        ])
        .unwrap();
        let settings = args.settings();

        assert_eq!(settings.domain.as_deref(), Some("r.example"));
        assert_eq!(
            settings.all_architectures,
            Some(vec!["amd64".to_string(), "arm64".to_string()])
        );
        assert_eq!(settings.architectures, Some(vec!["amd64".to_string()]));
        assert_eq!(settings.interval, Some(Duration::ZERO));
        assert_eq!(settings.dry_run, Some(true));
        assert_eq!(settings.insecure, None);
    }

    #[test]
    fn all_with_equals_and_humantime_interval() {
        let settings = parse(&["archmerge", "-all=amd64", "-d", "1h30m", "r.example"])
            .unwrap()
            .settings();

        assert_eq!(settings.all_architectures, Some(vec!["amd64".to_string()]));
        assert_eq!(settings.interval, Some(Duration::from_secs(5400)));
        assert_eq!(settings.dry_run, None);

        assert!(parse(&["archmerge", "-d", "soon", "r.example"]).is_err());
        assert!(parse(&["archmerge", "--backend", "podman", "r.example"]).is_err());
    }

    #[test]
    fn missing_domain_prints_usage() {
        let settings = parse(&["archmerge", "-a", "amd64"]).unwrap().settings();
        assert!(settings.domain.is_none());

        let usage = missing_domain(&settings).unwrap();
        assert!(usage.contains("Usage"));
        assert_eq!(USAGE_EXIT, 1);

        let from_file = Settings {
            domain: Some("file.example".into()),
            ..Default::default()
        };
        assert!(missing_domain(&from_file.merge(settings)).is_none());
    }
}
