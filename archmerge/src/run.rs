//! Driving reconciliation passes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio_util::sync::CancellationToken;

use crate::arch::Architectures;
use crate::detect::{detect, UpdateRecord};
use crate::error::{PassError, PublishError};
use crate::ledger::DecrementPolicy;
use crate::publish::{self, Composition, Console, IndexPusher};
use crate::scan::{scan, ScanOptions};
use crate::source::SharedRegistry;

/// How passes are run.
#[derive(Debug, Clone)]
pub struct Options {
    /// Architecture prefixes known and selected
    pub architectures: Arc<Architectures>,

    /// Which list entries are decremented
    pub policy: DecrementPolicy,

    /// Maximum concurrent registry units
    pub concurrency: usize,

    /// Time between passes. Zero runs a single pass.
    pub interval: Duration,

    /// Print decisions and compositions instead of only logging them
    pub dry_run: bool,
}

impl Options {
    fn scan(&self) -> ScanOptions {
        ScanOptions {
            architectures: self.architectures.clone(),
            policy: self.policy,
            concurrency: self.concurrency,
        }
    }
}

/// What one successful pass did.
#[derive(Debug, Default)]
pub struct PassSummary {
    /// Keys found out of date, in key order
    pub updates: Vec<UpdateRecord>,

    /// Manifest lists published (or printed, in a dry run), in key order
    pub published: Vec<Composition>,
}

/// Scans, detects and publishes, once or on an interval.
pub struct Reconciler {
    registry: SharedRegistry,
    pusher: Arc<dyn IndexPusher>,
    options: Options,
    console: Console,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("pusher", &self.pusher)
            .field("options", &self.options)
            .finish()
    }
}

impl Reconciler {
    /// Reconcile `registry`, writing lists with `pusher`.
    pub fn new(registry: SharedRegistry, pusher: Arc<dyn IndexPusher>, options: Options) -> Self {
        Self {
            registry,
            pusher,
            options,
            console: publish::stdout(),
        }
    }

    /// Print dry-run decisions somewhere other than standard output.
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// The options passes run with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Run one pass: scan the registry, detect drift, publish every update.
    ///
    /// Every record is attempted even when siblings fail, but any failure
    /// fails the pass.
    #[tracing::instrument(skip_all, fields(domain = %self.registry.domain()))]
    pub async fn pass(&self, token: &CancellationToken) -> Result<PassSummary, PassError> {
        let scanned = scan(&self.registry, &self.options.scan(), token).await?;

        if self.options.dry_run {
            let mut console = self.console.lock();
            for decision in &scanned.decisions {
                let _ = writeln!(console, "{}: {}", decision.repository, decision.classification);
            }
        }

        let updates = detect(&scanned.ledger);
        tracing::info!("number of updates: {}", updates.len());
        for record in &updates {
            tracing::debug!("update {record}");
        }

        if updates.is_empty() {
            return Ok(PassSummary::default());
        }

        self.pusher.prepare().await.map_err(PassError::Prepare)?;

        // One at a time in a dry run so printed compositions do not interleave.
        let concurrency = if self.options.dry_run {
            1
        } else {
            self.options.concurrency.max(1)
        };

        let results: Vec<Result<Composition, PublishError>> = futures::stream::iter(&updates)
            .map(|record| async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(PublishError::Cancelled { key: record.key.clone() }),
                    result = publish::publish(&self.registry, self.pusher.as_ref(), record) => result,
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        if token.is_cancelled()
            && results
                .iter()
                .any(|result| matches!(result, Err(PublishError::Cancelled { .. })))
        {
            return Err(PassError::Cancelled);
        }

        let attempted = results.len();
        let mut published = Vec::with_capacity(attempted);
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(composition) => published.push(composition),
                Err(error) => {
                    tracing::error!("{}", report(&error));
                    errors.push(error);
                }
            }
        }

        if !errors.is_empty() {
            return Err(PassError::Publish {
                failed: errors.len(),
                attempted,
                errors,
            });
        }

        Ok(PassSummary { updates, published })
    }

    /// Run passes until one fails, the interval is zero, or `token` is
    /// cancelled while idle.
    pub async fn run(&self, token: CancellationToken) -> Result<(), PassError> {
        loop {
            let summary = self.pass(&token).await?;
            tracing::debug!(published = summary.published.len(), "pass complete");

            if self.options.interval.is_zero() {
                return Ok(());
            }

            tracing::info!(
                "sleeping {}",
                humantime::format_duration(self.options.interval)
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!("cancelled while idle");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }
    }
}

/// An error and its sources on one line.
pub fn report(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::memory::{Fault, MemoryRegistry};
    use crate::publish::RegistryPusher;

    fn reconciler(memory: &Arc<MemoryRegistry>, interval: Duration) -> Reconciler {
        let registry: SharedRegistry = memory.clone();
        let options = Options {
            architectures: Arc::new(Architectures::new(["amd64", "arm64"], ["amd64", "arm64"]).unwrap()),
            policy: DecrementPolicy::All,
            concurrency: 4,
            interval,
            dry_run: false,
        };
        Reconciler::new(registry.clone(), Arc::new(RegistryPusher::new(registry)), options)
            .with_console(Arc::new(Mutex::new(Vec::<u8>::new())))
    }

    #[tokio::test]
    async fn single_pass_publishes_then_settles() {
        let memory = Arc::new(MemoryRegistry::new("r.example"));
        memory.put_image("amd64/app", "v1", "amd64", "one");
        let reconciler = reconciler(&memory, Duration::ZERO);

        let token = CancellationToken::new();
        reconciler.run(token.clone()).await.unwrap();
        assert_eq!(memory.pushes().len(), 1);

        let summary = reconciler.pass(&token).await.unwrap();
        assert!(summary.updates.is_empty());
        assert_eq!(memory.pushes().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_pass_is_an_error() {
        let memory = Arc::new(MemoryRegistry::new("r.example"));
        memory.put_image("amd64/app", "v1", "amd64", "one");
        let reconciler = reconciler(&memory, Duration::ZERO);

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            reconciler.pass(&token).await,
            Err(PassError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn catalog_failure_fails_the_pass() {
        let memory = Arc::new(MemoryRegistry::new("r.example"));
        memory.fail(Fault::Catalog);
        let reconciler = reconciler(&memory, Duration::ZERO);

        let err = reconciler.pass(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PassError::Catalog(_)));
        assert!(report(&err).starts_with("listing repositories of r.example: HTTP 500"));
    }

    #[test]
    fn report_names_each_cause_once() {
        let err = crate::error::ScanError::Digest {
            reference: "amd64/app:v1".into(),
            source: registry::RegistryError::Transport {
                method: http::Method::HEAD,
                uri: "https://r.example/v2/amd64/app/manifests/v1".parse().unwrap(),
                source: "connection reset".into(),
            },
        };

        assert_eq!(
            report(&err),
            "fetching digest of amd64/app:v1: HEAD https://r.example/v2/amd64/app/manifests/v1: connection reset"
        );
    }
}
