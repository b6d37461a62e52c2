//! Scanning the registry into a digest ledger.
//!
//! The scan lists the catalog, then fans out in two fail-fast phases: one
//! unit per processed repository to list its tags, and one unit per
//! repository and tag to fetch either an architecture image digest or the
//! published manifest list.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::arch::{Architectures, Classification};
use crate::error::{CatalogError, PassError, ScanError};
use crate::group::{Aborted, TaskGroup};
use crate::ledger::{DecrementPolicy, Key, Ledger};
use crate::source::SharedRegistry;

/// Settings for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Architecture prefixes known and selected
    pub architectures: Arc<Architectures>,

    /// Which list entries are decremented
    pub policy: DecrementPolicy,

    /// Maximum concurrent registry units per phase
    pub concurrency: usize,
}

/// The classifier's decision for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Full repository name
    pub repository: String,

    /// Base repository the observations are recorded under
    pub base: String,

    /// Classification of the first segment
    pub classification: Classification,
}

/// What a completed scan observed.
#[derive(Debug)]
pub struct Scan {
    /// Classifier decisions, in catalog order
    pub decisions: Vec<Decision>,

    /// The filled ledger
    pub ledger: Arc<Ledger>,
}

/// What a digest unit fetches.
#[derive(Debug, Clone)]
enum Unit {
    Image {
        repository: String,
        architecture: String,
        key: Key,
    },
    List {
        key: Key,
    },
}

fn flatten(aborted: Aborted<ScanError>) -> ScanError {
    match aborted {
        Aborted::Failed(error) => error,
        Aborted::Panicked(message) => ScanError::Panicked(message),
        Aborted::Cancelled => ScanError::Cancelled,
    }
}

/// Scan the registry.
///
/// No ledger is returned unless every unit succeeded.
#[tracing::instrument(skip_all, fields(domain = %registry.domain()))]
pub async fn scan(
    registry: &SharedRegistry,
    options: &ScanOptions,
    token: &CancellationToken,
) -> Result<Scan, PassError> {
    let repositories = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(PassError::Cancelled),
        result = registry.catalog() => result.map_err(|source| CatalogError {
            domain: registry.domain().to_string(),
            source,
        })?,
    };
    tracing::debug!(count = repositories.len(), "listed repositories");

    let decisions: Vec<Decision> = repositories
        .iter()
        .map(|repository| {
            let split = options.architectures.split(repository);
            Decision {
                repository: repository.clone(),
                base: split.base.to_string(),
                classification: split.classification,
            }
        })
        .collect();

    let tagged = list_tags(registry, &decisions, options, token).await?;

    let ledger = Arc::new(Ledger::new(options.policy, options.architectures.clone()));
    let mut group: TaskGroup<ScanError> = TaskGroup::new(token, options.concurrency);

    for (decision, tags) in tagged {
        for tag in tags {
            let unit = if decision.classification.is_base() {
                Unit::List {
                    key: Key::new(decision.repository.clone(), tag),
                }
            } else {
                Unit::Image {
                    repository: decision.repository.clone(),
                    architecture: decision.classification.architecture.clone(),
                    key: Key::new(decision.base.clone(), tag),
                }
            };

            let registry = registry.clone();
            let ledger = ledger.clone();
            group.spawn(async move { observe(&registry, &ledger, unit).await });
        }
    }

    tracing::debug!(units = group.len(), "fetching digests");
    group.wait().await.map_err(flatten)?;

    Ok(Scan { decisions, ledger })
}

async fn list_tags(
    registry: &SharedRegistry,
    decisions: &[Decision],
    options: &ScanOptions,
    token: &CancellationToken,
) -> Result<Vec<(Decision, Vec<String>)>, ScanError> {
    let tagged = Arc::new(Mutex::new(Vec::new()));
    let mut group: TaskGroup<ScanError> = TaskGroup::new(token, options.concurrency);

    for decision in decisions.iter().filter(|d| d.classification.process) {
        let registry = registry.clone();
        let tagged = tagged.clone();
        let decision = decision.clone();

        group.spawn(async move {
            let tags = registry
                .tags(&decision.repository)
                .await
                .map_err(|source| ScanError::Tags {
                    repository: decision.repository.clone(),
                    source,
                })?;
            tracing::debug!(repository = %decision.repository, count = tags.len(), "listed tags");
            tagged.lock().push((decision, tags));
            Ok(())
        });
    }

    group.wait().await.map_err(flatten)?;

    let mut tagged = std::mem::take(&mut *tagged.lock());
    tagged.sort_by(|a, b| a.0.repository.cmp(&b.0.repository));
    Ok(tagged)
}

async fn observe(registry: &SharedRegistry, ledger: &Ledger, unit: Unit) -> Result<(), ScanError> {
    match unit {
        Unit::Image {
            repository,
            architecture,
            key,
        } => {
            tracing::debug!("{repository}:{}", key.tag);
            let digest = registry
                .digest(&repository, &key.tag)
                .await
                .map_err(|source| ScanError::Digest {
                    reference: format!("{repository}:{}", key.tag),
                    source,
                })?;
            ledger.observe_image(&key, &architecture, &digest);
        }
        Unit::List { key } => {
            tracing::debug!("{key}");
            let manifests = registry
                .manifest_list(&key.repository, &key.tag)
                .await
                .map_err(|source| ScanError::ManifestList {
                    reference: key.to_string(),
                    source,
                })?;
            ledger.observe_list(&key, &manifests);
        }
    }
    Ok(())
}
