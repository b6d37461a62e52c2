//! The digest ledger: net counts of digests per reconciliation key.
//!
//! Every digest produced by a selected architecture image counts `+1`, every
//! digest referenced by the published manifest list counts `-1`. A key is
//! consistent when all of its counters are zero.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use registry::{Descriptor, Digest};
use serde::Deserialize;

use crate::arch::Architectures;

/// A base repository and tag: the unit of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Base repository name
    pub repository: String,

    /// Tag
    pub tag: String,
}

impl Key {
    /// Create a key.
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Which manifest list entries are decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecrementPolicy {
    /// Every listed digest, whether or not its architecture is selected
    #[default]
    All,

    /// Skip entries for known architectures that are not selected this run
    Selected,
}

impl FromStr for DecrementPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(DecrementPolicy::All),
            "selected" => Ok(DecrementPolicy::Selected),
            other => Err(format!("unknown decrement policy {other:?}, expected all or selected")),
        }
    }
}

impl fmt::Display for DecrementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecrementPolicy::All => f.write_str("all"),
            DecrementPolicy::Selected => f.write_str("selected"),
        }
    }
}

/// The observations for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    counters: BTreeMap<Digest, i64>,
    architectures: BTreeSet<String>,
    carried: Vec<Descriptor>,
}

impl Entry {
    /// Net count per digest.
    pub fn counters(&self) -> &BTreeMap<Digest, i64> {
        &self.counters
    }

    /// Selected architectures observed for this key.
    pub fn architectures(&self) -> &BTreeSet<String> {
        &self.architectures
    }

    /// Listed entries of deselected architectures.
    ///
    /// Only filled under [`DecrementPolicy::Selected`]. These are not counted
    /// and are kept as they are when the list is republished.
    pub fn carried(&self) -> &[Descriptor] {
        &self.carried
    }

    /// The counter for one digest, zero when never observed.
    pub fn count(&self, digest: &Digest) -> i64 {
        self.counters.get(digest).copied().unwrap_or_default()
    }

    /// Whether the published list matches the observed images exactly.
    pub fn is_consistent(&self) -> bool {
        self.counters.values().all(|count| *count == 0)
    }

    /// Digests whose counters are not zero.
    pub fn drift(&self) -> impl Iterator<Item = (&Digest, i64)> {
        self.counters
            .iter()
            .filter(|(_, count)| **count != 0)
            .map(|(digest, count)| (digest, *count))
    }
}

/// The shared ledger filled by scan units.
///
/// Mutations take a single lock over the whole table and never hold it
/// across I/O.
#[derive(Debug)]
pub struct Ledger {
    entries: Mutex<HashMap<Key, Entry>>,
    policy: DecrementPolicy,
    architectures: Arc<Architectures>,
}

impl Ledger {
    /// An empty ledger.
    pub fn new(policy: DecrementPolicy, architectures: Arc<Architectures>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
            architectures,
        }
    }

    /// Record the digest of a selected architecture image.
    pub fn observe_image(&self, key: &Key, architecture: &str, digest: &Digest) {
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_default();
            *entry.counters.entry(digest.clone()).or_default() += 1;
            entry.architectures.insert(architecture.to_string());
        }
        tracing::debug!("digests[{key}][{digest}] += 1");
    }

    /// Record the entries of the published manifest list.
    ///
    /// The key is recorded even when the list is empty.
    pub fn observe_list(&self, key: &Key, manifests: &[Descriptor]) {
        let (counted, carried): (Vec<&Descriptor>, Vec<&Descriptor>) = manifests
            .iter()
            .partition(|descriptor| self.counts(descriptor));

        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_default();
            for descriptor in &counted {
                *entry.counters.entry(descriptor.digest.clone()).or_default() -= 1;
            }
            entry.carried.extend(carried.into_iter().cloned());
        }

        for descriptor in counted {
            tracing::debug!("digests[{key}][{}] -= 1", descriptor.digest);
        }
    }

    fn counts(&self, descriptor: &Descriptor) -> bool {
        if self.policy == DecrementPolicy::All {
            return true;
        }

        match &descriptor.platform {
            Some(platform)
                if self.architectures.is_known(&platform.architecture)
                    && !self.architectures.is_selected(&platform.architecture) =>
            {
                tracing::debug!(
                    digest = %descriptor.digest,
                    architecture = %platform.architecture,
                    "Carrying list entry for deselected architecture"
                );
                false
            }
            _ => true,
        }
    }

    /// A copy of the ledger, ordered by key.
    pub fn entries(&self) -> BTreeMap<Key, Entry> {
        self.entries
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// The entry for one key.
    pub fn get(&self, key: &Key) -> Option<Entry> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of keys observed.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was observed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use registry::{media_types, Platform};

    use super::*;

    fn digest(seed: &str) -> Digest {
        Digest::sha256(seed.as_bytes())
    }

    fn listed(architecture: &str, digest: Digest) -> Descriptor {
        Descriptor {
            media_type: media_types::DOCKER_MANIFEST.into(),
            digest,
            size: 1,
            platform: Some(Platform::new("linux", architecture)),
        }
    }

    fn ledger(policy: DecrementPolicy) -> Ledger {
        let archs = Architectures::new(["amd64", "arm64", "s390x"], ["amd64", "arm64"]).unwrap();
        Ledger::new(policy, Arc::new(archs))
    }

    #[test]
    fn exact_match_is_consistent() {
        let ledger = ledger(DecrementPolicy::All);
        let key = Key::new("app", "v1");

        ledger.observe_image(&key, "amd64", &digest("a"));
        ledger.observe_image(&key, "arm64", &digest("b"));
        ledger.observe_list(&key, &[listed("amd64", digest("a")), listed("arm64", digest("b"))]);

        let entry = ledger.get(&key).unwrap();
        assert!(entry.is_consistent());
        assert_eq!(entry.drift().count(), 0);
        assert_eq!(
            entry.architectures().iter().collect::<Vec<_>>(),
            ["amd64", "arm64"]
        );
    }

    #[test]
    fn changed_architecture_moves_two_counters() {
        let ledger = ledger(DecrementPolicy::All);
        let key = Key::new("app", "v1");

        ledger.observe_list(&key, &[listed("amd64", digest("a")), listed("arm64", digest("old"))]);
        ledger.observe_image(&key, "amd64", &digest("a"));
        ledger.observe_image(&key, "arm64", &digest("new"));

        let entry = ledger.get(&key).unwrap();
        assert!(!entry.is_consistent());

        let drift: Vec<_> = entry.drift().collect();
        assert_eq!(drift.len(), 2);
        assert_eq!(entry.count(&digest("old")), -1);
        assert_eq!(entry.count(&digest("new")), 1);
        assert_eq!(entry.count(&digest("a")), 0);
    }

    #[test]
    fn empty_list_still_records_key() {
        let ledger = ledger(DecrementPolicy::All);
        let key = Key::new("app", "v1");
        ledger.observe_list(&key, &[]);

        assert_eq!(ledger.len(), 1);
        assert!(ledger.get(&key).unwrap().is_consistent());
    }

    #[test]
    fn decrement_policy_for_deselected_architectures() {
        let key = Key::new("app", "v1");
        let list = [
            listed("amd64", digest("a")),
            listed("s390x", digest("z")),
            listed("riscv64", digest("r")),
        ];

        let all = ledger(DecrementPolicy::All);
        all.observe_image(&key, "amd64", &digest("a"));
        all.observe_list(&key, &list);
        let entry = all.get(&key).unwrap();
        assert_eq!(entry.count(&digest("z")), -1);
        assert_eq!(entry.count(&digest("r")), -1);

        let selected = ledger(DecrementPolicy::Selected);
        selected.observe_image(&key, "amd64", &digest("a"));
        selected.observe_list(&key, &list);
        let entry = selected.get(&key).unwrap();
        assert_eq!(entry.count(&digest("z")), 0, "deselected s390x is ignored");
        assert_eq!(
            entry.count(&digest("r")),
            -1,
            "unknown architectures still count"
        );
        assert_eq!(entry.carried(), &list[1..2]);
        assert!(all.get(&key).unwrap().carried().is_empty());
    }

    #[test]
    fn parse_policy() {
        assert_eq!("all".parse::<DecrementPolicy>(), Ok(DecrementPolicy::All));
        assert_eq!(
            "selected".parse::<DecrementPolicy>(),
            Ok(DecrementPolicy::Selected)
        );
        assert!("some".parse::<DecrementPolicy>().is_err());
    }
}
