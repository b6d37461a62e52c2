//! Deciding which keys need a new manifest list.

use std::collections::BTreeSet;
use std::fmt;

use registry::Descriptor;

use crate::ledger::{Key, Ledger};

/// A key whose published list does not match its architecture images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    /// The base repository and tag to publish
    pub key: Key,

    /// Selected architectures observed for the key, in order
    pub architectures: BTreeSet<String>,

    /// Listed entries of deselected architectures to keep in the new list
    pub carried: Vec<Descriptor>,
}

impl fmt::Display for UpdateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let architectures: Vec<&str> = self.architectures.iter().map(String::as_str).collect();
        write!(f, "{} [{}]", self.key, architectures.join(", "))
    }
}

/// Every inconsistent key in the ledger, ordered by repository then tag.
pub fn detect(ledger: &Ledger) -> Vec<UpdateRecord> {
    ledger
        .entries()
        .into_iter()
        .filter(|(key, entry)| {
            let consistent = entry.is_consistent();
            if !consistent {
                for (digest, count) in entry.drift() {
                    tracing::debug!("{key}: {digest} is off by {count:+}");
                }
            }
            !consistent
        })
        .map(|(key, entry)| UpdateRecord {
            key,
            architectures: entry.architectures().clone(),
            carried: entry.carried().to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use registry::{media_types, Digest, Platform};

    use super::*;
    use crate::arch::Architectures;
    use crate::ledger::DecrementPolicy;

    fn listed(architecture: &str, digest: &Digest) -> Descriptor {
        Descriptor {
            media_type: media_types::DOCKER_MANIFEST.into(),
            digest: digest.clone(),
            size: 1,
            platform: Some(Platform::new("linux", architecture)),
        }
    }

    #[test]
    fn only_inconsistent_keys_in_key_order() {
        let archs = Architectures::new(["amd64", "arm64"], ["amd64", "arm64"]).unwrap();
        let ledger = Ledger::new(DecrementPolicy::All, Arc::new(archs));

        let a = Digest::sha256(b"a");
        let b = Digest::sha256(b"b");

        // zeta:v1 is new, app:v2 matches, app:v1 has a stale arm64 entry.
        ledger.observe_image(&Key::new("zeta", "v1"), "amd64", &a);

        ledger.observe_image(&Key::new("app", "v2"), "amd64", &a);
        ledger.observe_list(&Key::new("app", "v2"), &[listed("amd64", &a)]);

        ledger.observe_image(&Key::new("app", "v1"), "arm64", &a);
        ledger.observe_image(&Key::new("app", "v1"), "amd64", &b);
        ledger.observe_list(&Key::new("app", "v1"), &[listed("amd64", &b), listed("arm64", &b)]);

        let records = detect(&ledger);
        let keys: Vec<String> = records.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(keys, ["app:v1", "zeta:v1"]);
        assert_eq!(records[0].to_string(), "app:v1 [amd64, arm64]");
    }

    #[test]
    fn stale_list_without_images() {
        let archs = Architectures::new(["amd64"], ["amd64"]).unwrap();
        let ledger = Ledger::new(DecrementPolicy::All, Arc::new(archs));
        let key = Key::new("app", "v1");
        ledger.observe_list(&key, &[listed("amd64", &Digest::sha256(b"gone"))]);

        let records = detect(&ledger);
        assert_eq!(records.len(), 1);
        assert!(records[0].architectures.is_empty());
    }

    #[test]
    fn deselected_entries_ride_along() {
        let archs = Architectures::new(["amd64", "arm64"], ["amd64"]).unwrap();
        let ledger = Ledger::new(DecrementPolicy::Selected, Arc::new(archs));
        let key = Key::new("app", "v1");
        let arm = listed("arm64", &Digest::sha256(b"arm"));

        ledger.observe_image(&key, "amd64", &Digest::sha256(b"new"));
        ledger.observe_list(&key, &[listed("amd64", &Digest::sha256(b"old")), arm.clone()]);

        let records = detect(&ledger);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].to_string(), "app:v1 [amd64]");
        assert_eq!(records[0].carried, [arm]);
    }
}
