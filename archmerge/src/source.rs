//! The registry operations reconciliation needs.

use std::fmt;
use std::sync::Arc;

use registry::{Descriptor, Digest, IndexEntry, RegistryClient, RegistryResult};

/// A registry that can be scanned and published to.
#[async_trait::async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// The registry domain, used to build references.
    fn domain(&self) -> &str;

    /// Every repository in the registry.
    async fn catalog(&self) -> RegistryResult<Vec<String>>;

    /// Every tag of a repository.
    async fn tags(&self, repository: &str) -> RegistryResult<Vec<String>>;

    /// The content digest stored under a tag.
    async fn digest(&self, repository: &str, tag: &str) -> RegistryResult<Digest>;

    /// The entries of the manifest list stored under a tag, empty when the tag
    /// holds a single image.
    async fn manifest_list(&self, repository: &str, tag: &str) -> RegistryResult<Vec<Descriptor>>;

    /// Digest, media type, size and platform of a single-platform image.
    async fn image(&self, repository: &str, tag: &str) -> RegistryResult<Descriptor>;

    /// Replace the manifest list under a tag.
    async fn push_index(
        &self,
        repository: &str,
        tag: &str,
        entries: &[IndexEntry],
    ) -> RegistryResult<Digest>;
}

/// A registry shared between scan and publish units.
pub type SharedRegistry = Arc<dyn Registry>;

#[async_trait::async_trait]
impl Registry for RegistryClient {
    fn domain(&self) -> &str {
        RegistryClient::domain(self)
    }

    async fn catalog(&self) -> RegistryResult<Vec<String>> {
        RegistryClient::catalog(self).await
    }

    async fn tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        RegistryClient::tags(self, repository).await
    }

    async fn digest(&self, repository: &str, tag: &str) -> RegistryResult<Digest> {
        RegistryClient::digest(self, repository, tag).await
    }

    async fn manifest_list(&self, repository: &str, tag: &str) -> RegistryResult<Vec<Descriptor>> {
        RegistryClient::manifest_list(self, repository, tag).await
    }

    async fn image(&self, repository: &str, tag: &str) -> RegistryResult<Descriptor> {
        RegistryClient::image(self, repository, tag).await
    }

    async fn push_index(
        &self,
        repository: &str,
        tag: &str,
        entries: &[IndexEntry],
    ) -> RegistryResult<Digest> {
        RegistryClient::push_index(self, repository, tag, entries).await
    }
}
