//! An in-memory registry for tests and demonstrations.
//!
//! Holds tags pointing at single images or manifest lists, records pushed
//! lists, and can be told to fail specific operations.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use registry::{
    media_types, Descriptor, Digest, IndexEntry, ManifestList, Platform, RegistryError,
    RegistryResult, ResponseError,
};

use crate::source::Registry;

/// A registry operation that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Listing the catalog
    Catalog,
    /// Listing tags of a repository
    Tags(String),
    /// Fetching the digest of `repository:tag`
    Digest(String, String),
    /// Fetching the manifest list of `repository:tag`
    ManifestList(String, String),
    /// Resolving the image `repository:tag`
    Image(String, String),
    /// Pushing a manifest list to `repository:tag`
    Push(String, String),
}

/// A manifest list written through [`Registry::push_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedIndex {
    /// Target repository
    pub repository: String,
    /// Target tag
    pub tag: String,
    /// Entries in the order they were pushed
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
enum Stored {
    Image(Descriptor),
    List(Vec<Descriptor>),
}

#[derive(Debug, Default)]
struct State {
    repositories: BTreeMap<String, BTreeMap<String, Stored>>,
    faults: HashSet<Fault>,
    pushes: Vec<PushedIndex>,
}

/// Registry held entirely in memory.
#[derive(Debug)]
pub struct MemoryRegistry {
    domain: String,
    latency: Duration,
    state: Mutex<State>,
}

impl MemoryRegistry {
    /// An empty registry answering as `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            latency: Duration::ZERO,
            state: Mutex::new(State::default()),
        }
    }

    /// Delay every operation, to widen windows for cancellation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Store a single-platform image under `repository:tag`.
    ///
    /// The digest is derived from `content`, so equal content gives equal digests.
    pub fn put_image(&self, repository: &str, tag: &str, architecture: &str, content: &str) -> Digest {
        let digest = Digest::sha256(content.as_bytes());
        let descriptor = Descriptor {
            media_type: media_types::DOCKER_MANIFEST.to_string(),
            digest: digest.clone(),
            size: content.len() as u64,
            platform: Some(Platform::new("linux", architecture)),
        };
        self.store(repository, tag, Stored::Image(descriptor));
        digest
    }

    /// Store a manifest list under `repository:tag`.
    pub fn put_list(&self, repository: &str, tag: &str, manifests: Vec<Descriptor>) {
        self.store(repository, tag, Stored::List(manifests));
    }

    /// Remove a tag.
    pub fn remove(&self, repository: &str, tag: &str) {
        let mut state = self.state.lock();
        if let Some(tags) = state.repositories.get_mut(repository) {
            tags.remove(tag);
            if tags.is_empty() {
                state.repositories.remove(repository);
            }
        }
    }

    /// Make an operation fail until [`MemoryRegistry::heal`] is called.
    pub fn fail(&self, fault: Fault) {
        self.state.lock().faults.insert(fault);
    }

    /// Clear all faults.
    pub fn heal(&self) {
        self.state.lock().faults.clear();
    }

    /// Every manifest list pushed so far.
    pub fn pushes(&self) -> Vec<PushedIndex> {
        self.state.lock().pushes.clone()
    }

    /// The entries of the manifest list under `repository:tag`, if it holds one.
    pub fn list(&self, repository: &str, tag: &str) -> Option<Vec<Descriptor>> {
        match self.lookup(repository, tag) {
            Some(Stored::List(manifests)) => Some(manifests),
            _ => None,
        }
    }

    /// The descriptor of the image `repository:tag` as it would be listed.
    pub fn descriptor(&self, repository: &str, tag: &str) -> Option<Descriptor> {
        match self.lookup(repository, tag) {
            Some(Stored::Image(descriptor)) => Some(descriptor),
            _ => None,
        }
    }

    fn store(&self, repository: &str, tag: &str, stored: Stored) {
        self.state
            .lock()
            .repositories
            .entry(repository.to_string())
            .or_default()
            .insert(tag.to_string(), stored);
    }

    fn lookup(&self, repository: &str, tag: &str) -> Option<Stored> {
        self.state
            .lock()
            .repositories
            .get(repository)
            .and_then(|tags| tags.get(tag))
            .cloned()
    }

    async fn enter(&self, fault: Fault, path: &str) -> RegistryResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.state.lock().faults.contains(&fault) {
            return Err(self.error(
                StatusCode::INTERNAL_SERVER_ERROR,
                path,
                "injected failure",
            ));
        }
        Ok(())
    }

    fn error(&self, status: StatusCode, path: &str, body: &str) -> RegistryError {
        let uri = format!("https://{}{}", self.domain, path)
            .parse()
            .unwrap_or_default();
        ResponseError::new(status, uri, body.as_bytes()).into()
    }

    fn manifest_unknown(&self, path: &str) -> RegistryError {
        self.error(
            StatusCode::NOT_FOUND,
            path,
            r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown"}]}"#,
        )
    }
}

fn list_digest(manifests: &[Descriptor]) -> RegistryResult<Digest> {
    let mut list = ManifestList::new();
    for descriptor in manifests {
        list.push(descriptor.clone());
    }
    Ok(Digest::sha256(&list.to_vec()?))
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn catalog(&self) -> RegistryResult<Vec<String>> {
        self.enter(Fault::Catalog, "/v2/_catalog").await?;
        Ok(self.state.lock().repositories.keys().cloned().collect())
    }

    async fn tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        let path = format!("/v2/{repository}/tags/list");
        self.enter(Fault::Tags(repository.into()), &path).await?;

        let state = self.state.lock();
        match state.repositories.get(repository) {
            Some(tags) => Ok(tags.keys().cloned().collect()),
            None => Err(self.error(
                StatusCode::NOT_FOUND,
                &path,
                r#"{"errors":[{"code":"NAME_UNKNOWN","message":"repository name not known to registry"}]}"#,
            )),
        }
    }

    async fn digest(&self, repository: &str, tag: &str) -> RegistryResult<Digest> {
        let path = format!("/v2/{repository}/manifests/{tag}");
        self.enter(Fault::Digest(repository.into(), tag.into()), &path)
            .await?;

        match self.lookup(repository, tag) {
            Some(Stored::Image(descriptor)) => Ok(descriptor.digest),
            Some(Stored::List(manifests)) => list_digest(&manifests),
            None => Err(self.manifest_unknown(&path)),
        }
    }

    async fn manifest_list(&self, repository: &str, tag: &str) -> RegistryResult<Vec<Descriptor>> {
        let path = format!("/v2/{repository}/manifests/{tag}");
        self.enter(Fault::ManifestList(repository.into(), tag.into()), &path)
            .await?;

        match self.lookup(repository, tag) {
            Some(Stored::List(manifests)) => Ok(manifests),
            Some(Stored::Image(_)) => Ok(Vec::new()),
            None => Err(self.manifest_unknown(&path)),
        }
    }

    async fn image(&self, repository: &str, tag: &str) -> RegistryResult<Descriptor> {
        let path = format!("/v2/{repository}/manifests/{tag}");
        self.enter(Fault::Image(repository.into(), tag.into()), &path)
            .await?;

        match self.lookup(repository, tag) {
            Some(Stored::Image(descriptor)) => Ok(descriptor),
            Some(Stored::List(_)) => Err(RegistryError::UnsupportedManifestType(
                media_types::DOCKER_MANIFEST_LIST.to_string(),
            )),
            None => Err(self.manifest_unknown(&path)),
        }
    }

    async fn push_index(
        &self,
        repository: &str,
        tag: &str,
        entries: &[IndexEntry],
    ) -> RegistryResult<Digest> {
        let path = format!("/v2/{repository}/manifests/{tag}");
        self.enter(Fault::Push(repository.into(), tag.into()), &path)
            .await?;

        let manifests: Vec<Descriptor> = entries.iter().map(|e| e.descriptor.clone()).collect();
        let digest = list_digest(&manifests)?;

        self.put_list(repository, tag, manifests);
        self.state.lock().pushes.push(PushedIndex {
            repository: repository.to_string(),
            tag: tag.to_string(),
            entries: entries.to_vec(),
        });
        Ok(digest)
    }
}
