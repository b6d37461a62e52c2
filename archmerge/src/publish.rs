//! Building and publishing manifest lists.
//!
//! [`compose`] resolves the architecture images of an [`UpdateRecord`] into a
//! platform-sorted [`Composition`]. An [`IndexPusher`] then writes it, either
//! through the registry API ([`RegistryPusher`]) or the `docker manifest`
//! tool ([`DockerPusher`]). [`DryRun`] wraps either and only prints.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use registry::{media_types, Descriptor, DockerConfig, IndexEntry, Platform, Reference};

use crate::detect::UpdateRecord;
use crate::error::PublishError;
use crate::ledger::Key;
use crate::source::SharedRegistry;

/// Where dry-run output and command echoes are written.
pub type Console = Arc<Mutex<dyn Write + Send>>;

/// A console writing to standard output.
pub fn stdout() -> Console {
    Arc::new(Mutex::new(std::io::stdout()))
}

/// One manifest list entry being added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addendum {
    /// Architecture prefix the image was found under
    pub architecture: String,

    /// Repository holding the image, `<arch>/<repository>`
    pub source: String,

    /// The image, with its platform
    pub descriptor: Descriptor,
}

impl Addendum {
    /// The platform, as listed in the manifest list.
    pub fn platform(&self) -> String {
        self.descriptor
            .platform
            .as_ref()
            .map(Platform::to_string)
            .unwrap_or_default()
    }
}

/// Sort addenda by platform, then digest, so equal inputs give equal lists.
pub fn sort_addenda(addenda: &mut [Addendum]) {
    addenda.sort_by(|a, b| {
        a.platform()
            .cmp(&b.platform())
            .then_with(|| a.descriptor.digest.cmp(&b.descriptor.digest))
    });
}

/// A manifest list ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    /// Registry domain
    pub domain: String,

    /// The base repository and tag to write
    pub key: Key,

    /// Entries, sorted by platform
    pub addenda: Vec<Addendum>,
}

impl Composition {
    /// Reference to the list being written.
    pub fn target(&self) -> Reference {
        Reference::tagged(&self.domain, &self.key.repository, &self.key.tag)
    }

    /// Reference to the image behind one entry.
    pub fn source(&self, addendum: &Addendum) -> Reference {
        Reference::digested(
            &self.domain,
            &addendum.source,
            addendum.descriptor.digest.clone(),
        )
    }

    /// Entries as the registry client takes them.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.addenda
            .iter()
            .map(|addendum| IndexEntry {
                source_repository: addendum.source.clone(),
                descriptor: addendum.descriptor.clone(),
            })
            .collect()
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.target())?;
        for addendum in &self.addenda {
            writeln!(
                f,
                "  {} {} {}",
                addendum.platform(),
                addendum.descriptor.digest,
                self.source(addendum)
            )?;
        }
        Ok(())
    }
}

/// Resolve the architecture images of a record into a sorted composition.
///
/// Carried entries are kept as listed, from the base repository. Reads only.
/// Fails if the record has no images or any image cannot be resolved.
#[tracing::instrument(skip_all, fields(key = %record.key))]
pub async fn compose(
    registry: &SharedRegistry,
    record: &UpdateRecord,
) -> Result<Composition, PublishError> {
    if record.architectures.is_empty() {
        return Err(PublishError::NoImages {
            key: record.key.clone(),
        });
    }

    let mut addenda = Vec::with_capacity(record.architectures.len() + record.carried.len());
    for architecture in &record.architectures {
        let source = format!("{architecture}/{}", record.key.repository);
        let mut descriptor = registry
            .image(&source, &record.key.tag)
            .await
            .map_err(|error| PublishError::Resolve {
                key: record.key.clone(),
                reference: format!("{source}:{}", record.key.tag),
                source: error,
            })?;

        if descriptor.platform.is_none() {
            tracing::warn!(%source, "image has no platform, assuming linux/{architecture}");
            descriptor.platform = Some(Platform::new("linux", architecture.as_str()));
        }

        addenda.push(Addendum {
            architecture: architecture.clone(),
            source,
            descriptor,
        });
    }

    for descriptor in &record.carried {
        let architecture = descriptor
            .platform
            .as_ref()
            .map(|platform| platform.architecture.clone())
            .unwrap_or_default();
        tracing::info!(
            digest = %descriptor.digest,
            "keeping listed {architecture} entry, architecture not selected"
        );
        addenda.push(Addendum {
            architecture,
            source: record.key.repository.clone(),
            descriptor: descriptor.clone(),
        });
    }

    sort_addenda(&mut addenda);

    Ok(Composition {
        domain: registry.domain().to_string(),
        key: record.key.clone(),
        addenda,
    })
}

/// Resolve and publish one record.
pub async fn publish(
    registry: &SharedRegistry,
    pusher: &dyn IndexPusher,
    record: &UpdateRecord,
) -> Result<Composition, PublishError> {
    let composition = compose(registry, record).await?;
    pusher.push(&composition).await?;
    Ok(composition)
}

/// A way of writing manifest lists.
#[async_trait::async_trait]
pub trait IndexPusher: fmt::Debug + Send + Sync {
    /// Run once per pass before the first push.
    async fn prepare(&self) -> Result<(), PublishError> {
        Ok(())
    }

    /// Describe what [`IndexPusher::prepare`] does.
    fn prepare_actions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Write one manifest list, replacing whatever the tag held.
    async fn push(&self, composition: &Composition) -> Result<(), PublishError>;

    /// Describe what [`IndexPusher::push`] does for a composition.
    fn actions(&self, composition: &Composition) -> Vec<String>;
}

/// Publishes through the registry API.
#[derive(Debug, Clone)]
pub struct RegistryPusher {
    registry: SharedRegistry,
}

impl RegistryPusher {
    /// Publish to `registry`.
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl IndexPusher for RegistryPusher {
    async fn push(&self, composition: &Composition) -> Result<(), PublishError> {
        let digest = self
            .registry
            .push_index(
                &composition.key.repository,
                &composition.key.tag,
                &composition.entries(),
            )
            .await
            .map_err(|source| PublishError::Push {
                key: composition.key.clone(),
                source,
            })?;

        tracing::info!(%digest, "published {}", composition.target());
        Ok(())
    }

    fn actions(&self, composition: &Composition) -> Vec<String> {
        let target = composition.target();
        let mut actions: Vec<String> = composition
            .addenda
            .iter()
            .filter(|addendum| addendum.source != target.repository)
            .map(|addendum| {
                format!(
                    "copy {} -> {}/{}",
                    composition.source(addendum),
                    target.domain,
                    target.repository
                )
            })
            .collect();
        actions.push(format!(
            "put {target} ({}, {} manifests)",
            media_types::DOCKER_MANIFEST_LIST,
            composition.addenda.len()
        ));
        actions
    }
}

/// Publishes by running `docker manifest create` and `docker manifest push`.
#[derive(Debug, Clone)]
pub struct DockerPusher {
    program: String,
    insecure: bool,
    scratch: Option<PathBuf>,
}

impl DockerPusher {
    /// Run the `docker` found on `PATH`.
    pub fn new(insecure: bool) -> Self {
        let scratch = DockerConfig::default_path()
            .and_then(|config| config.parent().map(|dir| dir.join("manifests")));

        Self {
            program: "docker".to_string(),
            insecure,
            scratch,
        }
    }

    /// Run a different program in place of `docker`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Clear a different scratch directory before each pass.
    pub fn with_scratch(mut self, scratch: Option<PathBuf>) -> Self {
        self.scratch = scratch;
        self
    }

    /// Arguments for `docker manifest create`.
    pub fn create_args(&self, composition: &Composition) -> Vec<String> {
        let mut args = vec!["manifest".to_string(), "create".to_string()];
        if self.insecure {
            args.push("--insecure".to_string());
        }
        args.push("--amend".to_string());
        args.push(composition.target().to_string());
        args.extend(
            composition
                .addenda
                .iter()
                .map(|addendum| composition.source(addendum).to_string()),
        );
        args
    }

    /// Arguments for `docker manifest push`.
    pub fn push_args(&self, composition: &Composition) -> Vec<String> {
        let mut args = vec!["manifest".to_string(), "push".to_string()];
        if self.insecure {
            args.push("--insecure".to_string());
        }
        args.push(composition.target().to_string());
        args
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    async fn execute(&self, key: &Key, args: Vec<String>) -> Result<(), PublishError> {
        let command = self.command_line(&args);
        tracing::info!("executing {command}");

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| PublishError::Spawn {
                key: key.clone(),
                command: command.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(PublishError::Command {
                key: key.clone(),
                command,
                status: output.status,
                output: combined,
            });
        }

        tracing::info!(output = %combined, "{command}");
        Ok(())
    }
}

#[async_trait::async_trait]
impl IndexPusher for DockerPusher {
    async fn prepare(&self) -> Result<(), PublishError> {
        let Some(scratch) = &self.scratch else {
            return Ok(());
        };

        match tokio::fs::remove_dir_all(scratch).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PublishError::Scratch {
                path: scratch.clone(),
                source,
            }),
        }
    }

    fn prepare_actions(&self) -> Vec<String> {
        self.scratch
            .iter()
            .map(|scratch| format!("rm -rf {}", scratch.display()))
            .collect()
    }

    async fn push(&self, composition: &Composition) -> Result<(), PublishError> {
        self.execute(&composition.key, self.create_args(composition))
            .await?;
        self.execute(&composition.key, self.push_args(composition))
            .await
    }

    fn actions(&self, composition: &Composition) -> Vec<String> {
        vec![
            self.command_line(&self.create_args(composition)),
            self.command_line(&self.push_args(composition)),
        ]
    }
}

/// Prints what another pusher would do, without doing it.
pub struct DryRun {
    inner: Arc<dyn IndexPusher>,
    console: Console,
}

impl fmt::Debug for DryRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryRun").field("inner", &self.inner).finish()
    }
}

impl DryRun {
    /// Describe `inner`'s actions on `console`.
    pub fn new(inner: Arc<dyn IndexPusher>, console: Console) -> Self {
        Self { inner, console }
    }
}

#[async_trait::async_trait]
impl IndexPusher for DryRun {
    async fn prepare(&self) -> Result<(), PublishError> {
        let mut console = self.console.lock();
        for action in self.inner.prepare_actions() {
            let _ = writeln!(console, "{action}");
        }
        Ok(())
    }

    fn prepare_actions(&self) -> Vec<String> {
        self.inner.prepare_actions()
    }

    async fn push(&self, composition: &Composition) -> Result<(), PublishError> {
        let mut text = composition.to_string();
        for action in self.inner.actions(composition) {
            text.push_str(&action);
            text.push('\n');
        }

        let _ = self.console.lock().write_all(text.as_bytes());
        Ok(())
    }

    fn actions(&self, composition: &Composition) -> Vec<String> {
        self.inner.actions(composition)
    }
}
