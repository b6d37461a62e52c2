//! Errors raised while configuring and running reconciliation passes.

use camino::Utf8PathBuf;
use registry::{CredentialError, RegistryError};

use crate::ledger::Key;

/// The configuration cannot be used. Raised before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// An architecture list was empty
    #[error("list of '{0}' architectures not allowed to be empty")]
    EmptyArchitectures(&'static str),

    /// Selected architectures missing from the list of all architectures
    #[error("architectures {0} are selected but not listed in '-all'")]
    UnknownArchitectures(String),

    /// Concurrency limit of zero
    #[error("concurrency must be at least 1")]
    Concurrency,

    /// No registry domain given
    #[error("no registry domain given")]
    MissingDomain,

    /// The registry domain is malformed
    #[error(transparent)]
    Domain(RegistryError),

    /// The configuration file could not be read
    #[error("reading configuration file {path}")]
    Read {
        /// Configuration file path
        path: Utf8PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid
    #[error("parsing configuration file {path}")]
    Parse {
        /// Configuration file path
        path: Utf8PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml_edit::de::Error,
    },

    /// Registry credentials could not be read
    #[error("reading registry credentials")]
    Credentials(#[from] CredentialError),
}

/// The repository inventory could not be listed.
#[derive(Debug, thiserror::Error)]
#[error("listing repositories of {domain}")]
pub struct CatalogError {
    /// Registry domain
    pub domain: String,

    /// Underlying registry error
    #[source]
    pub source: RegistryError,
}

/// A scan unit failed, aborting the whole scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Tags of a repository could not be listed
    #[error("listing tags of {repository}")]
    Tags {
        /// Repository name
        repository: String,
        /// Underlying registry error
        #[source]
        source: RegistryError,
    },

    /// The digest of an architecture image could not be fetched
    #[error("fetching digest of {reference}")]
    Digest {
        /// `repository:tag`
        reference: String,
        /// Underlying registry error
        #[source]
        source: RegistryError,
    },

    /// The manifest list of a base repository could not be fetched
    #[error("fetching manifest list of {reference}")]
    ManifestList {
        /// `repository:tag`
        reference: String,
        /// Underlying registry error
        #[source]
        source: RegistryError,
    },

    /// A scan unit panicked
    #[error("scan unit panicked: {0}")]
    Panicked(String),

    /// The run was cancelled while scanning
    #[error("scan cancelled")]
    Cancelled,
}

/// Publishing one manifest list failed. Sibling records are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The record has no architecture images left to reference
    #[error("{key}: no architecture images to publish")]
    NoImages {
        /// The record's key
        key: Key,
    },

    /// An architecture image could not be resolved
    #[error("{key}: resolving {reference}")]
    Resolve {
        /// The record's key
        key: Key,
        /// The architecture image, `arch/repository:tag`
        reference: String,
        /// Underlying registry error
        #[source]
        source: RegistryError,
    },

    /// The manifest list could not be pushed
    #[error("{key}: pushing manifest list")]
    Push {
        /// The record's key
        key: Key,
        /// Underlying registry error
        #[source]
        source: RegistryError,
    },

    /// The docker tool could not be started
    #[error("{key}: running `{command}`")]
    Spawn {
        /// The record's key
        key: Key,
        /// The command line
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The docker tool exited unsuccessfully
    #[error("{key}: `{command}` failed with {status}: {output}")]
    Command {
        /// The record's key
        key: Key,
        /// The command line
        command: String,
        /// Exit status
        status: std::process::ExitStatus,
        /// Combined output
        output: String,
    },

    /// The docker manifest scratch space could not be removed
    #[error("removing {path}")]
    Scratch {
        /// The scratch directory
        path: std::path::PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled while publishing
    #[error("{key}: publish cancelled")]
    Cancelled {
        /// The record's key
        key: Key,
    },
}

/// A reconciliation pass failed. Always fatal to the run loop.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// The repository inventory was unavailable
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A scan unit failed
    #[error(transparent)]
    Scan(ScanError),

    /// The publish backend could not be prepared
    #[error("preparing publish backend")]
    Prepare(#[source] PublishError),

    /// At least one record failed to publish
    #[error("{failed} of {attempted} manifest lists failed to publish")]
    Publish {
        /// Number of failed records
        failed: usize,
        /// Number of records attempted
        attempted: usize,
        /// The individual failures, in key order
        errors: Vec<PublishError>,
    },

    /// The pass was interrupted by cancellation
    #[error("pass cancelled")]
    Cancelled,
}

impl From<ScanError> for PassError {
    fn from(error: ScanError) -> Self {
        match error {
            ScanError::Cancelled => PassError::Cancelled,
            error => PassError::Scan(error),
        }
    }
}
