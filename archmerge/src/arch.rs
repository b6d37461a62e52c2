//! Classifying repositories by their architecture prefix.
//!
//! Per-architecture images live under `<arch>/<repository>`, the merged
//! manifest list under `<repository>`. The first path segment decides which
//! one a repository is.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::ConfigurationError;

/// The outcome of classifying a repository's first path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The architecture prefix, empty for base repositories
    pub architecture: String,

    /// Whether the repository is scanned this run
    pub process: bool,
}

impl Classification {
    /// Whether this is a base repository rather than an architecture one.
    pub fn is_base(&self) -> bool {
        self.architecture.is_empty()
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.process { "process" } else { "skip" };
        if self.is_base() {
            write!(f, "base, {verdict}")
        } else {
            write!(f, "arch {}, {verdict}", self.architecture)
        }
    }
}

/// Classify a repository by its first path segment.
///
/// Segments outside `all` are base repositories and always processed. Known
/// architectures are processed only when `selected`.
pub fn classify(
    first_segment: &str,
    all: &BTreeSet<String>,
    selected: &BTreeSet<String>,
) -> Classification {
    if !all.contains(first_segment) {
        return Classification {
            architecture: String::new(),
            process: true,
        };
    }

    Classification {
        architecture: first_segment.to_string(),
        process: selected.contains(first_segment),
    }
}

/// A classified repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<'r> {
    /// The classification of the first segment
    pub classification: Classification,

    /// The base repository: the remaining segments for architecture
    /// repositories, the whole name otherwise
    pub base: &'r str,
}

/// The architecture prefixes known to the registry, and those processed this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Architectures {
    all: BTreeSet<String>,
    selected: BTreeSet<String>,
}

impl Architectures {
    /// Validate and build the architecture sets.
    pub fn new<A, S>(all: A, selected: S) -> Result<Self, ConfigurationError>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let all: BTreeSet<String> = all.into_iter().map(Into::into).collect();
        let selected: BTreeSet<String> = selected.into_iter().map(Into::into).collect();

        if all.is_empty() {
            return Err(ConfigurationError::EmptyArchitectures("-all"));
        }
        if selected.is_empty() {
            return Err(ConfigurationError::EmptyArchitectures("-a"));
        }

        let unknown: Vec<&str> = selected.difference(&all).map(String::as_str).collect();
        if !unknown.is_empty() {
            return Err(ConfigurationError::UnknownArchitectures(unknown.join(",")));
        }

        Ok(Self { all, selected })
    }

    /// Every architecture prefix the registry may contain.
    pub fn all(&self) -> &BTreeSet<String> {
        &self.all
    }

    /// The architectures processed this run.
    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    /// Whether `architecture` is a known prefix.
    pub fn is_known(&self, architecture: &str) -> bool {
        self.all.contains(architecture)
    }

    /// Whether `architecture` is processed this run.
    pub fn is_selected(&self, architecture: &str) -> bool {
        self.selected.contains(architecture)
    }

    /// Classify a repository by its first path segment.
    pub fn classify(&self, first_segment: &str) -> Classification {
        classify(first_segment, &self.all, &self.selected)
    }

    /// Classify a repository and find its base repository.
    ///
    /// A repository named only by an architecture (`arm64`) has no base to
    /// merge into and is treated as a base repository itself.
    pub fn split<'r>(&self, repository: &'r str) -> Split<'r> {
        match repository.split_once('/') {
            Some((first, rest)) if !rest.is_empty() => Split {
                classification: self.classify(first),
                base: if self.is_known(first) { rest } else { repository },
            },
            _ => Split {
                classification: Classification {
                    architecture: String::new(),
                    process: true,
                },
                base: repository,
            },
        }
    }
}
