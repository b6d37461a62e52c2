//! Repository names and image references.

use std::fmt;

use crate::error::{RegistryError, RegistryResult};
use crate::manifest::Digest;

/// Validate a repository name against the distribution grammar:
/// `/`-separated components of lowercase alphanumerics joined by `.`, `_`, `__`
/// or runs of `-`.
pub fn validate_repository(name: &str) -> RegistryResult<()> {
    let invalid = || RegistryError::InvalidRepository(name.to_string());

    if name.is_empty() || name.len() > 255 {
        return Err(invalid());
    }

    for component in name.split('/') {
        let bytes = component.as_bytes();
        let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
            return Err(invalid());
        };
        if !is_alnum(*first) || !is_alnum(*last) {
            return Err(invalid());
        }

        let mut previous = b'a';
        for &c in bytes {
            match c {
                c if is_alnum(c) => {}
                b'-' => {}
                b'.' | b'_' if is_alnum(previous) || (c == b'_' && previous == b'_') => {}
                _ => return Err(invalid()),
            }
            previous = c;
        }
        if component.contains("..") || component.contains("___") {
            return Err(invalid());
        }
    }
    Ok(())
}

/// A registry domain is `host[:port]`, without scheme or path.
pub fn validate_domain(domain: &str) -> RegistryResult<()> {
    let invalid = || RegistryError::InvalidDomain(domain.to_string());

    if domain.is_empty() || domain.contains("://") || domain.contains('/') {
        return Err(invalid());
    }
    let authority: http::uri::Authority = domain.parse().map_err(|_| invalid())?;
    if authority.as_str().contains('@') {
        return Err(invalid());
    }
    Ok(())
}

fn is_alnum(c: u8) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

/// Tag or digest half of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A mutable tag
    Tag(String),

    /// An immutable digest
    Digest(Digest),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tag(tag) => f.write_str(tag),
            Target::Digest(digest) => fmt::Display::fmt(digest, f),
        }
    }
}

/// A fully qualified image reference, `domain/repository:tag` or
/// `domain/repository@digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Registry domain
    pub domain: String,

    /// Repository path
    pub repository: String,

    /// Tag or digest
    pub target: Target,
}

impl Reference {
    /// A tagged reference.
    pub fn tagged(
        domain: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            repository: repository.into(),
            target: Target::Tag(tag.into()),
        }
    }

    /// A reference pinned to a digest.
    pub fn digested(domain: impl Into<String>, repository: impl Into<String>, digest: Digest) -> Self {
        Self {
            domain: domain.into(),
            repository: repository.into(),
            target: Target::Digest(digest),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Tag(tag) => write!(f, "{}/{}:{}", self.domain, self.repository, tag),
            Target::Digest(digest) => write!(f, "{}/{}@{}", self.domain, self.repository, digest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_names() {
        for name in ["app", "amd64/app", "library/nginx", "a.b/c_d/e__f", "my-app--x"] {
            assert!(validate_repository(name).is_ok(), "{name} should be valid");
        }

        for name in ["", "App", "/app", "app/", "a//b", "-app", "a..b", "a_.b", "a___b"] {
            assert!(validate_repository(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn display_references() {
        let tagged = Reference::tagged("r.example:5000", "arm64/app", "v1");
        assert_eq!(tagged.to_string(), "r.example:5000/arm64/app:v1");

        let digest = crate::Digest::sha256(b"");
        let pinned = Reference::digested("r.example", "app", digest.clone());
        assert_eq!(pinned.to_string(), format!("r.example/app@{digest}"));
    }
}
