//! Manifest, index and image configuration types from the OCI image and
//! Docker distribution specifications.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::{RegistryError, RegistryResult};

/// Media types understood by the registry client.
pub mod media_types {
    /// Docker image manifest, schema 2
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

    /// Docker manifest list (the multi-architecture index)
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";

    /// Legacy Docker image manifest, schema 1
    pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";

    /// Legacy signed Docker image manifest, schema 1
    pub const DOCKER_MANIFEST_V1_SIGNED: &str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";

    /// OCI image manifest
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

    /// Accept header value for requests that may resolve to any manifest kind.
    pub const ACCEPT_ANY: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
        application/vnd.oci.image.index.v1+json, \
        application/vnd.docker.distribution.manifest.v2+json, \
        application/vnd.oci.image.manifest.v1+json";

    /// Accept header value for requests that must resolve to a single image.
    pub const ACCEPT_IMAGE: &str = "application/vnd.docker.distribution.manifest.v2+json, \
        application/vnd.oci.image.manifest.v1+json";
}

/// What kind of object a manifest media type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// A single-platform image manifest
    Image,

    /// A multi-platform manifest list or index
    List,
}

impl ManifestKind {
    /// Classify a manifest media type.
    pub fn of(media_type: &str) -> RegistryResult<Self> {
        match media_type {
            media_types::DOCKER_MANIFEST
            | media_types::OCI_MANIFEST
            | media_types::DOCKER_MANIFEST_V1
            | media_types::DOCKER_MANIFEST_V1_SIGNED => Ok(ManifestKind::Image),
            media_types::DOCKER_MANIFEST_LIST | media_types::OCI_INDEX => Ok(ManifestKind::List),
            _ => Err(RegistryError::UnsupportedManifestType(
                media_type.to_string(),
            )),
        }
    }
}

/// Detect the manifest media type from its content.
///
/// Used when a registry answers without a usable `Content-Type`.
pub fn detect_media_type(data: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Some(media_type) = json.get("mediaType").and_then(|v| v.as_str()) {
            return media_type.to_string();
        }

        if let Some(schema_version) = json.get("schemaVersion").and_then(|v| v.as_u64()) {
            return match schema_version {
                1 => media_types::DOCKER_MANIFEST_V1.to_string(),
                2 if json.get("manifests").is_some() => media_types::OCI_INDEX.to_string(),
                _ => media_types::OCI_MANIFEST.to_string(),
            };
        }
    }

    media_types::OCI_MANIFEST.to_string()
}

/// A content digest, `algorithm:hex`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Compute the sha256 digest of some content.
    pub fn sha256(data: &[u8]) -> Self {
        Digest(format!("sha256:{}", hex::encode(sha2::Sha256::digest(data))))
    }

    /// The digest algorithm, e.g. `sha256`.
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    /// The hex encoded hash.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or_default()
    }

    /// Check that `data` hashes to this digest.
    ///
    /// Only sha256 can be verified, other algorithms are accepted as-is.
    pub fn verify(&self, data: &[u8]) -> RegistryResult<()> {
        if self.algorithm() != "sha256" {
            return Ok(());
        }

        let actual = Digest::sha256(data);
        if &actual != self {
            return Err(RegistryError::DigestMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// The digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((algorithm, encoded)) = s.split_once(':') else {
            return Err(RegistryError::InvalidDigest(s.to_string()));
        };

        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
        let encoded_ok = !encoded.is_empty()
            && encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "=_-".contains(c));
        let length_ok = algorithm != "sha256" || encoded.len() == 64;

        if algorithm_ok && encoded_ok && length_ok {
            Ok(Digest(s.to_string()))
        } else {
            Err(RegistryError::InvalidDigest(s.to_string()))
        }
    }
}

impl TryFrom<String> for Digest {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The platform an image was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`
    pub architecture: String,

    /// Operating system, e.g. `linux`
    pub os: String,

    /// Operating system version, used by Windows images
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    /// CPU variant, e.g. `v8` for `arm64`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Create a platform for an operating system and architecture.
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            os_version: None,
            variant: None,
        }
    }

    /// Set the CPU variant.
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }
}

/// Renders as `os/architecture[/variant][:os.version]`.
impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = self.variant.as_deref().filter(|v| !v.is_empty()) {
            write!(f, "/{variant}")?;
        }
        if let Some(version) = self.os_version.as_deref().filter(|v| !v.is_empty()) {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

/// A reference to content stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    pub media_type: String,

    /// Digest of the referenced content
    pub digest: Digest,

    /// Size of the referenced content in bytes
    pub size: u64,

    /// Platform of the referenced image, set for index entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// A Docker manifest list or OCI image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    /// Always 2
    pub schema_version: u32,

    /// Media type of this list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// The platform-specific manifests
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl ManifestList {
    /// An empty Docker manifest list.
    pub fn new() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_types::DOCKER_MANIFEST_LIST.to_string()),
            manifests: Vec::new(),
        }
    }

    /// Append a manifest to the list.
    pub fn push(&mut self, descriptor: Descriptor) {
        self.manifests.push(descriptor);
    }

    /// The media type this list should be stored with.
    pub fn content_type(&self) -> &str {
        self.media_type
            .as_deref()
            .unwrap_or(media_types::DOCKER_MANIFEST_LIST)
    }

    /// Serialize the list in its canonical JSON form.
    pub fn to_vec(&self) -> RegistryResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| RegistryError::Json {
            what: "manifest list",
            source,
        })
    }
}

impl Default for ManifestList {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-platform image manifest (Docker schema 2 or OCI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always 2
    pub schema_version: u32,

    /// Media type of this manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// The image configuration blob
    pub config: Descriptor,

    /// The filesystem layers
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Every blob referenced by this manifest, config first.
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// The parts of an image configuration blob describing its platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    /// CPU architecture
    #[serde(default)]
    pub architecture: String,

    /// Operating system
    #[serde(default)]
    pub os: String,

    /// Operating system version
    #[serde(rename = "os.version", default)]
    pub os_version: Option<String>,

    /// CPU variant
    #[serde(default)]
    pub variant: Option<String>,
}

impl ImageConfig {
    /// The platform this configuration describes.
    pub fn platform(&self) -> Platform {
        Platform {
            architecture: self.architecture.clone(),
            os: self.os.clone(),
            os_version: self.os_version.clone().filter(|v| !v.is_empty()),
            variant: self.variant.clone().filter(|v| !v.is_empty()),
        }
    }
}

/// A manifest as fetched from the registry, before interpretation.
#[derive(Debug, Clone)]
pub struct RawManifest {
    /// Media type reported by the registry, or detected from the content
    pub media_type: String,

    /// Digest of the manifest bytes
    pub digest: Digest,

    /// The manifest bytes exactly as stored
    pub data: bytes::Bytes,
}

impl RawManifest {
    /// Size of the manifest in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether this is a single image or a list.
    pub fn kind(&self) -> RegistryResult<ManifestKind> {
        ManifestKind::of(&self.media_type)
    }

    /// Interpret the manifest as a list or index.
    pub fn list(&self) -> RegistryResult<ManifestList> {
        serde_json::from_slice(&self.data).map_err(|source| RegistryError::Json {
            what: "manifest list",
            source,
        })
    }

    /// Interpret the manifest as a single image manifest.
    pub fn image(&self) -> RegistryResult<ImageManifest> {
        serde_json::from_slice(&self.data).map_err(|source| RegistryError::Json {
            what: "image manifest",
            source,
        })
    }

    /// A descriptor pointing at this manifest.
    pub fn descriptor(&self, platform: Option<Platform>) -> Descriptor {
        Descriptor {
            media_type: self.media_type.clone(),
            digest: self.digest.clone(),
            size: self.size(),
            platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn digest_of_empty_content() {
        assert_eq!(Digest::sha256(b"").as_str(), EMPTY_SHA256);
    }

    #[test]
    fn digest_parsing() {
        let digest: Digest = EMPTY_SHA256.parse().unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert!(digest.verify(b"").is_ok());
        assert!(matches!(
            digest.verify(b"not empty"),
            Err(RegistryError::DigestMismatch { .. })
        ));

        assert!("sha256".parse::<Digest>().is_err());
        assert!("sha256:abc".parse::<Digest>().is_err());
        assert!("SHA256:abc".parse::<Digest>().is_err());
    }

    #[test]
    fn platform_display() {
        assert_eq!(Platform::new("linux", "amd64").to_string(), "linux/amd64");
        assert_eq!(
            Platform::new("linux", "arm64").with_variant("v8").to_string(),
            "linux/arm64/v8"
        );

        let windows = Platform {
            os_version: Some("10.0.17763.1".into()),
            ..Platform::new("windows", "amd64")
        };
        assert_eq!(windows.to_string(), "windows/amd64:10.0.17763.1");
    }

    #[test]
    fn manifest_kinds() {
        assert_eq!(
            ManifestKind::of(media_types::OCI_INDEX).unwrap(),
            ManifestKind::List
        );
        assert_eq!(
            ManifestKind::of(media_types::DOCKER_MANIFEST).unwrap(),
            ManifestKind::Image
        );
        assert!(ManifestKind::of("text/plain").is_err());
    }

    #[test]
    fn detect_list_without_media_type() {
        let data = br#"{"schemaVersion": 2, "manifests": []}"#;
        assert_eq!(detect_media_type(data), media_types::OCI_INDEX);

        let data = br#"{"schemaVersion": 2, "mediaType": "application/vnd.docker.distribution.manifest.v2+json"}"#;
        assert_eq!(detect_media_type(data), media_types::DOCKER_MANIFEST);
    }

    #[test]
    fn manifest_list_wire_format() {
        let mut list = ManifestList::new();
        list.push(Descriptor {
            media_type: media_types::DOCKER_MANIFEST.into(),
            digest: EMPTY_SHA256.parse().unwrap(),
            size: 528,
            platform: Some(Platform::new("linux", "amd64")),
        });

        let json: serde_json::Value = serde_json::from_slice(&list.to_vec().unwrap()).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["mediaType"], media_types::DOCKER_MANIFEST_LIST);
        assert_eq!(json["manifests"][0]["digest"], EMPTY_SHA256);
        assert_eq!(json["manifests"][0]["platform"]["architecture"], "amd64");
        assert!(json["manifests"][0]["platform"].get("variant").is_none());
    }

    #[test]
    fn image_config_platform() {
        let config: ImageConfig = serde_json::from_str(
            r#"{"architecture": "arm64", "os": "linux", "variant": "v8", "rootfs": {}}"#,
        )
        .unwrap();
        assert_eq!(config.platform().to_string(), "linux/arm64/v8");
    }
}
