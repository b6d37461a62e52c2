//! # OCI Container Registry Client
//!
//! A client for the [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec),
//! covering what is needed to read per-platform images and publish manifest lists:
//!
//! - Repository catalog and tag listing, with `Link` header pagination
//! - Manifest and blob retrieval with digest verification
//! - Cross-repository blob mounts, manifest and manifest list pushes
//! - Anonymous, basic and bearer token authentication
//! - Credentials from the docker CLI configuration
//!
//! ## Example
//!
//! ```no_run
//! use registry::{DockerConfig, RegistryClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RegistryClient::builder("registry.example.com")
//!     .credentials_from(&DockerConfig::from_env()?)?
//!     .build()?;
//!
//! for repository in client.catalog().await? {
//!     println!("{repository}: {:?}", client.tags(&repository).await?);
//! }
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
pub mod credentials;
mod error;
pub mod manifest;
pub mod mock;
mod paginate;
mod reference;
mod retry;

pub use auth::{basic_auth, Challenge};
pub use client::{IndexEntry, RegistryClient, RegistryClientBuilder, RegistryService};
pub use credentials::{
    CredentialError, CredentialProvider, Credentials, DockerConfig, Secret, StaticCredentials,
};
pub use error::{BoxError, ErrorCode, ErrorDetail, RegistryError, RegistryResult, ResponseError};
pub use manifest::{media_types, Descriptor, Digest, ManifestList, Platform};
pub use reference::{validate_domain, validate_repository, Reference, Target};
pub use retry::Backoff;
