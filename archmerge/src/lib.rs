//! # archmerge
//!
//! Keeps multi-architecture manifest lists in a container registry in step
//! with the per-architecture images they are built from.
//!
//! Build pipelines push `amd64/app:v1`, `arm64/app:v1` and so on. Each pass
//! of a [`Reconciler`] scans the registry, counts every architecture image
//! digest against the entries of the published `app:v1` list, and republishes
//! the lists whose counts do not balance.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use archmerge::config::Settings;
//! use archmerge::publish::RegistryPusher;
//! use archmerge::{Reconciler, SharedRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Settings {
//!     domain: Some("registry.example.com".into()),
//!     ..Default::default()
//! }
//! .validate()?;
//!
//! let registry: SharedRegistry = Arc::new(registry::RegistryClient::builder(&config.domain).build()?);
//! let pusher = Arc::new(RegistryPusher::new(registry.clone()));
//! Reconciler::new(registry, pusher, config.options())
//!     .run(CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod arch;
pub mod config;
pub mod detect;
pub mod error;
pub mod group;
pub mod ledger;
pub mod memory;
pub mod publish;
pub mod run;
pub mod scan;
pub mod source;

pub use arch::{classify, Architectures, Classification};
pub use detect::{detect, UpdateRecord};
pub use error::{CatalogError, ConfigurationError, PassError, PublishError, ScanError};
pub use ledger::{DecrementPolicy, Key, Ledger};
pub use publish::{compose, publish, Composition, IndexPusher};
pub use run::{Options, PassSummary, Reconciler};
pub use scan::{scan, Scan, ScanOptions};
pub use source::{Registry, SharedRegistry};
