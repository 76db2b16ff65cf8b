//! The artifact source capability.
//!
//! A source publishes named applications, each with a list of version
//! identifiers, and can fetch the parsed payload of any one version. The
//! engine treats HTTP chart repositories and OCI registries through this one
//! trait; only listing and fetching differ between them.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Artifact, SourceRef};

/// Published catalog of one source: application name → version identifiers.
///
/// Version lists keep the order the source returned them in. For OCI
/// registries that order is not guaranteed to be chronological.
pub type Catalog = BTreeMap<String, Vec<String>>;

#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// The source this instance reads from.
    fn source_ref(&self) -> &SourceRef;

    /// Names the source is configured to publish, if it declares them up
    /// front (an OCI repository allow-list). `None` means the catalog
    /// listing itself is authoritative.
    fn declared_names(&self) -> Option<Vec<String>> {
        None
    }

    /// List every application and its published versions.
    async fn list_catalog(&self) -> Result<Catalog>;

    /// Fetch and parse the payload of one version.
    async fn fetch_artifact(&self, name: &str, version: &str) -> Result<Artifact>;
}
