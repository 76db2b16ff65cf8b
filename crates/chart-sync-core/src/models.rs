//! Core data models used throughout chart-sync.
//!
//! These types represent the applications and version records that flow
//! from a chart source through the reconciliation engine into a store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of chart source an application is mirrored from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HTTP chart repository serving an `index.yaml`.
    Http,
    /// OCI-compliant registry serving charts as artifacts.
    Oci,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Http => "http",
            SourceKind::Oci => "oci",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(SourceKind::Http),
            "oci" => Some(SourceKind::Oci),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the source an application belongs to.
///
/// An application comes from exactly one chart repository or exactly one
/// OCI registry, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceRef {
    ChartRepo(String),
    OciRegistry(String),
}

impl SourceRef {
    pub fn new(kind: SourceKind, id: impl Into<String>) -> Self {
        match kind {
            SourceKind::Http => SourceRef::ChartRepo(id.into()),
            SourceKind::Oci => SourceRef::OciRegistry(id.into()),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRef::ChartRepo(_) => SourceKind::Http,
            SourceRef::OciRegistry(_) => SourceKind::Oci,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            SourceRef::ChartRepo(id) | SourceRef::OciRegistry(id) => id,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// A locally tracked application (chart) mirrored from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub source: SourceRef,
    pub active: bool,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Application {
    /// A not-yet-persisted active application. The id is assigned by the store.
    pub fn new(source: SourceRef, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            source,
            active: true,
            created_on: now,
            updated_on: now,
        }
    }
}

/// Upstream chart metadata carried alongside each version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
}

/// Parsed payload of one chart version as returned by a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifact {
    pub metadata: ChartMetadata,
    pub raw_values: String,
    pub readme: String,
    pub values_schema_json: String,
    pub notes: String,
    pub digest: String,
    /// Creation time reported by the source, if any.
    pub created: Option<DateTime<Utc>>,
}

/// A version record ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub application_id: i64,
    pub version: String,
    pub chart_name: String,
    pub app_version: Option<String>,
    pub description: Option<String>,
    pub digest: String,
    pub icon: Option<String>,
    pub home: Option<String>,
    pub deprecated: bool,
    pub values_json: String,
    pub chart_json: String,
    pub raw_values: String,
    pub readme: String,
    pub values_schema_json: String,
    pub notes: String,
    pub created: DateTime<Utc>,
    pub fetched_on: DateTime<Utc>,
}

/// A stored version record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionRecord {
    pub id: i64,
    pub application_id: i64,
    pub version: String,
    pub chart_name: String,
    pub app_version: Option<String>,
    pub description: Option<String>,
    pub digest: String,
    pub icon: Option<String>,
    pub home: Option<String>,
    pub deprecated: bool,
    pub values_json: String,
    pub chart_json: String,
    pub raw_values: String,
    pub readme: String,
    pub values_schema_json: String,
    pub notes: String,
    pub latest: bool,
    pub created: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl VersionRecord {
    /// Copy of the identity, latest flag and timestamps with every payload
    /// field left empty.
    pub fn summary(&self) -> Self {
        Self {
            id: self.id,
            application_id: self.application_id,
            version: self.version.clone(),
            latest: self.latest,
            created: self.created,
            created_on: self.created_on,
            updated_on: self.updated_on,
            ..Self::default()
        }
    }

    /// Materialise a stored record from an inserted [`NewVersion`].
    pub fn from_new(id: i64, new: NewVersion) -> Self {
        Self {
            id,
            application_id: new.application_id,
            version: new.version,
            chart_name: new.chart_name,
            app_version: new.app_version,
            description: new.description,
            digest: new.digest,
            icon: new.icon,
            home: new.home,
            deprecated: new.deprecated,
            values_json: new.values_json,
            chart_json: new.chart_json,
            raw_values: new.raw_values,
            readme: new.readme,
            values_schema_json: new.values_schema_json,
            notes: new.notes,
            latest: false,
            created: new.created,
            created_on: new.fetched_on,
            updated_on: new.fetched_on,
        }
    }
}
