//! Helm chart repository source.
//!
//! Lists charts from the repository's `index.yaml` and downloads packaged
//! charts from the URLs it references. The parsed index is cached between
//! [`list_catalog`](ArtifactSource::list_catalog) and the fetches of the same
//! pass.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use chart_sync_core::models::{Artifact, SourceRef};
use chart_sync_core::source::{ArtifactSource, Catalog};
use chart_sync_core::version::newest_first;

use crate::chart::{read_chart_archive, verify_digest};
use crate::config::HttpSourceConfig;
use crate::fetch::{build_client, get_bytes, Retry};

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

/// One chart version as listed in `index.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub app_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub created: Option<String>,
}

impl IndexEntry {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Unquoted YAML scalars such as `version: 1.10` arrive as numbers.
fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value).unwrap_or_default())
}

fn optional_scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value))
}

/// Parse an index document, sorting every chart's versions newest-first.
pub fn parse_index(content: &str) -> Result<BTreeMap<String, Vec<IndexEntry>>> {
    let index: IndexFile = serde_yaml::from_str(content).context("index.yaml is not valid")?;
    let mut entries = index.entries;
    for versions in entries.values_mut() {
        versions.retain(|e| !e.version.is_empty());
        versions.sort_by(|a, b| newest_first(&a.version, &b.version));
    }
    entries.retain(|_, versions| !versions.is_empty());
    Ok(entries)
}

pub struct HttpChartSource {
    source: SourceRef,
    base: Url,
    client: Client,
    username: Option<String>,
    password: Option<String>,
    retry: Retry,
    entries: RwLock<BTreeMap<String, Vec<IndexEntry>>>,
}

impl HttpChartSource {
    pub fn new(source: SourceRef, config: &HttpSourceConfig) -> Result<Self> {
        let mut raw = config.url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw)
            .with_context(|| format!("invalid repository URL '{}'", config.url))?;
        Ok(Self {
            source,
            base,
            client: build_client(config.timeout_secs, config.allow_insecure)?,
            username: config.username.clone(),
            password: config.password.clone(),
            retry: Retry::default(),
            entries: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// Credentials go only to URLs on the repository's own host.
    fn auth_for(&self, url: &Url) -> Option<(&str, Option<&str>)> {
        let user = self.username.as_deref()?;
        let same_origin = url.host_str() == self.base.host_str()
            && url.port_or_known_default() == self.base.port_or_known_default();
        if same_origin {
            Some((user, self.password.as_deref()))
        } else {
            None
        }
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>> {
        get_bytes(&self.client, &self.retry, url.as_str(), self.auth_for(url)).await
    }
}

#[async_trait]
impl ArtifactSource for HttpChartSource {
    fn source_ref(&self) -> &SourceRef {
        &self.source
    }

    async fn list_catalog(&self) -> Result<Catalog> {
        let index_url = self.base.join("index.yaml")?;
        let bytes = self.download(&index_url).await.with_context(|| {
            format!("{} is not a valid chart repository or cannot be reached", self.base)
        })?;
        let content = String::from_utf8(bytes).context("index.yaml is not valid UTF-8")?;
        let entries = parse_index(&content)?;

        let catalog: Catalog = entries
            .iter()
            .map(|(name, versions)| {
                (
                    name.clone(),
                    versions.iter().map(|e| e.version.clone()).collect(),
                )
            })
            .collect();
        debug!(source = %self.source, charts = catalog.len(), "index loaded");
        *self.entries.write().await = entries;
        Ok(catalog)
    }

    async fn fetch_artifact(&self, name: &str, version: &str) -> Result<Artifact> {
        let entry = {
            let entries = self.entries.read().await;
            entries
                .get(name)
                .and_then(|versions| versions.iter().find(|e| e.version == version))
                .cloned()
                .ok_or_else(|| anyhow!("{} {} is not in the loaded index", name, version))?
        };
        let Some(first) = entry.urls.first() else {
            bail!("index entry for {} {} has no download URL", name, version);
        };
        let chart_url = self
            .base
            .join(first)
            .with_context(|| format!("resolving chart URL '{}'", first))?;

        let bytes = self.download(&chart_url).await?;
        verify_digest(&bytes, &entry.digest)
            .with_context(|| format!("verifying {}", chart_url))?;
        let mut chart =
            read_chart_archive(&bytes).with_context(|| format!("reading {}", chart_url))?;

        if entry.app_version.is_some() {
            chart.metadata.app_version = entry.app_version.clone();
        }
        if entry.description.is_some() {
            chart.metadata.description = entry.description.clone();
        }
        if entry.icon.is_some() {
            chart.metadata.icon = entry.icon.clone();
        }
        if entry.home.is_some() {
            chart.metadata.home = entry.home.clone();
        }
        chart.metadata.deprecated |= entry.deprecated;

        let created = entry.created_at();
        Ok(chart.into_artifact(entry.digest, created))
    }
}
