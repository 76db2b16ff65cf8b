//! Configuration parsing and validation.
//!
//! chart-sync reads a single TOML file (see `config/chart-sync.example.toml`).
//! A handful of environment variables override the `[sync]` table so the
//! same file can be reused across deployments.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use chart_sync_core::batch::DEFAULT_CHUNK_SIZE;
use chart_sync_core::latest::LatestRule;
use chart_sync_core::models::{SourceKind, SourceRef};

use crate::source_oci::RegistryRef;

/// Overrides `sync.provider`.
pub const ENV_PROVIDER: &str = "CHART_PROVIDER_ID";
/// Overrides `sync.chunk_size`.
pub const ENV_CHUNK_SIZE: &str = "APP_STORE_APPLICATION_VERSIONS_SAVE_CHUNK_SIZE";
/// Overrides `sync.parallelism`.
pub const ENV_PARALLELISM: &str = "PARALLELISM_LIMIT_FOR_TAG_PROCESSING";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Default selector when `sync` is run without one.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Concurrent tag fetches per OCI application; `0` is sequential.
    #[serde(default)]
    pub parallelism: usize,
    #[serde(default)]
    pub oci_tag_order: TagOrder,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            chunk_size: default_chunk_size(),
            parallelism: 0,
            oci_tag_order: TagOrder::default(),
        }
    }
}

fn default_provider() -> String {
    "*".to_string()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// How the newest tag of an OCI repository is determined.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TagOrder {
    /// Trust the registry to list the newest tag first.
    #[default]
    Registry,
    /// Pick the greatest tag by semantic version.
    Semver,
}

impl TagOrder {
    pub fn latest_rule(self) -> LatestRule {
        match self {
            TagOrder::Registry => LatestRule::SourceOrder,
            TagOrder::Semver => LatestRule::SemVer,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directives. `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: default_log_format(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub http: BTreeMap<String, HttpSourceConfig>,
    #[serde(default)]
    pub oci: BTreeMap<String, OciSourceConfig>,
}

/// A Helm chart repository serving `index.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpSourceConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub allow_insecure: bool,
    /// Mark charts that disappear from the index inactive.
    #[serde(default)]
    pub prune_missing: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// An OCI registry namespace and the chart repositories to mirror from it.
#[derive(Debug, Deserialize, Clone)]
pub struct OciSourceConfig {
    /// `oci://host[:port]/namespace`, scheme optional.
    pub registry_url: String,
    /// Repository names relative to the namespace, whitespace-trimmed.
    #[serde(deserialize_with = "trimmed_names")]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Talk plain HTTP to the registry.
    #[serde(default)]
    pub insecure: bool,
    /// Overrides `sync.oci_tag_order` for this registry.
    #[serde(default)]
    pub tag_order: Option<TagOrder>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn trimmed_names<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    Ok(names.into_iter().map(|n| n.trim().to_string()).collect())
}

impl Config {
    /// Parse and validate a TOML document without consulting the
    /// environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the `[sync]` environment overrides. `lookup` returns the value
    /// of a variable if it is set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup(ENV_PROVIDER).filter(|v| !v.trim().is_empty()) {
            self.sync.provider = provider.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_CHUNK_SIZE) {
            self.sync.chunk_size = raw
                .trim()
                .parse()
                .with_context(|| {
                    format!("{} must be a non-negative integer, got '{}'", ENV_CHUNK_SIZE, raw)
                })?;
        }
        if let Some(raw) = lookup(ENV_PARALLELISM) {
            self.sync.parallelism = raw
                .trim()
                .parse()
                .with_context(|| {
                    format!("{} must be a non-negative integer, got '{}'", ENV_PARALLELISM, raw)
                })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.chunk_size == 0 {
            bail!("sync.chunk_size must be > 0");
        }
        match self.log.format.as_str() {
            "text" | "json" => {}
            other => bail!("Unknown log.format: '{}'. Must be text or json.", other),
        }

        for (id, http) in &self.sources.http {
            validate_id("http", id)?;
            let url = url::Url::parse(&http.url)
                .with_context(|| format!("sources.http.{}.url is not a valid URL", id))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!(
                    "sources.http.{}.url must use http or https, got '{}'",
                    id,
                    url.scheme()
                );
            }
            if http.timeout_secs == 0 {
                bail!("sources.http.{}.timeout_secs must be > 0", id);
            }
        }

        for (id, oci) in &self.sources.oci {
            validate_id("oci", id)?;
            RegistryRef::parse(&oci.registry_url, oci.insecure)
                .with_context(|| format!("sources.oci.{}.registry_url is invalid", id))?;
            if oci.repositories.is_empty() {
                bail!("sources.oci.{}.repositories must not be empty", id);
            }
            let mut seen = HashSet::new();
            for name in &oci.repositories {
                if name.is_empty() {
                    bail!("sources.oci.{}.repositories contains an empty name", id);
                }
                if !seen.insert(name.as_str()) {
                    bail!("sources.oci.{}.repositories lists '{}' twice", id, name);
                }
            }
            if oci.timeout_secs == 0 {
                bail!("sources.oci.{}.timeout_secs must be > 0", id);
            }
        }
        Ok(())
    }

    /// Every configured source, HTTP first, each kind in id order.
    pub fn all_sources(&self) -> Vec<SourceRef> {
        let http = self
            .sources
            .http
            .keys()
            .map(|id| SourceRef::new(SourceKind::Http, id.as_str()));
        let oci = self
            .sources
            .oci
            .keys()
            .map(|id| SourceRef::new(SourceKind::Oci, id.as_str()));
        http.chain(oci).collect()
    }

    fn has_source(&self, source: &SourceRef) -> bool {
        match source {
            SourceRef::ChartRepo(id) => self.sources.http.contains_key(id),
            SourceRef::OciRegistry(id) => self.sources.oci.contains_key(id),
        }
    }

    /// Resolve a source selector against the configured sources.
    ///
    /// Accepted forms: `*` or `all`, a kind (`http`, `oci`), `kind:id`, or
    /// a bare id that is unique across both kinds.
    pub fn resolve_selector(&self, selector: &str) -> Result<Vec<SourceRef>> {
        let selector = selector.trim();
        match selector {
            "" => bail!("source selector must not be empty"),
            "*" | "all" => return Ok(self.all_sources()),
            _ => {}
        }
        if let Some(kind) = SourceKind::parse(selector) {
            return Ok(self
                .all_sources()
                .into_iter()
                .filter(|s| s.kind() == kind)
                .collect());
        }

        if let Some((kind, id)) = selector.split_once(':') {
            let kind = SourceKind::parse(kind).with_context(|| {
                format!(
                    "Unknown source kind '{}' in selector '{}'. Must be http or oci.",
                    kind, selector
                )
            })?;
            let source = SourceRef::new(kind, id);
            if !self.has_source(&source) {
                bail!("No {} source named '{}' is configured", kind, id);
            }
            return Ok(vec![source]);
        }

        let matches: Vec<SourceRef> = self
            .all_sources()
            .into_iter()
            .filter(|s| s.id() == selector)
            .collect();
        match matches.len() {
            0 => bail!("No source named '{}' is configured", selector),
            1 => Ok(matches),
            _ => bail!(
                "Source id '{}' is ambiguous; use http:{} or oci:{}",
                selector,
                selector,
                selector
            ),
        }
    }
}

fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() || id.contains(':') {
        bail!("sources.{} id '{}' must be non-empty and must not contain ':'", kind, id);
    }
    Ok(())
}

/// Read, parse, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = Config::from_toml_str(&content)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}
