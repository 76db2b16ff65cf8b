//! OCI registry source.
//!
//! Speaks the distribution API directly: tags from
//! `/v2/<repo>/tags/list` (following `Link` pagination), the chart layer
//! located through the image manifest, and the layer fetched as a blob.
//! Registries that answer `401` with a Bearer challenge get a token from the
//! advertised realm; tokens are cached per scope for the life of the source.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, LINK, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use chart_sync_core::models::{Artifact, SourceRef};
use chart_sync_core::source::{ArtifactSource, Catalog};

use crate::chart::{read_chart_archive, verify_digest};
use crate::config::OciSourceConfig;
use crate::fetch::{build_client, ensure_success, send_with_retry, Retry};

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const CHART_LAYER_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
const LEGACY_CHART_LAYER_MEDIA_TYPE: &str = "application/tar+gzip";
const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";

/// A registry host plus the namespace charts live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRef {
    pub scheme: &'static str,
    /// `host` or `host:port`.
    pub host: String,
    /// Path prefix of every repository, possibly empty.
    pub namespace: String,
}

impl RegistryRef {
    /// Parse `oci://host[:port][/namespace]`. The scheme is optional; the
    /// registry is spoken to over `http` when `insecure` is set.
    pub fn parse(raw: &str, insecure: bool) -> Result<Self> {
        let trimmed = raw.trim();
        let rest = ["oci://", "https://", "http://"]
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed);
        let (host, namespace) = match rest.split_once('/') {
            Some((host, ns)) => (host, ns.trim_matches('/')),
            None => (rest, ""),
        };
        if host.is_empty() {
            bail!("registry reference '{}' has no host", raw);
        }
        if host.contains(char::is_whitespace) || namespace.contains(char::is_whitespace) {
            bail!("registry reference '{}' contains whitespace", raw);
        }
        let scheme = if insecure { "http" } else { "https" };
        Url::parse(&format!("{}://{}/", scheme, host))
            .with_context(|| format!("registry host '{}' is not valid", host))?;
        Ok(Self {
            scheme,
            host: host.to_string(),
            namespace: namespace.to_string(),
        })
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Full repository path for a chart name.
    pub fn repository(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.namespace, name)
        }
    }
}

/// Chart versions may carry `+` build metadata, which OCI tags cannot.
pub fn tag_to_version(tag: &str) -> String {
    tag.replace('_', "+")
}

pub fn version_to_tag(version: &str) -> String {
    version.replace('+', "_")
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Parse a Bearer challenge header. Returns `None` for other schemes.
pub fn parse_challenge(header: &str) -> Option<BearerChallenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut values: HashMap<String, String> = HashMap::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            let end = after.find(',').unwrap_or(after.len());
            (after[..end].trim(), &after[end..])
        };
        values.insert(key, value.to_string());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }

    Some(BearerChallenge {
        realm: values.remove("realm")?,
        service: values.remove("service"),
        scope: values.remove("scope"),
    })
}

/// The `rel="next"` target of a `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim(), "rel=\"next\"" | "rel=next"));
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

pub struct OciChartSource {
    source: SourceRef,
    registry: RegistryRef,
    repositories: Vec<String>,
    client: Client,
    username: Option<String>,
    password: Option<String>,
    retry: Retry,
    tokens: Mutex<HashMap<String, String>>,
}

impl OciChartSource {
    pub fn new(source: SourceRef, config: &OciSourceConfig) -> Result<Self> {
        let registry = RegistryRef::parse(&config.registry_url, config.insecure)?;
        Ok(Self {
            source,
            registry,
            repositories: config.repositories.clone(),
            client: build_client(config.timeout_secs, false)?,
            username: config.username.clone(),
            password: config.password.clone(),
            retry: Retry::default(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    fn pull_scope(repository: &str) -> String {
        format!("repository:{}:pull", repository)
    }

    async fn send(&self, url: &str, accept: Option<&str>, token: Option<&str>) -> Result<Response> {
        send_with_retry(&self.retry, url, || {
            let mut request = self.client.get(url);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }
            match (token, self.username.as_deref()) {
                (Some(token), _) => request.bearer_auth(token),
                (None, Some(user)) => request.basic_auth(user, self.password.as_deref()),
                (None, None) => request,
            }
        })
        .await
    }

    /// GET with registry authentication. On a Bearer challenge a token is
    /// fetched, cached under `scope`, and the request repeated once.
    async fn get(&self, url: &str, accept: Option<&str>, scope: &str) -> Result<Response> {
        let cached = self.tokens.lock().await.get(scope).cloned();
        let response = self.send(url, accept, cached.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge);
        let Some(challenge) = challenge else {
            bail!("{} requires authentication", url);
        };
        let token = self.fetch_token(&challenge, scope).await?;
        self.tokens
            .lock()
            .await
            .insert(scope.to_string(), token.clone());
        self.send(url, accept, Some(&token)).await
    }

    async fn fetch_token(&self, challenge: &BearerChallenge, scope: &str) -> Result<String> {
        let mut realm = Url::parse(&challenge.realm)
            .with_context(|| format!("token realm '{}' is not a URL", challenge.realm))?;
        {
            let mut query = realm.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", challenge.scope.as_deref().unwrap_or(scope));
        }

        let realm = realm.to_string();
        let response = send_with_retry(&self.retry, &realm, || {
            let request = self.client.get(realm.as_str());
            match self.username.as_deref() {
                Some(user) => request.basic_auth(user, self.password.as_deref()),
                None => request,
            }
        })
        .await?;
        let response = ensure_success(response, "token endpoint").await?;
        let body: TokenResponse = response.json().await.context("parsing token response")?;
        debug!(source = %self.source, scope, "registry token obtained");
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("token endpoint returned no token"))
    }

    /// Every tag of one repository, in registry order, mapped to chart
    /// versions.
    pub async fn list_tags(&self, name: &str) -> Result<Vec<String>> {
        let repository = self.registry.repository(name);
        let scope = Self::pull_scope(&repository);
        let base = self.registry.base_url();
        let mut next = Some(format!("{}/v2/{}/tags/list", base, repository));
        let mut versions = Vec::new();

        while let Some(url) = next.take() {
            let response = self.get(&url, None, &scope).await?;
            let response = ensure_success(response, &url).await?;
            let link = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link);
            let page: TagList = response
                .json()
                .await
                .with_context(|| format!("parsing tag list of {}", repository))?;
            versions.extend(page.tags.unwrap_or_default().iter().map(|t| tag_to_version(t)));

            next = match link {
                Some(target) => Some(
                    Url::parse(&format!("{}/", base))?
                        .join(&target)
                        .context("resolving tag list pagination link")?
                        .to_string(),
                ),
                None => None,
            };
        }
        Ok(versions)
    }
}

#[async_trait]
impl ArtifactSource for OciChartSource {
    fn source_ref(&self) -> &SourceRef {
        &self.source
    }

    fn declared_names(&self) -> Option<Vec<String>> {
        Some(self.repositories.clone())
    }

    async fn list_catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        for name in &self.repositories {
            match self.list_tags(name).await {
                Ok(tags) if tags.is_empty() => {
                    info!(source = %self.source, app = %name, "repository has no tags, skipping");
                }
                Ok(tags) => {
                    catalog.insert(name.clone(), tags);
                }
                Err(e) => {
                    warn!(
                        source = %self.source,
                        app = %name,
                        error = %format!("{:#}", e),
                        "could not list tags, skipping repository"
                    );
                }
            }
        }
        Ok(catalog)
    }

    async fn fetch_artifact(&self, name: &str, version: &str) -> Result<Artifact> {
        let repository = self.registry.repository(name);
        let scope = Self::pull_scope(&repository);
        let base = self.registry.base_url();
        let tag = version_to_tag(version);

        let manifest_url = format!("{}/v2/{}/manifests/{}", base, repository, tag);
        let response = self
            .get(&manifest_url, Some(MANIFEST_MEDIA_TYPE), &scope)
            .await?;
        let response = ensure_success(response, &manifest_url).await?;
        let manifest: Manifest = response
            .json()
            .await
            .with_context(|| format!("parsing manifest of {}:{}", repository, tag))?;

        let layer = manifest
            .layers
            .iter()
            .find(|l| l.media_type == CHART_LAYER_MEDIA_TYPE)
            .or_else(|| {
                manifest
                    .layers
                    .iter()
                    .find(|l| l.media_type == LEGACY_CHART_LAYER_MEDIA_TYPE)
            })
            .ok_or_else(|| anyhow!("{}:{} has no chart layer", repository, tag))?;

        let blob_url = format!("{}/v2/{}/blobs/{}", base, repository, layer.digest);
        let response = self.get(&blob_url, None, &scope).await?;
        let response = ensure_success(response, &blob_url).await?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("downloading {}", blob_url))?;
        verify_digest(&bytes, &layer.digest)?;

        let chart = read_chart_archive(&bytes)
            .with_context(|| format!("reading chart layer of {}:{}", repository, tag))?;
        let created = manifest
            .annotations
            .get(CREATED_ANNOTATION)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Ok(chart.into_artifact(layer.digest.clone(), created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_references() {
        let r = RegistryRef::parse("oci://ghcr.io/acme/charts/", false).unwrap();
        assert_eq!(r.host, "ghcr.io");
        assert_eq!(r.namespace, "acme/charts");
        assert_eq!(r.base_url(), "https://ghcr.io");
        assert_eq!(r.repository("nginx"), "acme/charts/nginx");

        let local = RegistryRef::parse("localhost:5000", true).unwrap();
        assert_eq!(local.base_url(), "http://localhost:5000");
        assert_eq!(local.repository("nginx"), "nginx");

        assert!(RegistryRef::parse("oci://", false).is_err());
        assert!(RegistryRef::parse("bad host/ns", false).is_err());
    }

    #[test]
    fn maps_build_metadata_in_tags() {
        assert_eq!(tag_to_version("1.0.0_build.7"), "1.0.0+build.7");
        assert_eq!(version_to_tag("1.0.0+build.7"), "1.0.0_build.7");
        assert_eq!(version_to_tag("2.0.0"), "2.0.0");
    }

    #[test]
    fn parses_bearer_challenges() {
        let header =
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:acme/nginx:pull""#;
        let c = parse_challenge(header).unwrap();
        assert_eq!(c.realm, "https://ghcr.io/token");
        assert_eq!(c.service.as_deref(), Some("ghcr.io"));
        assert_eq!(c.scope.as_deref(), Some("repository:acme/nginx:pull"));

        let spaced = r#"Bearer realm="https://auth.example.com/token", service="registry""#;
        let c = parse_challenge(spaced).unwrap();
        assert_eq!(c.service.as_deref(), Some("registry"));
        assert_eq!(c.scope, None);

        assert_eq!(parse_challenge(r#"Basic realm="registry""#), None);
        assert_eq!(parse_challenge("Bearer service=\"x\""), None);
    }

    #[test]
    fn parses_next_links() {
        let header = r#"</v2/acme/nginx/tags/list?last=1.2.0&n=100>; rel="next""#;
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("/v2/acme/nginx/tags/list?last=1.2.0&n=100")
        );
        assert_eq!(parse_next_link(r#"</other>; rel="prev""#), None);
    }
}
