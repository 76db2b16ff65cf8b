//! Chart archive reading.
//!
//! A packaged chart is a gzip-compressed tar whose entries all live under
//! one top-level directory named after the chart. Only the handful of files
//! the version record keeps are read; subcharts under `charts/` are ignored.

use std::io::Read;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};

use chart_sync_core::models::{Artifact, ChartMetadata};

/// The parts of a chart archive that are persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartArchive {
    pub metadata: ChartMetadata,
    pub raw_values: String,
    pub readme: String,
    pub values_schema_json: String,
    pub notes: String,
}

impl ChartArchive {
    pub fn into_artifact(self, digest: String, created: Option<DateTime<Utc>>) -> Artifact {
        Artifact {
            metadata: self.metadata,
            raw_values: self.raw_values,
            readme: self.readme,
            values_schema_json: self.values_schema_json,
            notes: self.notes,
            digest,
            created,
        }
    }
}

enum ChartFile {
    Chart,
    Values,
    Schema,
    Readme,
    Notes,
}

fn classify(relative: &str) -> Option<ChartFile> {
    match relative {
        "Chart.yaml" => return Some(ChartFile::Chart),
        "values.yaml" => return Some(ChartFile::Values),
        "values.schema.json" => return Some(ChartFile::Schema),
        _ => {}
    }
    let lower = relative.to_ascii_lowercase();
    match lower.as_str() {
        "readme.md" => Some(ChartFile::Readme),
        "templates/notes.txt" => Some(ChartFile::Notes),
        _ => None,
    }
}

/// Read a `.tgz` chart package.
pub fn read_chart_archive(bytes: &[u8]) -> Result<ChartArchive> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut chart_yaml: Option<String> = None;
    let mut out = ChartArchive::default();

    for entry in archive.entries().context("chart archive is not a gzip tar")? {
        let mut entry = entry.context("reading chart archive entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().replace('\\', "/");
        let Some((_, relative)) = path.split_once('/') else {
            continue;
        };
        let Some(kind) = classify(relative) else {
            continue;
        };

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .with_context(|| format!("{} is not valid UTF-8", path))?;
        match kind {
            ChartFile::Chart => chart_yaml = Some(content),
            ChartFile::Values => out.raw_values = content,
            ChartFile::Schema => out.values_schema_json = content,
            ChartFile::Readme => out.readme = content,
            ChartFile::Notes => out.notes = content,
        }
    }

    let Some(chart_yaml) = chart_yaml else {
        bail!("chart archive has no Chart.yaml");
    };
    let mut doc: serde_yaml::Value =
        serde_yaml::from_str(&chart_yaml).context("Chart.yaml is not valid YAML")?;
    if let serde_yaml::Value::Mapping(map) = &mut doc {
        for key in ["name", "version", "appVersion"] {
            if let Some(value) = map.get_mut(key) {
                let text = match &*value {
                    serde_yaml::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                if let Some(text) = text {
                    *value = serde_yaml::Value::String(text);
                }
            }
        }
    }
    out.metadata = serde_yaml::from_value(doc).context("Chart.yaml is not valid")?;
    Ok(out)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Check `bytes` against an expected digest, given either as bare hex or as
/// `sha256:<hex>`. An empty expectation always passes; other algorithms are
/// not checked.
pub fn verify_digest(bytes: &[u8], expected: &str) -> Result<()> {
    let expected = expected.trim();
    if expected.is_empty() {
        return Ok(());
    }
    let hex_part = match expected.split_once(':') {
        Some(("sha256", hex_part)) => hex_part,
        Some(_) => return Ok(()),
        None => expected,
    };
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(hex_part) {
        bail!("digest mismatch: expected sha256:{}, got sha256:{}", hex_part, actual);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    /// Build a gzip tar with the given `(path, content)` entries.
    fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn reads_known_files_from_top_level() {
        let bytes = build_archive(&[
            (
                "nginx/Chart.yaml",
                "apiVersion: v2\nname: nginx\nversion: 1.2.3\nappVersion: \"1.25\"\ndescription: web server\n",
            ),
            ("nginx/values.yaml", "replicas: 1\n"),
            ("nginx/values.schema.json", "{\"type\":\"object\"}"),
            ("nginx/ReadMe.MD", "# nginx"),
            ("nginx/templates/NOTES.txt", "thanks"),
            ("nginx/templates/deployment.yaml", "kind: Deployment"),
            ("nginx/charts/common/values.yaml", "ignored: true\n"),
            ("nginx/charts/common/README.md", "ignored"),
        ]);
        let chart = read_chart_archive(&bytes).unwrap();

        assert_eq!(chart.metadata.name, "nginx");
        assert_eq!(chart.metadata.version, "1.2.3");
        assert_eq!(chart.metadata.app_version.as_deref(), Some("1.25"));
        assert_eq!(chart.metadata.description.as_deref(), Some("web server"));
        assert_eq!(chart.raw_values, "replicas: 1\n");
        assert_eq!(chart.values_schema_json, "{\"type\":\"object\"}");
        assert_eq!(chart.readme, "# nginx");
        assert_eq!(chart.notes, "thanks");
    }

    #[test]
    fn missing_optional_files_stay_empty() {
        let bytes = build_archive(&[("redis/Chart.yaml", "name: redis\nversion: 7.0.0\n")]);
        let chart = read_chart_archive(&bytes).unwrap();
        assert_eq!(chart.metadata.name, "redis");
        assert!(chart.raw_values.is_empty());
        assert!(chart.readme.is_empty());
        assert!(chart.notes.is_empty());
    }

    #[test]
    fn accepts_unquoted_numeric_versions() {
        let bytes = build_archive(&[(
            "app/Chart.yaml",
            "name: app\nversion: 1.0\nappVersion: 1.16\n",
        )]);
        let chart = read_chart_archive(&bytes).unwrap();
        assert_eq!(chart.metadata.version, "1.0");
        assert_eq!(chart.metadata.app_version.as_deref(), Some("1.16"));
    }

    #[test]
    fn rejects_archive_without_chart_yaml() {
        let bytes = build_archive(&[("redis/values.yaml", "a: 1\n")]);
        assert!(read_chart_archive(&bytes).is_err());
    }

    #[test]
    fn rejects_non_gzip_input() {
        assert!(read_chart_archive(b"definitely not a tarball").is_err());
    }

    #[test]
    fn verifies_sha256_digests() {
        let bytes = b"chart bytes";
        let hex_digest = sha256_hex(bytes);
        assert!(verify_digest(bytes, &hex_digest).is_ok());
        assert!(verify_digest(bytes, &format!("sha256:{}", hex_digest)).is_ok());
        assert!(verify_digest(bytes, "").is_ok());
        assert!(verify_digest(bytes, "sha512:abc").is_ok());
        assert!(verify_digest(bytes, "sha256:00ff").is_err());
    }
}
