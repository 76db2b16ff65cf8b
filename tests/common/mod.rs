#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use chart_sync_core::models::NewVersion;

/// A packaged chart with `Chart.yaml`, `values.yaml` and a README.
pub fn chart_archive(name: &str, version: &str, values: &str) -> Vec<u8> {
    let chart_yaml = format!(
        "apiVersion: v2\nname: {}\nversion: {}\ndescription: {} chart\n",
        name, version, name
    );
    let readme = format!("# {}\n", name);
    let files = [
        (format!("{}/Chart.yaml", name), chart_yaml),
        (format!("{}/values.yaml", name), values.to_string()),
        (format!("{}/README.md", name), readme),
    ];

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in &files {
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

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn new_version(application_id: i64, version: &str, created: DateTime<Utc>) -> NewVersion {
    NewVersion {
        application_id,
        version: version.to_string(),
        chart_name: "demo".to_string(),
        app_version: Some("1.0".to_string()),
        description: Some("demo chart".to_string()),
        digest: format!("sha256:{}", version),
        icon: None,
        home: None,
        deprecated: false,
        values_json: "{}".to_string(),
        chart_json: "{}".to_string(),
        raw_values: String::new(),
        readme: String::new(),
        values_schema_json: String::new(),
        notes: String::new(),
        created,
        fetched_on: created,
    }
}
