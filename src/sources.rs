use anyhow::Result;

use crate::config::{Config, TagOrder};

/// Print every configured source, one per line.
pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<24} {:<48} DETAILS", "SOURCE", "LOCATION");

    for (id, http) in &config.sources.http {
        let mut details = Vec::new();
        if http.username.is_some() {
            details.push("auth".to_string());
        }
        if http.allow_insecure {
            details.push("insecure-tls".to_string());
        }
        if http.prune_missing {
            details.push("prune".to_string());
        }
        println!(
            "{:<24} {:<48} {}",
            format!("http:{}", id),
            http.url,
            details.join(",")
        );
    }

    for (id, oci) in &config.sources.oci {
        let order = oci.tag_order.unwrap_or(config.sync.oci_tag_order);
        let mut details = vec![
            format!("repositories={}", oci.repositories.len()),
            match order {
                TagOrder::Registry => "order=registry".to_string(),
                TagOrder::Semver => "order=semver".to_string(),
            },
        ];
        if oci.username.is_some() {
            details.push("auth".to_string());
        }
        if oci.insecure {
            details.push("plain-http".to_string());
        }
        println!(
            "{:<24} {:<48} {}",
            format!("oci:{}", id),
            oci.registry_url,
            details.join(",")
        );
    }

    if config.sources.http.is_empty() && config.sources.oci.is_empty() {
        println!("(no sources configured)");
    }
    Ok(())
}
