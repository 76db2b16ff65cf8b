//! The latest-pointer state machine.
//!
//! Exactly one version per application should carry `latest = true`. Nothing
//! in the schema enforces that, so every pass that inserts versions
//! re-derives the pointer from persisted data and swaps it with a single
//! bulk update.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::VersionRecord;
use crate::version::greatest_index;

/// How the latest candidate is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatestRule {
    /// Greatest `created` timestamp, ties broken by highest id. Used for
    /// HTTP chart repositories, whose index reports creation times.
    NewestCreated,
    /// First entry of the remote list, trusting the registry to list the
    /// newest tag first.
    SourceOrder,
    /// Greatest entry of the remote list by semantic version.
    SemVer,
}

/// Current pointer state of one application.
#[derive(Debug, Clone, PartialEq)]
pub enum LatestState {
    NoLatest,
    HasLatest(VersionRecord),
}

impl From<Option<VersionRecord>> for LatestState {
    fn from(record: Option<VersionRecord>) -> Self {
        match record {
            Some(r) => LatestState::HasLatest(r),
            None => LatestState::NoLatest,
        }
    }
}

/// The remote identifier a list-based rule designates. `None` for
/// [`LatestRule::NewestCreated`], which reads the store instead, and for an
/// empty list.
pub fn candidate_from_remote(rule: LatestRule, remote: &[String]) -> Option<&str> {
    match rule {
        LatestRule::NewestCreated => None,
        LatestRule::SourceOrder => remote.first().map(String::as_str),
        LatestRule::SemVer => greatest_index(remote).map(|i| remote[i].as_str()),
    }
}

/// Records to write so that `candidate` becomes the only latest version.
///
/// `current` is the record the store reports as latest; `stale` is any
/// further snapshot of the application's versions whose flags should be
/// cleared if set. Returns an empty list when the candidate is already the
/// sole latest version.
pub fn plan_swap(
    candidate: &VersionRecord,
    current: &LatestState,
    stale: &[VersionRecord],
    now: DateTime<Utc>,
) -> Vec<VersionRecord> {
    let mut demote: Vec<VersionRecord> = Vec::new();
    if let LatestState::HasLatest(r) = current {
        if r.id != candidate.id {
            demote.push(r.clone());
        }
    }
    for r in stale {
        if r.latest && r.id != candidate.id && !demote.iter().any(|d| d.id == r.id) {
            demote.push(r.clone());
        }
    }

    if candidate.latest && demote.is_empty() {
        return Vec::new();
    }

    let mut updates = Vec::with_capacity(demote.len() + 1);
    if !candidate.latest {
        let mut promoted = candidate.clone();
        promoted.latest = true;
        promoted.updated_on = now;
        updates.push(promoted);
    }
    for mut r in demote {
        r.latest = false;
        r.updated_on = now;
        updates.push(r);
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, version: &str, latest: bool) -> VersionRecord {
        let ts = Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap();
        VersionRecord {
            id,
            application_id: 1,
            version: version.to_string(),
            chart_name: "demo".to_string(),
            app_version: None,
            description: None,
            digest: String::new(),
            icon: None,
            home: None,
            deprecated: false,
            values_json: "{}".to_string(),
            chart_json: "{}".to_string(),
            raw_values: String::new(),
            readme: String::new(),
            values_schema_json: String::new(),
            notes: String::new(),
            latest,
            created: ts,
            created_on: ts,
            updated_on: ts,
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn source_order_takes_first_tag() {
        let tags = strings(&["1.8.0", "2.0.0", "1.9.0"]);
        assert_eq!(
            candidate_from_remote(LatestRule::SourceOrder, &tags),
            Some("1.8.0")
        );
        assert_eq!(candidate_from_remote(LatestRule::SemVer, &tags), Some("2.0.0"));
        assert_eq!(candidate_from_remote(LatestRule::NewestCreated, &tags), None);
        assert_eq!(candidate_from_remote(LatestRule::SourceOrder, &[]), None);
    }

    #[test]
    fn promotes_candidate_from_no_latest() {
        let updates = plan_swap(
            &record(3, "2.0.0", false),
            &LatestState::NoLatest,
            &[],
            Utc::now(),
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id, 3);
        assert!(updates[0].latest);
    }

    #[test]
    fn swaps_previous_latest() {
        let current = LatestState::HasLatest(record(1, "1.0.0", true));
        let updates = plan_swap(&record(2, "1.1.0", false), &current, &[], Utc::now());
        let flags: Vec<(i64, bool)> = updates.iter().map(|r| (r.id, r.latest)).collect();
        assert_eq!(flags, vec![(2, true), (1, false)]);
    }

    #[test]
    fn no_write_when_candidate_already_latest() {
        let candidate = record(2, "1.1.0", true);
        let current = LatestState::HasLatest(candidate.clone());
        assert!(plan_swap(&candidate, &current, &[candidate.clone()], Utc::now()).is_empty());
    }

    #[test]
    fn clears_extra_flags_from_snapshot() {
        let candidate = record(3, "3.0.0", true);
        let current = LatestState::HasLatest(candidate.clone());
        let snapshot = vec![record(1, "1.0.0", true), record(2, "2.0.0", false), candidate.clone()];
        let updates = plan_swap(&candidate, &current, &snapshot, Utc::now());
        let flags: Vec<(i64, bool)> = updates.iter().map(|r| (r.id, r.latest)).collect();
        assert_eq!(flags, vec![(1, false)]);
    }
}
