//! Catalog diff: which remote versions are not stored yet.

use std::collections::HashSet;

/// Return the subsequence of `remote` not present in `persisted`, keeping
/// the remote order. A version listed twice upstream is returned once.
pub fn new_versions<'a>(remote: &'a [String], persisted: &HashSet<&str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    remote
        .iter()
        .map(String::as_str)
        .filter(|v| !persisted.contains(v) && seen.insert(*v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn returns_only_unseen_versions() {
        let remote = strings(&["1.0.0", "1.1.0", "1.2.0"]);
        let persisted: HashSet<&str> = ["1.0.0", "1.1.0"].into_iter().collect();
        assert_eq!(new_versions(&remote, &persisted), vec!["1.2.0"]);
    }

    #[test]
    fn keeps_remote_order() {
        let remote = strings(&["2.0.0", "1.0.0", "1.9.0", "1.5.0"]);
        let persisted: HashSet<&str> = ["1.0.0"].into_iter().collect();
        assert_eq!(
            new_versions(&remote, &persisted),
            vec!["2.0.0", "1.9.0", "1.5.0"]
        );
    }

    #[test]
    fn empty_remote_yields_nothing() {
        let persisted: HashSet<&str> = ["1.0.0"].into_iter().collect();
        assert!(new_versions(&[], &persisted).is_empty());
    }

    #[test]
    fn duplicate_remote_entries_reported_once() {
        let remote = strings(&["1.0.0", "1.0.0", "0.9.0"]);
        assert_eq!(
            new_versions(&remote, &HashSet::new()),
            vec!["1.0.0", "0.9.0"]
        );
    }
}
