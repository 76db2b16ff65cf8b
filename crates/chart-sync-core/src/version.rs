//! Lenient semantic-version ordering for chart versions and registry tags.
//!
//! Chart authors publish tags like `v1.2.3`, `1.2` or `1.2.3-rc.1`. Tags
//! are parsed after stripping a leading `v` and padding missing minor and
//! patch components with zeros. Anything still unparseable sorts below
//! every valid version.

use std::cmp::Ordering;

use semver::Version;

/// Parse a tag into a [`Version`], tolerating a `v` prefix and missing
/// minor/patch components.
pub fn parse_lenient(tag: &str) -> Option<Version> {
    let trimmed = tag.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if let Ok(v) = Version::parse(bare) {
        return Some(v);
    }

    let split_at = bare.find(['-', '+']).unwrap_or(bare.len());
    let (core, suffix) = bare.split_at(split_at);
    let parts = core.split('.').count();
    if core.is_empty() || parts > 3 {
        return None;
    }
    let padded = match parts {
        1 => format!("{}.0.0{}", core, suffix),
        2 => format!("{}.0{}", core, suffix),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

/// Order two tags newest-first: greater versions first, unparseable tags
/// last, unparseable tags compared lexically in reverse.
pub fn newest_first(a: &str, b: &str) -> Ordering {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(va), Some(vb)) => vb.cmp(&va),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.cmp(a),
    }
}

/// Index of the greatest version in `tags`. Ties and unparseable lists
/// resolve to the earliest position. `None` for an empty list.
pub fn greatest_index(tags: &[String]) -> Option<usize> {
    tags.iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| match (parse_lenient(a), parse_lenient(b)) {
            (Some(va), Some(vb)) => va.cmp(&vb).then(ib.cmp(ia)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => ib.cmp(ia),
        })
        .map(|(i, _)| i)
}
