use std::cmp::Ordering;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime, PrimitiveDateTime};

/// Parses the timestamp shapes found in manifests, the GitHub API and the
/// engine feed into unix seconds. Zone-less values are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(dt.unix_timestamp());
    }
    let naive_format =
        time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(trimmed, &naive_format) {
        return Some(dt.assume_utc().unix_timestamp());
    }
    let spaced_format =
        time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(trimmed, &spaced_format) {
        return Some(dt.assume_utc().unix_timestamp());
    }
    let minute_format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]");
    if let Ok(dt) = PrimitiveDateTime::parse(trimmed, &minute_format) {
        return Some(dt.assume_utc().unix_timestamp());
    }
    let date_format = time::macros::format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(trimmed, &date_format) {
        return date
            .with_hms(0, 0, 0)
            .ok()
            .map(|dt| dt.assume_utc().unix_timestamp());
    }
    None
}

/// True when `remote` is strictly later than `local`. A missing or
/// unreadable local stamp loses to any readable remote one.
pub fn is_newer_timestamp(remote: Option<&str>, local: Option<&str>) -> bool {
    let Some(remote) = remote.and_then(parse_timestamp) else {
        return false;
    };
    match local.and_then(parse_timestamp) {
        Some(local) => remote > local,
        None => true,
    }
}

/// Dotted numeric version with an optional trailing `c` variant marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion {
    pub parts: Vec<u64>,
    pub variant: bool,
}

impl EngineVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_start_matches(['v', 'V']);
        let (numbers, variant) = match trimmed.strip_suffix('c') {
            Some(rest) => (rest, true),
            None => (trimmed, false),
        };
        if numbers.is_empty() {
            return None;
        }
        let parts = numbers
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { parts, variant })
    }

    /// Compares part by part; a missing trailing part counts as zero. The
    /// variant marker does not affect ordering.
    pub fn compare(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for index in 0..len {
            let left = self.parts.get(index).copied().unwrap_or(0);
            let right = other.parts.get(index).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

pub fn is_newer(latest: &str, current: &str) -> bool {
    match (EngineVersion::parse(latest), EngineVersion::parse(current)) {
        (Some(latest), Some(current)) => latest.compare(&current) == Ordering::Greater,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_versions_compare_by_first_differing_part() {
        assert!(is_newer("1.2.0", "1.1.9"));
        assert!(!is_newer("1.1.9", "1.2.0"));
        assert!(!is_newer("1.2", "1.2.0"));
        assert!(!is_newer("1.2.0", "1.2"));
        assert!(is_newer("1.2.0.1", "1.2.0"));
        assert!(is_newer("v2.0", "1.9.9"));
    }

    #[test]
    fn variant_suffix_is_parsed_but_not_ordered() {
        let version = EngineVersion::parse("2.1.3c").unwrap();
        assert_eq!(version.parts, vec![2, 1, 3]);
        assert!(version.variant);
        assert!(!is_newer("2.1.3c", "2.1.3"));
        assert!(is_newer("2.1.4c", "2.1.3"));
    }

    #[test]
    fn garbage_versions_are_never_newer() {
        assert!(!is_newer("latest", "1.0.0"));
        assert!(!is_newer("1.0.0", "nightly"));
        assert!(EngineVersion::parse("c").is_none());
    }

    #[test]
    fn timestamps_in_every_known_shape() {
        let feed = parse_timestamp("2025-06-01 12:30").unwrap();
        let api = parse_timestamp("2025-06-01T12:30:00Z").unwrap();
        assert_eq!(feed, api);
        assert!(parse_timestamp("2025-06-01").is_some());
        assert!(parse_timestamp("1927-02-02 20:20").is_some());
        assert!(parse_timestamp("soon").is_none());
    }

    #[test]
    fn newer_timestamp_rules() {
        assert!(is_newer_timestamp(Some("2025-01-02"), Some("2025-01-01")));
        assert!(!is_newer_timestamp(Some("2025-01-01"), Some("2025-01-01")));
        assert!(is_newer_timestamp(Some("2025-01-01"), None));
        assert!(!is_newer_timestamp(None, Some("2025-01-01")));
    }
}
