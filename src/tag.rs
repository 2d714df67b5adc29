// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot tag naming.
//!
//! Every successful push leaves behind a tag of the form
//! `<type>-<YYYY>-<MM>-<DD>_<HH>-<MM>-<SS>`. The type is usually "snapshot",
//! though older producers used "db", "files", and "config". The timestamp
//! suffix is zero-padded and fixed-width, so sorting on it lexicographically
//! is the same as sorting chronologically. The suffix is the sort key no
//! matter what the type prefix is.

use chrono::{Local, NaiveDateTime};
use std::{
    cmp::Ordering,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Timestamp layout embedded in tag names and dump file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const TIMESTAMP_WIDTH: usize = "YYYY-MM-DD_HH-MM-SS".len();

/// Parsed snapshot tag name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagName {
    kind: String,
    timestamp: NaiveDateTime,
}

impl TagName {
    /// Construct new tag name from type and timestamp.
    pub fn new(kind: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            kind: kind.into(),
            timestamp,
        }
    }

    /// Construct new tag name stamped with current local time.
    pub fn now(kind: impl Into<String>) -> Self {
        Self::new(kind, Local::now().naive_local())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Display for TagName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{}-{}",
            self.kind,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }
}

impl FromStr for TagName {
    type Err = TagError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let (kind, stamp) = split_tag(data).ok_or_else(|| TagError::Malformed(data.into()))?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|_| TagError::Malformed(data.into()))?;

        Ok(Self::new(kind, timestamp))
    }
}

impl PartialOrd for TagName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

/// Sort tag names newest first by their embedded timestamp.
///
/// Tags that do not follow the naming scheme cannot be placed in time, so
/// they are kept after every well-formed tag in reverse name order.
/// Duplicates are removed.
pub fn sort_newest_first(tags: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
    let mut tags = tags.into_iter().map(Into::into).collect::<Vec<String>>();
    tags.sort_by(|a, b| compare_newest_first(a, b));
    tags.dedup();
    tags
}

fn compare_newest_first(a: &str, b: &str) -> Ordering {
    match (sort_key(a), sort_key(b)) {
        (Some(ka), Some(kb)) => kb.cmp(ka).then_with(|| b.cmp(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.cmp(a),
    }
}

// INVARIANT: Timestamp is the fixed-width suffix after the last separating
// dash. The type prefix may contain dashes of its own.
fn split_tag(name: &str) -> Option<(&str, &str)> {
    let at = name.len().checked_sub(TIMESTAMP_WIDTH + 1)?;
    let (kind, stamp) = name.split_at_checked(at)?;
    let stamp = stamp.strip_prefix('-')?;
    if kind.is_empty() {
        return None;
    }

    Some((kind, stamp))
}

fn sort_key(name: &str) -> Option<&str> {
    let (_, stamp) = split_tag(name)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some(stamp)
}

/// Tag name error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TagError {
    /// Tag does not follow `<type>-<timestamp>` naming scheme.
    #[error("tag {0:?} does not follow <type>-YYYY-MM-DD_HH-MM-SS naming")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn stamp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn format_tag_name() {
        let tag = TagName::new("snapshot", stamp(2024, 2, 1, 9, 5, 3));
        assert_eq!(tag.to_string(), "snapshot-2024-02-01_09-05-03");
    }

    #[test]
    fn parse_tag_name() -> anyhow::Result<()> {
        let tag: TagName = "db-2023-12-31_23-59-59".parse()?;
        assert_eq!(tag.kind(), "db");
        assert_eq!(tag.timestamp(), stamp(2023, 12, 31, 23, 59, 59));

        Ok(())
    }

    #[test]
    fn parse_dashed_tag_type() -> anyhow::Result<()> {
        let tag: TagName = "site-prod-2024-02-01_00-00-00".parse()?;
        assert_eq!(tag.kind(), "site-prod");
        assert_eq!(tag.timestamp(), stamp(2024, 2, 1, 0, 0, 0));
        assert_eq!(tag.to_string(), "site-prod-2024-02-01_00-00-00");

        Ok(())
    }

    #[test_case("snapshot"; "missing timestamp")]
    #[test_case("snapshot-2024-13-01_00-00-00"; "invalid month")]
    #[test_case("-2024-01-01_00-00-00"; "missing type")]
    #[test_case("snapshot-2024-01-01"; "missing time")]
    #[test_case("snapshot_2024-01-01_00-00-00"; "missing separator")]
    #[test]
    fn reject_malformed_tag_name(name: &str) {
        assert!(name.parse::<TagName>().is_err());
    }

    #[test]
    fn sort_across_legacy_types_by_timestamp() {
        let result = sort_newest_first([
            "files-2023-05-01_10-00-00",
            "snapshot-2024-01-01_00-00-00",
            "db-2023-06-01_10-00-00",
            "snapshot-2024-02-01_00-00-00",
            "config-2023-05-01_09-59-59",
        ]);

        assert_eq!(
            result,
            vec![
                "snapshot-2024-02-01_00-00-00",
                "snapshot-2024-01-01_00-00-00",
                "db-2023-06-01_10-00-00",
                "files-2023-05-01_10-00-00",
                "config-2023-05-01_09-59-59",
            ]
        );
    }

    #[test]
    fn sort_dashed_types_by_timestamp() {
        let result = sort_newest_first([
            "site-prod-2024-01-01_00-00-00",
            "site-prod-2024-02-01_00-00-00",
            "snapshot-2023-01-01_00-00-00",
        ]);

        assert_eq!(
            result,
            vec![
                "site-prod-2024-02-01_00-00-00",
                "site-prod-2024-01-01_00-00-00",
                "snapshot-2023-01-01_00-00-00",
            ]
        );
    }

    #[test]
    fn sort_places_foreign_tags_last() {
        let result = sort_newest_first([
            "v1.0",
            "snapshot-2024-01-01_00-00-00",
            "release",
            "snapshot-2024-01-01_00-00-00",
        ]);

        assert_eq!(result, vec!["snapshot-2024-01-01_00-00-00", "v1.0", "release"]);
    }

    #[test]
    fn ordering_follows_timestamp() {
        let older = TagName::new("snapshot", stamp(2024, 1, 1, 0, 0, 0));
        let newer = TagName::new("db", stamp(2024, 1, 1, 0, 0, 1));
        assert!(older < newer);
    }
}
