use crate::types::FileRecord;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Files whose modification times fall inside one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeGroup {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub members: Vec<PathBuf>,
    pub total_bytes: u64,
}

impl TimeGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Greedy clustering on modification time. Records are ordered by
/// `(modified, path)`; a group opens at its earliest member and accepts every
/// following record within `window` of that start. Groups smaller than
/// `min_members` are dropped.
pub fn cluster_by_time<'a, I>(records: I, window: Duration, min_members: usize) -> Vec<TimeGroup>
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let mut sorted: Vec<&FileRecord> = records.into_iter().collect();
    sorted.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

    let mut groups = Vec::new();
    let mut current: Vec<&FileRecord> = Vec::new();

    for record in sorted {
        if let Some(first) = current.first() {
            if record.modified - first.modified > window {
                flush(&mut current, min_members, &mut groups);
            }
        }
        current.push(record);
    }
    flush(&mut current, min_members, &mut groups);

    groups
}

fn flush(current: &mut Vec<&FileRecord>, min_members: usize, groups: &mut Vec<TimeGroup>) {
    if current.len() >= min_members.max(1) {
        if let (Some(first), Some(last)) = (current.first(), current.last()) {
            groups.push(TimeGroup {
                start: first.modified,
                end: last.modified,
                members: current.iter().map(|r| r.path.clone()).collect(),
                total_bytes: current.iter().map(|r| r.size).sum(),
            });
        }
    }
    current.clear();
}

/// Photo/video batches: media taken within a short window of each other.
pub fn related_media(records: &[FileRecord], window_minutes: i64, min_members: usize) -> Vec<TimeGroup> {
    cluster_by_time(
        records.iter().filter(|r| {
            matches!(
                r.category,
                crate::types::Category::Images | crate::types::Category::Video
            )
        }),
        Duration::minutes(window_minutes.max(1)),
        min_members,
    )
}

/// Month-scale activity periods across all files.
pub fn temporal_groups(records: &[FileRecord], window_days: i64, min_members: usize) -> Vec<TimeGroup> {
    cluster_by_time(records.iter(), Duration::days(window_days.max(1)), min_members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extractor::extract_record;
    use crate::types::RawFileMeta;
    use chrono::TimeZone;

    fn record(name: &str, minutes: i64) -> FileRecord {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        extract_record(&RawFileMeta::new(
            format!("/pics/{}", name),
            1000,
            base + Duration::minutes(minutes),
        ))
        .unwrap()
    }

    #[test]
    fn test_related_media_needs_minimum_members() {
        let mut records: Vec<FileRecord> = (0..5).map(|i| record(&format!("p{}.jpg", i), i * 5)).collect();
        let groups = related_media(&records, 60, 5);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 5);
        assert_eq!(groups[0].total_bytes, 5000);

        records.pop();
        assert!(related_media(&records, 60, 5).is_empty());
    }

    #[test]
    fn test_window_splits_groups() {
        let records: Vec<FileRecord> = (0..6)
            .map(|i| record(&format!("a{}.jpg", i), i))
            .chain((0..6).map(|i| record(&format!("b{}.jpg", i), 300 + i)))
            .collect();
        let groups = related_media(&records, 60, 5);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].end < groups[1].start);
    }

    #[test]
    fn test_non_media_is_ignored_for_related_media() {
        let records: Vec<FileRecord> = (0..8).map(|i| record(&format!("n{}.txt", i), i)).collect();
        assert!(related_media(&records, 60, 5).is_empty());
        assert_eq!(temporal_groups(&records, 30, 5).len(), 1);
    }
}
