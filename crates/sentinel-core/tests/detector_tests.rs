use chrono::{Duration, TimeZone, Utc};
use sentinel_core::analysis::detector::{find_backup_groups, find_duplicates, find_series, Relationships};
use sentinel_core::analysis::extractor::extract_record;
use sentinel_core::config::DetectorConfig;
use sentinel_core::types::{FileRecord, RawFileMeta, RelationTag};
use std::path::PathBuf;

fn record(path: &str, size: u64, minutes: i64) -> FileRecord {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    extract_record(&RawFileMeta::new(path, size, base + Duration::minutes(minutes))).unwrap()
}

#[test]
fn test_copies_cluster_with_earliest_as_canonical() {
    let records = vec![
        record("/home/u/Pictures/photo copy.jpg", 2048, 30),
        record("/home/u/Pictures/photo.jpg", 2048, 0),
        record("/home/u/Pictures/photo (1).jpg", 2048, 10),
        record("/home/u/Pictures/other.jpg", 2048, 5),
    ];

    let clusters = find_duplicates(&records);
    assert_eq!(clusters.len(), 1);

    let cluster = &clusters[0];
    assert_eq!(cluster.canonical(), PathBuf::from("/home/u/Pictures/photo.jpg"));
    assert_eq!(
        cluster.redundant(),
        &[
            PathBuf::from("/home/u/Pictures/photo (1).jpg"),
            PathBuf::from("/home/u/Pictures/photo copy.jpg"),
        ]
    );
    // Same folder and every copy carries a marker.
    assert_eq!(cluster.confidence, 90);
}

#[test]
fn test_size_mismatch_is_not_a_duplicate() {
    let records = vec![
        record("/d/report.pdf", 1000, 0),
        record("/d/report copy.pdf", 1001, 1),
        record("/d/empty.txt", 0, 0),
        record("/d/empty (1).txt", 0, 1),
    ];
    assert!(find_duplicates(&records).is_empty());

    let groups = find_backup_groups(&records);
    assert_eq!(groups.len(), 2);
    let report = groups.iter().find(|g| g.base_name == "report.pdf").unwrap();
    assert!(!report.same_size);
    assert_eq!(report.canonical, PathBuf::from("/d/report.pdf"));
}

#[test]
fn test_contiguous_series_of_ten() {
    let records: Vec<FileRecord> = (1..=10)
        .map(|i| record(&format!("/shots/img_{}.png", i), 500, i))
        .chain(std::iter::once(record("/shots/readme.txt", 10, 0)))
        .collect();

    let series = find_series(&records, 3);
    assert_eq!(series.len(), 1);

    let run = &series[0];
    assert_eq!(run.len(), 10);
    assert_eq!(run.pattern, "img_#.png");
    assert_eq!((run.first, run.last), (1, 10));
    assert!(run.contiguous);
    assert_eq!(run.base_name(), "img");
    assert_eq!(run.members[1], PathBuf::from("/shots/img_2.png"));
}

#[test]
fn test_gap_breaks_contiguity_and_short_runs_are_ignored() {
    let records = vec![
        record("/s/scan_1.pdf", 1, 0),
        record("/s/scan_2.pdf", 1, 0),
        record("/s/scan_5.pdf", 1, 0),
        record("/s/page_1.pdf", 1, 0),
        record("/s/page_2.pdf", 1, 0),
    ];
    let series = find_series(&records, 3);
    assert_eq!(series.len(), 1);
    assert!(!series[0].contiguous);
    assert_eq!(series[0].pattern, "scan_#.pdf");
}

#[test]
fn test_annotate_tags_every_member() {
    let mut records = vec![
        record("/p/photo.jpg", 10, 0),
        record("/p/photo copy.jpg", 10, 5),
        record("/p/img_1.png", 1, 0),
        record("/p/img_2.png", 1, 0),
        record("/p/img_3.png", 1, 0),
    ];
    let found = Relationships::detect(&records, &DetectorConfig::default());
    found.annotate(&mut records);

    assert!(records[0]
        .tags
        .contains(&RelationTag::Duplicate { cluster: 0, canonical: true }));
    assert!(records[1]
        .tags
        .contains(&RelationTag::Duplicate { cluster: 0, canonical: false }));
    assert!(records[3]
        .tags
        .iter()
        .any(|t| matches!(t, RelationTag::Series { position: 2, .. })));
}
