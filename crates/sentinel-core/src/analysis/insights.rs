//! Folder-level suggestions driven by what kinds of files a folder holds.

use crate::analysis::scorer;
use crate::config::{DetectorConfig, ScorerConfig};
use crate::types::{ActionKind, Candidate, CandidateSource, Category, Factor, FileRecord, RelationTag};
use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MEDIA_ORGANIZE_MIN: usize = 20;
const DOCUMENT_ARCHIVE_MIN: usize = 10;

fn insight(
    kind: ActionKind,
    targets: Vec<PathBuf>,
    confidence: u8,
    factor: &str,
    destination: Option<PathBuf>,
    description: String,
) -> Candidate {
    Candidate {
        kind,
        targets,
        confidence,
        rationale: vec![Factor::new(factor, confidence)],
        destination,
        description,
        source: CandidateSource::Insight,
    }
}

fn paths(records: &[&FileRecord]) -> Vec<PathBuf> {
    records.iter().map(|r| r.path.clone()).collect()
}

/// Category suggestions for one folder's direct children.
pub fn folder_insights(
    folder: &Path,
    records: &[&FileRecord],
    detector: &DetectorConfig,
    scoring: &ScorerConfig,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let mut by_category: BTreeMap<Category, Vec<&FileRecord>> = BTreeMap::new();
    for record in records {
        by_category.entry(record.category).or_default().push(record);
    }
    let mut out = Vec::new();

    if let Some(temp) = by_category.get(&Category::Temporary) {
        out.push(insight(
            ActionKind::Cleanup,
            paths(temp),
            95,
            "temporary_files",
            None,
            format!("Clean up {} temporary file(s) in {}", temp.len(), folder.display()),
        ));
    }

    if let Some(installers) = by_category.get(&Category::Executables) {
        out.push(insight(
            ActionKind::Archive,
            paths(installers),
            85,
            "installers",
            Some(folder.join("Archive")),
            format!("Archive {} installer(s) in {}", installers.len(), folder.display()),
        ));
    }

    let folder_name = folder.file_name().map(|n| n.to_string_lossy().into_owned());
    for (category, members) in by_category.iter().filter(|(c, _)| c.is_media()) {
        if members.len() <= MEDIA_ORGANIZE_MIN || folder_name.as_deref() == Some(category.folder_name()) {
            continue;
        }
        out.push(insight(
            ActionKind::Organize,
            paths(members),
            90,
            "media_collection",
            Some(folder.join(category.folder_name())),
            format!("Move {} {} files into {}", members.len(), category, category.folder_name()),
        ));
    }

    let large: Vec<&FileRecord> = records
        .iter()
        .copied()
        .filter(|r| scorer::is_large(r, scoring))
        .filter(|r| !matches!(r.category, Category::Archives | Category::Images | Category::Video | Category::Audio))
        .collect();
    if !large.is_empty() {
        out.push(insight(
            ActionKind::Compress,
            paths(&large),
            70,
            "large_files",
            None,
            format!("Compress {} large file(s) in {}", large.len(), folder.display()),
        ));
    }

    if let Some(documents) = by_category.get(&Category::Documents) {
        if documents.len() > DOCUMENT_ARCHIVE_MIN {
            let cutoff = Duration::days(detector.temporal_archive_after_days);
            let old: Vec<&FileRecord> = documents
                .iter()
                .copied()
                .filter(|r| now - r.modified >= cutoff)
                .collect();
            if !old.is_empty() {
                out.push(insight(
                    ActionKind::Archive,
                    paths(&old),
                    75,
                    "old_documents",
                    Some(folder.join("Archive")),
                    format!("Archive {} old document(s) in {}", old.len(), folder.display()),
                ));
            }
        }
    }

    out
}

/// Category suggestions for every folder, skipping project members.
pub fn insights(records: &[FileRecord], detector: &DetectorConfig, scoring: &ScorerConfig, now: DateTime<Utc>) -> Vec<Candidate> {
    let mut order: Vec<&Path> = Vec::new();
    let mut by_folder: AHashMap<&Path, Vec<&FileRecord>> = AHashMap::new();
    for record in records.iter().filter(|r| !r.tags.contains(&RelationTag::ProjectMember)) {
        let folder = record.folder();
        if !by_folder.contains_key(folder) {
            order.push(folder);
        }
        by_folder.entry(folder).or_default().push(record);
    }

    order
        .into_iter()
        .flat_map(|folder| folder_insights(folder, &by_folder[folder], detector, scoring, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extractor::extract_record;
    use crate::types::RawFileMeta;

    fn rec(path: &str, size: u64, age_days: i64, now: DateTime<Utc>) -> FileRecord {
        extract_record(&RawFileMeta::new(path, size, now - Duration::days(age_days))).unwrap()
    }

    #[test]
    fn test_temporary_and_installers() {
        let now = Utc::now();
        let records = vec![
            rec("/dl/a.tmp", 5, 1, now),
            rec("/dl/setup.exe", 5_000, 1, now),
            rec("/dl/notes.txt", 5, 1, now),
        ];
        let found = insights(&records, &DetectorConfig::default(), &ScorerConfig::default(), now);
        let cleanup = found.iter().find(|c| c.kind == ActionKind::Cleanup).unwrap();
        assert_eq!(cleanup.targets, vec![PathBuf::from("/dl/a.tmp")]);
        assert_eq!(cleanup.confidence, 95);
        let archive = found.iter().find(|c| c.kind == ActionKind::Archive).unwrap();
        assert_eq!(archive.destination, Some(PathBuf::from("/dl/Archive")));
    }

    #[test]
    fn test_media_needs_a_crowd() {
        let now = Utc::now();
        let few: Vec<FileRecord> = (0..5).map(|i| rec(&format!("/d/p{}.jpg", i), 10, 1, now)).collect();
        assert!(insights(&few, &DetectorConfig::default(), &ScorerConfig::default(), now).is_empty());

        let many: Vec<FileRecord> = (0..25).map(|i| rec(&format!("/d/p{}.jpg", i), 10, 1, now)).collect();
        let found = insights(&many, &DetectorConfig::default(), &ScorerConfig::default(), now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].destination, Some(PathBuf::from("/d/Images")));

        let sorted: Vec<FileRecord> = (0..25).map(|i| rec(&format!("/d/Images/p{}.jpg", i), 10, 1, now)).collect();
        assert!(insights(&sorted, &DetectorConfig::default(), &ScorerConfig::default(), now).is_empty());
    }

    #[test]
    fn test_project_members_are_skipped() {
        let now = Utc::now();
        let mut record = rec("/p/build.tmp", 5, 1, now);
        record.tags.push(RelationTag::ProjectMember);
        assert!(insights(&[record], &DetectorConfig::default(), &ScorerConfig::default(), now).is_empty());
    }
}
