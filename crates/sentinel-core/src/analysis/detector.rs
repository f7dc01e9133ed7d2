use crate::analysis::names::{self, NamingStyle};
use crate::analysis::project::{self, ProjectAssessment};
use crate::analysis::temporal::{self, TimeGroup};
use crate::config::DetectorConfig;
use crate::types::{ActionKind, Candidate, CandidateSource, Factor, FileRecord, RelationTag};
use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files that look like copies of each other: same normalized name, same
/// extension, same size. Members are ordered by `(modified, path)` so the
/// first one is the canonical file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCluster {
    pub key: String,
    pub size: u64,
    pub members: Vec<PathBuf>,
    pub confidence: u8,
}

impl DuplicateCluster {
    pub fn canonical(&self) -> &Path {
        &self.members[0]
    }

    pub fn redundant(&self) -> &[PathBuf] {
        &self.members[1..]
    }
}

/// A base file and its "copy"/"(1)"/"backup" variants inside one folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupGroup {
    pub folder: PathBuf,
    pub base_name: String,
    pub canonical: PathBuf,
    pub variants: Vec<PathBuf>,
    /// Whether every variant has the canonical file's size.
    pub same_size: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSeries {
    pub folder: PathBuf,
    /// Filename with the sequence number replaced by `#`.
    pub pattern: String,
    /// Ordered by sequence number, then path.
    pub members: Vec<PathBuf>,
    pub first: u64,
    pub last: u64,
    pub contiguous: bool,
}

impl FileSeries {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Pattern without the number placeholder, e.g. `img_#.png` → `img`.
    pub fn base_name(&self) -> String {
        let (stem, _) = names::split_name(&self.pattern);
        let base = stem
            .replace('#', "")
            .trim_matches(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
            .to_string();
        if base.is_empty() {
            "Series".to_string()
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamingInconsistency {
    pub folder: PathBuf,
    pub dominant: NamingStyle,
    /// Share of styled names following the dominant convention, in percent.
    pub dominant_share: u8,
    pub outliers: Vec<PathBuf>,
}

/// Everything the detector found in one record set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Relationships {
    pub duplicates: Vec<DuplicateCluster>,
    pub backups: Vec<BackupGroup>,
    pub series: Vec<FileSeries>,
    pub naming: Vec<NamingInconsistency>,
    pub related_media: Vec<TimeGroup>,
    pub temporal: Vec<TimeGroup>,
    pub projects: Vec<ProjectAssessment>,
}

/// Per-detector finding counts for a whole analysis run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelationshipSummary {
    pub duplicate_clusters: usize,
    pub backup_groups: usize,
    pub series: usize,
    pub naming_reports: usize,
    pub related_media_groups: usize,
    pub temporal_groups: usize,
    pub projects: usize,
}

impl RelationshipSummary {
    /// Add one folder's findings. Projects are counted separately since a
    /// project spans many folders.
    pub fn add(&mut self, found: &Relationships) {
        self.duplicate_clusters += found.duplicates.len();
        self.backup_groups += found.backups.len();
        self.series += found.series.len();
        self.naming_reports += found.naming.len();
        self.related_media_groups += found.related_media.len();
        self.temporal_groups += found.temporal.len();
    }
}

fn by_age(a: &&FileRecord, b: &&FileRecord) -> std::cmp::Ordering {
    a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path))
}

/// Same-size files sharing a normalized name. Zero-byte files never count.
pub fn find_duplicates(records: &[FileRecord]) -> Vec<DuplicateCluster> {
    let mut groups: AHashMap<(String, String, u64), Vec<&FileRecord>> = AHashMap::new();
    for record in records.iter().filter(|r| r.size > 0) {
        let key = names::normalize_stem(record.stem());
        if key.is_empty() {
            continue;
        }
        groups
            .entry((key, record.extension.clone(), record.size))
            .or_default()
            .push(record);
    }

    let mut clusters: Vec<DuplicateCluster> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|((key, ext, size), mut members)| {
            members.sort_by(by_age);
            let same_folder = members.iter().all(|m| m.folder() == members[0].folder());
            let marked = members
                .iter()
                .skip(1)
                .all(|m| names::has_backup_marker(m.stem()));

            // Name and size agree but content was never compared.
            let mut confidence = 70u8;
            if same_folder {
                confidence += 10;
            }
            if marked {
                confidence += 10;
            }

            DuplicateCluster {
                key: if ext.is_empty() { key } else { format!("{}.{}", key, ext) },
                size,
                members: members.iter().map(|m| m.path.clone()).collect(),
                confidence,
            }
        })
        .collect();

    clusters.sort_by(|a, b| a.members[0].cmp(&b.members[0]));
    clusters
}

/// Per-folder groups of a base name plus at least one marked variant.
pub fn find_backup_groups(records: &[FileRecord]) -> Vec<BackupGroup> {
    let mut groups: AHashMap<(PathBuf, String), Vec<(&FileRecord, bool)>> = AHashMap::new();
    for record in records {
        let (base, stripped) = names::strip_backup_suffix(record.stem());
        let key = if record.extension.is_empty() {
            base.to_lowercase()
        } else {
            format!("{}.{}", base.to_lowercase(), record.extension)
        };
        groups
            .entry((record.folder().to_path_buf(), key))
            .or_default()
            .push((record, stripped));
    }

    let mut result: Vec<BackupGroup> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1 && members.iter().any(|(_, stripped)| *stripped))
        .map(|((folder, base_name), members)| {
            let mut records: Vec<&FileRecord> = members.into_iter().map(|(r, _)| r).collect();
            records.sort_by(by_age);
            let canonical = records[0];
            BackupGroup {
                folder,
                base_name,
                canonical: canonical.path.clone(),
                same_size: records.iter().all(|r| r.size == canonical.size),
                variants: records[1..].iter().map(|r| r.path.clone()).collect(),
            }
        })
        .collect();

    result.sort_by(|a, b| a.canonical.cmp(&b.canonical));
    result
}

/// Numbered runs sharing a name pattern inside one folder.
pub fn find_series(records: &[FileRecord], min_len: usize) -> Vec<FileSeries> {
    let mut groups: AHashMap<(PathBuf, String), Vec<(u64, &FileRecord)>> = AHashMap::new();
    for record in records {
        if let Some((pattern, number)) = names::series_key(&record.name) {
            groups
                .entry((record.folder().to_path_buf(), pattern))
                .or_default()
                .push((number, record));
        }
    }

    let mut result: Vec<FileSeries> = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= min_len.max(2))
        .map(|((folder, pattern), mut members)| {
            members.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.path.cmp(&b.1.path)));
            let contiguous = members.windows(2).all(|w| w[0].0.checked_add(1) == Some(w[1].0));
            FileSeries {
                folder,
                pattern,
                first: members[0].0,
                last: members[members.len() - 1].0,
                contiguous,
                members: members.into_iter().map(|(_, r)| r.path.clone()).collect(),
            }
        })
        .collect();

    result.sort_by(|a, b| a.folder.cmp(&b.folder).then_with(|| a.pattern.cmp(&b.pattern)));
    result
}

/// Folders where most names follow one convention and a few do not.
/// Single-word lowercase/uppercase names fit any convention and are ignored.
pub fn find_naming_outliers(records: &[FileRecord], cfg: &DetectorConfig) -> Vec<NamingInconsistency> {
    let mut by_folder: AHashMap<&Path, Vec<(&FileRecord, NamingStyle)>> = AHashMap::new();
    for record in records {
        let style = names::naming_style(record.stem());
        if matches!(style, NamingStyle::Lower | NamingStyle::Upper) {
            continue;
        }
        by_folder.entry(record.folder()).or_default().push((record, style));
    }

    let mut result = Vec::new();
    for (folder, styled) in by_folder {
        if styled.len() < cfg.naming_min_files {
            continue;
        }
        let mut counts: AHashMap<NamingStyle, usize> = AHashMap::new();
        for (_, style) in &styled {
            *counts.entry(*style).or_default() += 1;
        }
        let Some((dominant, count)) = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        else {
            continue;
        };

        let share = (count * 100 / styled.len()) as u8;
        if share < cfg.naming_majority_percent || count == styled.len() {
            continue;
        }

        let mut outliers: Vec<PathBuf> = styled
            .iter()
            .filter(|(_, style)| *style != dominant)
            .map(|(r, _)| r.path.clone())
            .collect();
        outliers.sort();

        result.push(NamingInconsistency {
            folder: folder.to_path_buf(),
            dominant,
            dominant_share: share,
            outliers,
        });
    }

    result.sort_by(|a, b| a.folder.cmp(&b.folder));
    result
}

impl Relationships {
    pub fn detect(records: &[FileRecord], cfg: &DetectorConfig) -> Self {
        let found = Self {
            duplicates: find_duplicates(records),
            backups: find_backup_groups(records),
            series: find_series(records, cfg.min_series_len),
            naming: find_naming_outliers(records, cfg),
            related_media: temporal::related_media(
                records,
                cfg.related_media_window_minutes,
                cfg.related_media_min_members,
            ),
            temporal: temporal::temporal_groups(
                records,
                cfg.temporal_window_days,
                cfg.temporal_min_members,
            ),
            projects: project::detect_projects(records, cfg.project_threshold),
        };
        debug!(
            "Detected {} duplicate clusters, {} backup groups, {} series, {} naming reports, {} media groups, {} temporal groups, {} projects",
            found.duplicates.len(),
            found.backups.len(),
            found.series.len(),
            found.naming.len(),
            found.related_media.len(),
            found.temporal.len(),
            found.projects.len(),
        );
        found
    }

    /// Whether `path` lives inside a folder scored as a project.
    pub fn in_project(&self, path: &Path) -> bool {
        self.projects.iter().any(|p| path.starts_with(&p.folder))
    }

    /// Attach relationship tags to each record.
    pub fn annotate(&self, records: &mut [FileRecord]) {
        let mut tags: AHashMap<&Path, Vec<RelationTag>> = AHashMap::new();

        for (cluster, dup) in self.duplicates.iter().enumerate() {
            for (i, path) in dup.members.iter().enumerate() {
                tags.entry(path).or_default().push(RelationTag::Duplicate {
                    cluster,
                    canonical: i == 0,
                });
            }
        }
        for (group, backup) in self.backups.iter().enumerate() {
            tags.entry(&backup.canonical)
                .or_default()
                .push(RelationTag::BackupVariant { group, canonical: true });
            for path in &backup.variants {
                tags.entry(path)
                    .or_default()
                    .push(RelationTag::BackupVariant { group, canonical: false });
            }
        }
        for (series, run) in self.series.iter().enumerate() {
            for path in &run.members {
                let position = names::series_key(
                    &path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                )
                .map(|(_, n)| n)
                .unwrap_or_default();
                tags.entry(path)
                    .or_default()
                    .push(RelationTag::Series { series, position });
            }
        }
        for report in &self.naming {
            for path in &report.outliers {
                tags.entry(path).or_default().push(RelationTag::NamingOutlier);
            }
        }
        for (group, media) in self.related_media.iter().enumerate() {
            for path in &media.members {
                tags.entry(path).or_default().push(RelationTag::RelatedMedia { group });
            }
        }
        for (group, period) in self.temporal.iter().enumerate() {
            for path in &period.members {
                tags.entry(path).or_default().push(RelationTag::Temporal { group });
            }
        }

        for record in records.iter_mut() {
            if let Some(found) = tags.remove(record.path.as_path()) {
                record.tags.extend(found);
            }
            if self.in_project(&record.path) {
                record.tags.push(RelationTag::ProjectMember);
            }
        }
    }

    /// Turn detector findings into candidates. Project members are left out.
    pub fn candidates(&self, cfg: &DetectorConfig, now: DateTime<Utc>) -> Vec<Candidate> {
        let mut out = Vec::new();

        for dup in &self.duplicates {
            out.push(detector_candidate(
                ActionKind::Cleanup,
                dup.redundant().to_vec(),
                dup.confidence,
                vec![Factor::new("duplicate_name_and_size", dup.confidence)],
                None,
                format!(
                    "Remove {} duplicate(s) of {}",
                    dup.redundant().len(),
                    file_name(dup.canonical())
                ),
            ));
        }

        for backup in &self.backups {
            let confidence = if backup.same_size { 80 } else { 70 };
            out.push(detector_candidate(
                ActionKind::Cleanup,
                backup.variants.clone(),
                confidence,
                vec![Factor::new("backup_variant", confidence)],
                None,
                format!(
                    "Remove {} backup variant(s) of {}",
                    backup.variants.len(),
                    file_name(&backup.canonical)
                ),
            ));
        }

        for report in &self.naming {
            let confidence = 30.0 + f64::from(report.dominant_share) / 3.0;
            out.push(detector_candidate(
                ActionKind::Review,
                report.outliers.clone(),
                confidence,
                vec![Factor::new("naming_outlier", report.dominant_share)],
                None,
                format!(
                    "Rename {} file(s) in {} to match the folder's {:?} naming",
                    report.outliers.len(),
                    report.folder.display(),
                    report.dominant
                ),
            ));
        }

        for run in &self.series {
            let mut confidence = 60.0 + (run.len().min(10) as f64);
            if run.contiguous {
                confidence += 10.0;
            }
            out.push(detector_candidate(
                ActionKind::Organize,
                run.members.clone(),
                confidence,
                vec![
                    Factor::new("series_length", (run.len() * 10).min(100) as u32),
                    Factor::new("series_contiguous", if run.contiguous { 100u8 } else { 40 }),
                ],
                Some(run.folder.join(run.base_name())),
                format!("Group {} numbered files {}", run.len(), run.pattern),
            ));
        }

        for media in &self.related_media {
            if let Some(folder) = common_folder(&media.members) {
                out.push(detector_candidate(
                    ActionKind::Organize,
                    media.members.clone(),
                    65,
                    vec![Factor::new("related_media_batch", (media.len() * 10).min(100) as u32)],
                    Some(folder.join(media.start.format("%Y-%m-%d").to_string())),
                    format!("Group {} media files taken together", media.len()),
                ));
            }
        }

        let archive_after = Duration::days(cfg.temporal_archive_after_days);
        for period in &self.temporal {
            if now - period.end < archive_after {
                continue;
            }
            if let Some(folder) = common_folder(&period.members) {
                out.push(detector_candidate(
                    ActionKind::Archive,
                    period.members.clone(),
                    55,
                    vec![Factor::new("inactive_period", 55u8)],
                    Some(folder.join("Archive").join(period.start.format("%Y-%m").to_string())),
                    format!(
                        "Archive {} files from {}",
                        period.len(),
                        period.start.format("%B %Y")
                    ),
                ));
            }
        }

        out.into_iter()
            .filter_map(|mut candidate| {
                candidate.targets.retain(|t| !self.in_project(t));
                (!candidate.targets.is_empty()).then_some(candidate)
            })
            .collect()
    }
}

fn detector_candidate(
    kind: ActionKind,
    targets: Vec<PathBuf>,
    confidence: impl Into<f64>,
    rationale: Vec<Factor>,
    destination: Option<PathBuf>,
    description: String,
) -> Candidate {
    Candidate {
        kind,
        targets,
        confidence: crate::types::clamp_score(confidence.into()),
        rationale,
        destination,
        description,
        source: CandidateSource::Detector,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Parent folder shared by every path, if there is exactly one.
fn common_folder(paths: &[PathBuf]) -> Option<PathBuf> {
    let first = paths.first()?.parent()?;
    paths
        .iter()
        .all(|p| p.parent() == Some(first))
        .then(|| first.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extractor::extract_record;
    use crate::types::RawFileMeta;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
    }

    fn rec(path: &str, size: u64, day: u32) -> FileRecord {
        extract_record(&RawFileMeta::new(path, size, at(day))).unwrap()
    }

    #[test]
    fn test_duplicates_pick_earliest_as_canonical() {
        let records = vec![
            rec("/d/photo - copy.jpg", 500, 3),
            rec("/d/photo.jpg", 500, 1),
            rec("/d/photo (1).jpg", 500, 2),
            rec("/d/other.jpg", 500, 1),
        ];
        let dups = find_duplicates(&records);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].members.len(), 3);
        assert_eq!(dups[0].canonical(), Path::new("/d/photo.jpg"));
        assert_eq!(dups[0].confidence, 90);
    }

    #[test]
    fn test_different_sizes_are_not_duplicates() {
        let records = vec![rec("/d/a.txt", 10, 1), rec("/d/a - copy.txt", 11, 2)];
        assert!(find_duplicates(&records).is_empty());
        // The backup heuristic still pairs them.
        let backups = find_backup_groups(&records);
        assert_eq!(backups.len(), 1);
        assert!(!backups[0].same_size);
        assert_eq!(backups[0].canonical, PathBuf::from("/d/a.txt"));
    }

    #[test]
    fn test_series_reports_length_and_gaps() {
        let mut records: Vec<FileRecord> = (1..=5).map(|i| rec(&format!("/s/img_{}.png", i), 10, 1)).collect();
        let series = find_series(&records, 3);
        assert_eq!(series.len(), 1);
        assert_eq!((series[0].first, series[0].last), (1, 5));
        assert!(series[0].contiguous);
        assert_eq!(series[0].base_name(), "img");

        records.remove(2);
        let series = find_series(&records, 3);
        assert!(!series[0].contiguous);
        assert_eq!(series[0].len(), 4);
    }

    #[test]
    fn test_series_numbers_at_the_top_of_the_range() {
        let records = vec![
            rec("/s/a_18446744073709551614.txt", 10, 1),
            rec("/s/a_18446744073709551615.txt", 10, 1),
            rec("/s/a_018446744073709551615.txt", 10, 1),
        ];
        let series = find_series(&records, 3);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].last, u64::MAX);
        assert_eq!(series[0].len(), 3);
        assert!(!series[0].contiguous);
    }

    #[test]
    fn test_naming_outliers_flag_minority_style() {
        let mut records: Vec<FileRecord> = ["a_one", "b_two", "c_three", "d_four", "e_five"]
            .iter()
            .map(|n| rec(&format!("/n/{}.txt", n), 10, 1))
            .collect();
        records.push(rec("/n/SomeFile.txt", 10, 1));
        let reports = find_naming_outliers(&records, &DetectorConfig::default());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].dominant, NamingStyle::Snake);
        assert_eq!(reports[0].outliers, vec![PathBuf::from("/n/SomeFile.txt")]);
    }

    #[test]
    fn test_annotate_and_project_suppression() {
        let mut records = vec![
            rec("/p/Cargo.toml", 10, 1),
            rec("/p/.gitignore", 10, 1),
            rec("/p/main.rs", 10, 1),
            rec("/p/main - copy.rs", 10, 2),
            rec("/p/lib.rs", 10, 1),
            rec("/p/util.rs", 10, 1),
        ];
        let cfg = DetectorConfig::default();
        let found = Relationships::detect(&records, &cfg);
        assert_eq!(found.projects.len(), 1);
        assert!(!found.duplicates.is_empty());
        assert!(found.candidates(&cfg, at(20)).is_empty());

        found.annotate(&mut records);
        assert!(records.iter().all(|r| r.tags.contains(&RelationTag::ProjectMember)));
        assert!(records[3]
            .tags
            .contains(&RelationTag::Duplicate { cluster: 0, canonical: false }));
    }
}
