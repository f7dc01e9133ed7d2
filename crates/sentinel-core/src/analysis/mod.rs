//! Read-only analysis over folder snapshots.
//!
//! Each layer is an independent function over the same `FileRecord` set:
//! rules, detector findings, category insights and per-file scores all
//! produce [`Candidate`]s that [`aggregator::aggregate`] merges and ranks.

pub mod aggregator;
pub mod detector;
pub mod extractor;
pub mod insights;
pub mod names;
pub mod project;
pub mod scorer;
pub mod space;
pub mod temporal;

use crate::config::EngineConfig;
use crate::error::ScanError;
use crate::learning::LearningProfile;
use crate::progress::ProgressReporter;
use crate::rules::{RuleMatch, RuleSet};
use crate::types::{Candidate, FileRecord, FolderSnapshot, Recommendation};
use chrono::{DateTime, Utc};
use detector::{RelationshipSummary, Relationships};
use project::ProjectAssessment;
use rayon::prelude::*;
use scorer::ScoringContext;
use space::SpaceForecast;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared read-only inputs for one analysis pass.
pub struct AnalysisContext<'a> {
    pub config: &'a EngineConfig,
    pub rules: &'a RuleSet,
    pub profile: &'a LearningProfile,
    pub forecast: Option<&'a SpaceForecast>,
    pub now: DateTime<Utc>,
}

impl<'a> AnalysisContext<'a> {
    fn scoring(&self) -> ScoringContext<'a> {
        let config: &'a EngineConfig = self.config;
        ScoringContext {
            scorer: &config.scorer,
            learning: &config.learning,
            profile: self.profile,
            forecast: self.forecast,
            now: self.now,
        }
    }
}

/// Everything found in one folder.
#[derive(Debug, Clone)]
pub struct FolderAnalysis {
    pub folder: PathBuf,
    pub records: Vec<FileRecord>,
    pub errors: Vec<ScanError>,
    pub relationships: Relationships,
    /// Rule fragments first, then detector, insight and scorer candidates.
    pub candidates: Vec<Candidate>,
    pub rule_matches: Vec<RuleMatch>,
}

/// Analyze one folder's records. `projects` are the project folders found
/// across the whole run; files below any of them get no file-level
/// suggestions from the heuristic layers.
pub fn analyze_records(
    folder: PathBuf,
    mut records: Vec<FileRecord>,
    errors: Vec<ScanError>,
    projects: &[ProjectAssessment],
    ctx: &AnalysisContext<'_>,
) -> FolderAnalysis {
    let detector_cfg = &ctx.config.detector;
    let mut relationships = Relationships::detect(&records, detector_cfg);
    relationships.projects = projects
        .iter()
        .filter(|p| folder.starts_with(&p.folder))
        .cloned()
        .collect();
    relationships.annotate(&mut records);

    let (mut candidates, rule_matches) = ctx.rules.evaluate(&records, ctx.now);

    // Version-control internals are never suggested for anything.
    if project::vcs_root(&folder).is_none() {
        candidates.extend(relationships.candidates(detector_cfg, ctx.now));
        candidates.extend(insights::insights(&records, detector_cfg, &ctx.config.scorer, ctx.now));
        candidates.extend(scorer::score_records(&records, &ctx.scoring()));
    }

    FolderAnalysis {
        folder,
        records,
        errors,
        relationships,
        candidates,
        rule_matches,
    }
}

/// Analyze a single snapshot on its own.
pub fn analyze_snapshot(snapshot: &FolderSnapshot, ctx: &AnalysisContext<'_>) -> FolderAnalysis {
    let (records, errors) = extractor::extract_snapshot(snapshot);
    let projects = project::detect_projects(&records, ctx.config.detector.project_threshold);
    analyze_records(snapshot.folder.clone(), records, errors, &projects, ctx)
}

/// Analyze every snapshot in parallel. Output keeps snapshot order.
pub fn analyze_snapshots(
    snapshots: &[FolderSnapshot],
    ctx: &AnalysisContext<'_>,
    reporter: &dyn ProgressReporter,
) -> (Vec<FolderAnalysis>, Vec<ProjectAssessment>) {
    let extracted: Vec<(Vec<FileRecord>, Vec<ScanError>)> = snapshots
        .par_iter()
        .map(extractor::extract_snapshot)
        .collect();

    let all_records: Vec<FileRecord> = extracted
        .iter()
        .flat_map(|(records, _)| records.iter().cloned())
        .collect();
    let projects = project::detect_projects(&all_records, ctx.config.detector.project_threshold);
    drop(all_records);

    let done = AtomicUsize::new(0);
    let total = snapshots.len();
    let analyses = snapshots
        .par_iter()
        .zip(extracted.into_par_iter())
        .map(|(snapshot, (records, errors))| {
            let analysis = analyze_records(snapshot.folder.clone(), records, errors, &projects, ctx);
            reporter.on_folder_analyzed(done.fetch_add(1, Ordering::Relaxed) + 1, total);
            analysis
        })
        .collect();

    (analyses, projects)
}

/// Merge every folder's candidates into one ranked list.
pub fn recommend(analyses: &[FolderAnalysis], ctx: &AnalysisContext<'_>) -> Vec<Recommendation> {
    let candidates: Vec<Candidate> = analyses
        .iter()
        .flat_map(|a| a.candidates.iter().cloned())
        .collect();
    aggregator::aggregate(candidates, ctx.profile, &ctx.config.learning)
}

pub fn summarize(analyses: &[FolderAnalysis], projects: &[ProjectAssessment]) -> RelationshipSummary {
    let mut summary = RelationshipSummary {
        projects: projects.len(),
        ..RelationshipSummary::default()
    };
    for analysis in analyses {
        summary.add(&analysis.relationships);
    }
    summary
}

/// Whether `path` sits below one of `projects`.
pub fn in_any_project(path: &Path, projects: &[ProjectAssessment]) -> bool {
    projects.iter().any(|p| path.starts_with(&p.folder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use crate::types::{ActionKind, RawFileMeta};
    use chrono::Duration;

    fn snapshot(folder: &str, files: &[(&str, u64, i64)], now: DateTime<Utc>) -> FolderSnapshot {
        FolderSnapshot {
            folder: PathBuf::from(folder),
            files: files
                .iter()
                .map(|(name, size, age)| {
                    RawFileMeta::new(Path::new(folder).join(name), *size, now - Duration::days(*age))
                })
                .collect(),
            taken_at: now,
        }
    }

    #[test]
    fn test_project_folders_get_no_cleanup() {
        let now = Utc::now();
        let config = EngineConfig::default();
        let rules = RuleSet::default();
        let profile = LearningProfile::default();
        let ctx = AnalysisContext {
            config: &config,
            rules: &rules,
            profile: &profile,
            forecast: None,
            now,
        };
        let snapshots = vec![
            snapshot("/w/app", &[("Cargo.toml", 10, 90), ("README.md", 10, 90), ("main.rs", 10, 90), ("lib.rs", 10, 90), ("util.rs", 10, 90)], now),
            snapshot("/w/app/target", &[("build.tmp", 10, 90)], now),
            snapshot("/w/downloads", &[("junk.tmp", 10, 90)], now),
        ];
        let (analyses, projects) = analyze_snapshots(&snapshots, &ctx, &SilentReporter);
        assert_eq!(projects.len(), 1);
        assert!(in_any_project(Path::new("/w/app/target/build.tmp"), &projects));

        let recs = recommend(&analyses, &ctx);
        let cleaned: Vec<&PathBuf> = recs
            .iter()
            .filter(|r| r.kind() == ActionKind::Cleanup)
            .flat_map(|r| r.targets())
            .collect();
        assert_eq!(cleaned, vec![&PathBuf::from("/w/downloads/junk.tmp")]);
        assert_eq!(summarize(&analyses, &projects).projects, 1);
    }
}
