//! Per-file predictive scoring.
//!
//! Every factor is an independent function returning an optional capped
//! sub-score. [`combine`] turns the factors present into a normalized
//! weighted mean, so adding factors never pushes a score past 100.

use crate::analysis::names;
use crate::analysis::space::SpaceForecast;
use crate::config::{FactorWeights, LearningConfig, ScorerConfig};
use crate::learning::LearningProfile;
use crate::types::{clamp_score, ActionKind, Candidate, CandidateSource, Category, Factor, FileRecord, RelationTag};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

const THROWAWAY_NAMES: &[&str] = &[
    "untitled",
    "new document",
    "new text document",
    "new file",
    "copy of",
    "tmp",
    "temp",
    "scratch",
];

pub const AGE: &str = "age";
pub const TEMP_EXTENSION: &str = "temp_extension";
pub const SIZE_OUTLIER: &str = "size_outlier";
pub const NAMING: &str = "naming_pattern";
pub const HISTORY: &str = "history";
pub const DISK_PRESSURE: &str = "disk_pressure";

/// Inputs shared by every scoring call in one analysis pass.
pub struct ScoringContext<'a> {
    pub scorer: &'a ScorerConfig,
    pub learning: &'a LearningConfig,
    pub profile: &'a LearningProfile,
    pub forecast: Option<&'a SpaceForecast>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub count: usize,
    pub median_size: u64,
}

impl FolderStats {
    pub fn of<'a>(records: impl IntoIterator<Item = &'a FileRecord>) -> Self {
        let mut sizes: Vec<u64> = records.into_iter().map(|r| r.size).collect();
        sizes.sort_unstable();
        Self {
            count: sizes.len(),
            median_size: sizes.get(sizes.len() / 2).copied().unwrap_or(0),
        }
    }
}

/// Age relative to the user's preferred cleanup age: at the preference the
/// sub-score is 50, at twice the preference it caps at 100.
pub fn age_factor(record: &FileRecord, now: DateTime<Utc>, preferred_days: f64) -> Option<Factor> {
    let age = record.age_days(now) as f64;
    if age <= 0.0 || preferred_days <= 0.0 {
        return None;
    }
    Some(Factor::new(AGE, (age / preferred_days * 50.0).min(100.0)))
}

pub fn temp_extension_factor(record: &FileRecord, cfg: &ScorerConfig) -> Option<Factor> {
    if cfg.temp_extensions.iter().any(|e| e.eq_ignore_ascii_case(&record.extension)) {
        Some(Factor::new(TEMP_EXTENSION, 95u8))
    } else if record.category == Category::Temporary {
        Some(Factor::new(TEMP_EXTENSION, 85u8))
    } else {
        None
    }
}

pub fn is_large(record: &FileRecord, cfg: &ScorerConfig) -> bool {
    record.size_mb() >= cfg.large_file_mb
}

pub fn size_outlier_factor(record: &FileRecord, stats: &FolderStats, cfg: &ScorerConfig) -> Option<Factor> {
    if is_large(record, cfg) {
        let over = (record.size_mb() / cfg.large_file_mb - 1.0) * 10.0;
        return Some(Factor::new(SIZE_OUTLIER, 80.0 + over.clamp(0.0, 20.0)));
    }
    if stats.count >= 5
        && stats.median_size > 0
        && record.size >= stats.median_size.saturating_mul(10)
        && record.size_mb() >= 1.0
    {
        return Some(Factor::new(SIZE_OUTLIER, 60u8));
    }
    None
}

/// Throwaway names ("untitled", "copy of ...") and names flagged as naming
/// outliers by the detector.
pub fn naming_factor(record: &FileRecord) -> Option<Factor> {
    let stem = names::normalize_stem(record.stem());
    let throwaway = record.name.starts_with("~$")
        || THROWAWAY_NAMES
            .iter()
            .any(|n| stem == *n || stem.starts_with(&format!("{} ", n)));
    if throwaway {
        Some(Factor::new(NAMING, 75u8))
    } else if record.tags.contains(&RelationTag::NamingOutlier) {
        Some(Factor::new(NAMING, 55u8))
    } else {
        None
    }
}

pub fn history_factor(profile: &LearningProfile, kind: ActionKind) -> Option<Factor> {
    (profile.counters(kind).attempts > 0).then(|| Factor::new(HISTORY, profile.action_confidence(kind)))
}

pub fn disk_pressure_factor(forecast: Option<&SpaceForecast>) -> Option<Factor> {
    forecast
        .and_then(SpaceForecast::pressure_score)
        .map(|score| Factor::new(DISK_PRESSURE, score))
}

fn weight_of(name: &str, weights: &FactorWeights) -> f64 {
    match name {
        AGE => weights.age,
        TEMP_EXTENSION => weights.temp_extension,
        SIZE_OUTLIER => weights.size_outlier,
        NAMING => weights.naming,
        HISTORY => weights.history,
        DISK_PRESSURE => weights.disk_pressure,
        _ => 0.0,
    }
}

/// Normalized weighted mean of the factors present, in `0..=100`.
pub fn combine(factors: &[Factor], weights: &FactorWeights) -> f64 {
    let (sum, total) = factors.iter().fold((0.0, 0.0), |(sum, total), f| {
        let w = weight_of(&f.name, weights).max(0.0);
        (sum + w * f64::from(f.score), total + w)
    });
    if total <= 0.0 {
        0.0
    } else {
        sum / total
    }
}

fn compressible(record: &FileRecord) -> bool {
    !matches!(
        record.category,
        Category::Archives | Category::Images | Category::Video | Category::Audio
    ) && record.extension != "gz"
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileScore {
    pub path: PathBuf,
    pub kind: ActionKind,
    pub confidence: u8,
    pub factors: Vec<Factor>,
}

/// Score one file, or `None` when no primary signal suggests an action.
pub fn score_record(record: &FileRecord, stats: &FolderStats, ctx: &ScoringContext<'_>) -> Option<FileScore> {
    if record.tags.contains(&RelationTag::ProjectMember) {
        return None;
    }

    let preferred = ctx.profile.preferred_cleanup_age(ctx.learning);
    let age = age_factor(record, ctx.now, preferred);
    let temp = temp_extension_factor(record, ctx.scorer);
    let size = size_outlier_factor(record, stats, ctx.scorer);
    let naming = naming_factor(record);

    let old_enough = age.as_ref().map_or(false, |f| f.score >= 50);
    let kind = if temp.is_some() {
        ActionKind::Cleanup
    } else if is_large(record, ctx.scorer) {
        if record.age_days(ctx.now) >= ctx.scorer.large_unused_days {
            ActionKind::Archive
        } else if compressible(record) {
            ActionKind::Compress
        } else {
            return None;
        }
    } else if naming.as_ref().map_or(false, |f| f.score >= 75) && old_enough {
        ActionKind::Cleanup
    } else {
        return None;
    };

    let factors: Vec<Factor> = [
        age,
        temp,
        size,
        naming,
        history_factor(ctx.profile, kind),
        disk_pressure_factor(ctx.forecast),
    ]
    .into_iter()
    .flatten()
    .collect();

    let confidence = combine(&factors, &ctx.scorer.weights) + f64::from(ctx.profile.bias(kind));
    Some(FileScore {
        path: record.path.clone(),
        kind,
        confidence: clamp_score(confidence),
        factors,
    })
}

/// Score every record and group the results per (folder, kind). A group's
/// confidence and factor sub-scores are the means over its members.
pub fn score_records(records: &[FileRecord], ctx: &ScoringContext<'_>) -> Vec<Candidate> {
    let mut by_folder: AHashMap<&Path, Vec<&FileRecord>> = AHashMap::new();
    for record in records {
        by_folder.entry(record.folder()).or_default().push(record);
    }
    let stats: AHashMap<&Path, FolderStats> = by_folder
        .iter()
        .map(|(folder, members)| (*folder, FolderStats::of(members.iter().copied())))
        .collect();

    let mut order: Vec<(PathBuf, ActionKind)> = Vec::new();
    let mut groups: AHashMap<(PathBuf, ActionKind), Vec<FileScore>> = AHashMap::new();

    for record in records {
        let folder_stats = stats.get(record.folder()).copied().unwrap_or_default();
        let Some(score) = score_record(record, &folder_stats, ctx) else {
            continue;
        };
        if score.confidence < ctx.scorer.min_confidence {
            continue;
        }
        let key = (record.folder().to_path_buf(), score.kind);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(score);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let scores = groups.remove(&key)?;
            let (folder, kind) = key;
            Some(group_candidate(&folder, kind, scores))
        })
        .collect()
}

fn group_candidate(folder: &Path, kind: ActionKind, scores: Vec<FileScore>) -> Candidate {
    let n = scores.len() as f64;
    let confidence = scores.iter().map(|s| f64::from(s.confidence)).sum::<f64>() / n;

    let mut factor_order: Vec<String> = Vec::new();
    let mut factor_sums: AHashMap<String, (f64, usize)> = AHashMap::new();
    for factor in scores.iter().flat_map(|s| &s.factors) {
        let slot = factor_sums.entry(factor.name.clone()).or_insert_with(|| {
            factor_order.push(factor.name.clone());
            (0.0, 0)
        });
        slot.0 += f64::from(factor.score);
        slot.1 += 1;
    }
    let rationale = factor_order
        .into_iter()
        .map(|name| {
            let (sum, count) = factor_sums[&name];
            Factor::new(name, sum / count as f64)
        })
        .collect();

    let description = match kind {
        ActionKind::Cleanup => format!("Clean up {} stale file(s) in {}", scores.len(), folder.display()),
        ActionKind::Archive => format!("Archive {} large unused file(s) in {}", scores.len(), folder.display()),
        ActionKind::Compress => format!("Compress {} large file(s) in {}", scores.len(), folder.display()),
        other => format!("{} {} file(s) in {}", other, scores.len(), folder.display()),
    };

    Candidate {
        kind,
        targets: scores.into_iter().map(|s| s.path).collect(),
        confidence: clamp_score(confidence),
        rationale,
        destination: (kind == ActionKind::Archive).then(|| folder.join("Archive")),
        description,
        source: CandidateSource::Scorer,
    }
}
