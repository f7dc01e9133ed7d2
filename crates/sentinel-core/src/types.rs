use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Metadata for one file, as delivered by the folder watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFileMeta {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Taken from `path` when absent.
    #[serde(default)]
    pub extension: Option<String>,
}

impl RawFileMeta {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
            extension: None,
        }
    }
}

/// Ordered contents of one folder at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSnapshot {
    pub folder: PathBuf,
    pub files: Vec<RawFileMeta>,
    pub taken_at: DateTime<Utc>,
}

/// Host metrics supplied by the metrics collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemHealth {
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub idle: bool,
    pub cpu_percent: f32,
}

impl SystemHealth {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.total_bytes.saturating_sub(self.free_bytes)) as f64 * 100.0 / self.total_bytes as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Images,
    Documents,
    Video,
    Audio,
    Archives,
    Temporary,
    Code,
    Executables,
    Backups,
    Spreadsheets,
    Presentations,
    Web,
    Config,
    Databases,
    Other,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::Images,
        Category::Documents,
        Category::Video,
        Category::Audio,
        Category::Archives,
        Category::Temporary,
        Category::Code,
        Category::Executables,
        Category::Backups,
        Category::Spreadsheets,
        Category::Presentations,
        Category::Web,
        Category::Config,
        Category::Databases,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Images => "images",
            Category::Documents => "documents",
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Archives => "archives",
            Category::Temporary => "temporary",
            Category::Code => "code",
            Category::Executables => "executables",
            Category::Backups => "backups",
            Category::Spreadsheets => "spreadsheets",
            Category::Presentations => "presentations",
            Category::Web => "web",
            Category::Config => "config",
            Category::Databases => "databases",
            Category::Other => "other",
        }
    }

    /// Subfolder name used when organizing by type.
    pub fn folder_name(&self) -> &'static str {
        match self {
            Category::Images => "Images",
            Category::Documents => "Documents",
            Category::Video => "Videos",
            Category::Audio => "Audio",
            Category::Archives => "Archives",
            Category::Temporary => "Temporary",
            Category::Code => "Code",
            Category::Executables => "Installers",
            Category::Backups => "Backups",
            Category::Spreadsheets => "Spreadsheets",
            Category::Presentations => "Presentations",
            Category::Web => "Web",
            Category::Config => "Config",
            Category::Databases => "Databases",
            Category::Other => "Other",
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Category::Images | Category::Video | Category::Audio)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Relationship found by the detector. Indices point into the matching
/// collection of [`crate::analysis::detector::Relationships`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum RelationTag {
    Duplicate { cluster: usize, canonical: bool },
    BackupVariant { group: usize, canonical: bool },
    Series { series: usize, position: u64 },
    NamingOutlier,
    RelatedMedia { group: usize },
    Temporal { group: usize },
    ProjectMember,
}

/// One analyzed file. Built once per scan and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Lowercase, without the leading dot. Empty when the file has none.
    pub extension: String,
    pub category: Category,
    pub tags: Vec<RelationTag>,
}

impl FileRecord {
    pub fn folder(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.modified).num_days().max(0)
    }

    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Cleanup,
    Organize,
    Archive,
    Compress,
    Review,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Cleanup,
        ActionKind::Organize,
        ActionKind::Archive,
        ActionKind::Compress,
        ActionKind::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Cleanup => "cleanup",
            ActionKind::Organize => "organize",
            ActionKind::Archive => "archive",
            ActionKind::Compress => "compress",
            ActionKind::Review => "review",
        }
    }

    /// Whether executing this kind changes anything on disk.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, ActionKind::Review)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cleanup" => Ok(ActionKind::Cleanup),
            "organize" => Ok(ActionKind::Organize),
            "archive" => Ok(ActionKind::Archive),
            "compress" => Ok(ActionKind::Compress),
            "review" => Ok(ActionKind::Review),
            other => Err(format!("unknown action kind '{}'", other)),
        }
    }
}

/// One contributing signal behind a recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Factor {
    pub name: String,
    /// Sub-score in `0..=100`.
    pub score: u8,
}

impl Factor {
    pub fn new(name: impl Into<String>, score: impl Into<f64>) -> Self {
        Self {
            name: name.into(),
            score: clamp_score(score.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Low,
    Medium,
    High,
}

impl PriorityTier {
    pub fn from_confidence(confidence: u8) -> Self {
        match confidence {
            90..=u8::MAX => PriorityTier::High,
            60..=89 => PriorityTier::Medium,
            _ => PriorityTier::Low,
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriorityTier::High => "high",
            PriorityTier::Medium => "medium",
            PriorityTier::Low => "low",
        })
    }
}

/// Where a candidate came from. Rule candidates override heuristic ones for
/// the files they claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CandidateSource {
    Rule { rule_id: i64, priority: u8 },
    Detector,
    Insight,
    Scorer,
}

impl CandidateSource {
    pub fn is_rule(&self) -> bool {
        matches!(self, CandidateSource::Rule { .. })
    }
}

/// A pre-aggregation suggestion produced by one analysis layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub kind: ActionKind,
    pub targets: Vec<PathBuf>,
    pub confidence: u8,
    pub rationale: Vec<Factor>,
    pub destination: Option<PathBuf>,
    pub description: String,
    pub source: CandidateSource,
}

/// A scored, ranked suggested action over a specific set of files.
///
/// Only constructed through [`Recommendation::new`], which rejects an empty
/// target set and clamps the confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    kind: ActionKind,
    targets: Vec<PathBuf>,
    confidence: u8,
    rationale: Vec<Factor>,
    tier: PriorityTier,
    destination: Option<PathBuf>,
    description: String,
}

impl Recommendation {
    pub fn new(
        kind: ActionKind,
        targets: Vec<PathBuf>,
        confidence: impl Into<f64>,
        rationale: Vec<Factor>,
        destination: Option<PathBuf>,
        description: impl Into<String>,
    ) -> Option<Self> {
        if targets.is_empty() {
            return None;
        }
        let confidence = clamp_score(confidence.into());
        Some(Self {
            kind,
            targets,
            confidence,
            rationale,
            tier: PriorityTier::from_confidence(confidence),
            destination,
            description: description.into(),
        })
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn rationale(&self) -> &[Factor] {
        &self.rationale
    }

    pub fn tier(&self) -> PriorityTier {
        self.tier
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

pub fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}
