use crate::types::{Category, FileRecord};
use ahash::AHashMap;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

const MANIFEST_NAMES: &[&str] = &[
    "cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "makefile",
    "cmakelists.txt",
    "gemfile",
    "composer.json",
];

const VCS_MARKERS: &[&str] = &[".gitignore", ".gitattributes", ".gitmodules", ".hgignore"];

const MANIFEST_WEIGHT: f64 = 30.0;
const VCS_WEIGHT: f64 = 20.0;
const README_WEIGHT: f64 = 5.0;
const CODE_RATIO_WEIGHT: f64 = 35.0;
const CODE_COUNT_BONUS: f64 = 10.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectSignals {
    pub manifest: bool,
    pub vcs_marker: bool,
    pub readme: bool,
    pub code_files: usize,
    pub total_files: usize,
}

impl ProjectSignals {
    pub fn code_ratio(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.code_files as f64 / self.total_files as f64
        }
    }

    /// Weighted combination of the signals, `0..=100`.
    pub fn score(&self) -> u8 {
        let mut score = self.code_ratio() * CODE_RATIO_WEIGHT;
        if self.manifest {
            score += MANIFEST_WEIGHT;
        }
        if self.vcs_marker {
            score += VCS_WEIGHT;
        }
        if self.readme {
            score += README_WEIGHT;
        }
        if self.code_files >= 3 {
            score += CODE_COUNT_BONUS;
        }
        crate::types::clamp_score(score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectAssessment {
    pub folder: PathBuf,
    pub score: u8,
    pub signals: ProjectSignals,
}

/// Folder owning a path that lives under a `.git` directory, if any.
pub fn vcs_root(path: &Path) -> Option<PathBuf> {
    let mut root = PathBuf::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            if name == ".git" {
                return Some(root);
            }
        }
        root.push(component.as_os_str());
    }
    None
}

/// Score every folder in the record set and return those at or above
/// `threshold`, sorted by folder path.
pub fn detect_projects(records: &[FileRecord], threshold: u8) -> Vec<ProjectAssessment> {
    let mut by_folder: AHashMap<PathBuf, ProjectSignals> = AHashMap::new();

    for record in records {
        if let Some(root) = vcs_root(&record.path) {
            by_folder.entry(root).or_default().vcs_marker = true;
            continue;
        }

        let signals = by_folder.entry(record.folder().to_path_buf()).or_default();
        let lower = record.name.to_lowercase();
        signals.total_files += 1;

        if MANIFEST_NAMES.contains(&lower.as_str()) {
            signals.manifest = true;
        }
        if VCS_MARKERS.contains(&lower.as_str()) {
            signals.vcs_marker = true;
        }
        if lower.starts_with("readme") {
            signals.readme = true;
        }
        if matches!(record.category, Category::Code | Category::Web) {
            signals.code_files += 1;
        }
    }

    let mut projects: Vec<ProjectAssessment> = by_folder
        .into_iter()
        .map(|(folder, signals)| ProjectAssessment {
            folder,
            score: signals.score(),
            signals,
        })
        .filter(|p| p.score >= threshold)
        .collect();
    projects.sort_by(|a, b| a.folder.cmp(&b.folder));
    projects
}
