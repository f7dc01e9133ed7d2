use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub database_path: String,
    pub backup_dir: String,
    /// Committed checkpoints older than this are expired by the sweep.
    pub retention_days: i64,
    pub sweep_interval_hours: i64,
    /// Upper bound for any single backup, restore or mutation call.
    pub fs_timeout_secs: u64,
    pub detector: DetectorConfig,
    pub scorer: ScorerConfig,
    pub learning: LearningConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            ignore_patterns: vec!["**/.sentinel_backups/**".to_string()],
            database_path: "sentinel.db".to_string(),
            backup_dir: ".sentinel_backups".to_string(),
            retention_days: 30,
            sweep_interval_hours: 24,
            fs_timeout_secs: 30,
            detector: DetectorConfig::default(),
            scorer: ScorerConfig::default(),
            learning: LearningConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn fs_timeout(&self) -> Duration {
        Duration::from_secs(self.fs_timeout_secs.max(1))
    }

    pub fn backup_path(&self) -> PathBuf {
        PathBuf::from(&self.backup_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_series_len: usize,
    pub related_media_min_members: usize,
    pub related_media_window_minutes: i64,
    pub temporal_min_members: usize,
    pub temporal_window_days: i64,
    /// Temporal groups whose newest member is older than this are archive candidates.
    pub temporal_archive_after_days: i64,
    /// Folders scoring at or above this are treated as a single project unit.
    pub project_threshold: u8,
    /// Share (percent) the dominant naming style must hold before outliers are flagged.
    pub naming_majority_percent: u8,
    pub naming_min_files: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_series_len: 3,
            related_media_min_members: 5,
            related_media_window_minutes: 60,
            temporal_min_members: 10,
            temporal_window_days: 30,
            temporal_archive_after_days: 180,
            project_threshold: 60,
            naming_majority_percent: 60,
            naming_min_files: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub temp_extensions: Vec<String>,
    pub large_file_mb: f64,
    pub large_unused_days: i64,
    /// Per-file predictions below this are not suggested.
    pub min_confidence: u8,
    pub weights: FactorWeights,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            temp_extensions: ["tmp", "temp", "bak", "old", "cache", "swp", "swo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            large_file_mb: 100.0,
            large_unused_days: 60,
            min_confidence: 50,
            weights: FactorWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub age: f64,
    pub temp_extension: f64,
    pub size_outlier: f64,
    pub naming: f64,
    pub history: f64,
    pub disk_pressure: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            age: 0.25,
            temp_extension: 0.30,
            size_outlier: 0.15,
            naming: 0.20,
            history: 0.15,
            disk_pressure: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Outcomes needed before `predict_next_action` returns a guess.
    pub min_samples: usize,
    pub bias_step: i32,
    pub max_bias: i32,
    pub history_limit: usize,
    pub recent_window: usize,
    /// Heuristic suggestions of a kind are dropped when its acceptance rate falls below this.
    pub suppress_below_percent: u8,
    pub default_cleanup_age_days: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            bias_step: 2,
            max_bias: 20,
            history_limit: 1000,
            recent_window: 20,
            suppress_below_percent: 30,
            default_cleanup_age_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub idle_cpu_percent: f32,
    /// Local-time hour ranges `[start, end)` considered quiet.
    pub idle_windows: Vec<(u32, u32)>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            idle_cpu_percent: 20.0,
            idle_windows: vec![(2, 6), (12, 13)],
        }
    }
}

/// Load `Sentinel.toml` (optional) with `SENTINEL_*` environment overrides,
/// e.g. `SENTINEL_RETENTION_DAYS=14` or `SENTINEL_DETECTOR__MIN_SERIES_LEN=4`.
pub fn load_configuration() -> Result<EngineConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Sentinel").required(false))
        .add_source(
            Environment::with_prefix("SENTINEL")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    builder.try_deserialize::<EngineConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;

        if let Some(pos) = result
            .iter()
            .position(|existing| Path::new(existing).starts_with(dir_path) || dir_path.starts_with(existing))
        {
            if dir_path.starts_with(&result[pos]) {
                should_add = false;
            } else {
                result.remove(pos);
                result.retain(|existing| !Path::new(existing).starts_with(dir_path));
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}
