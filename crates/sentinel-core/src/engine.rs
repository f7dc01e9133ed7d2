use crate::analysis::{self, detector::RelationshipSummary, space::SpaceForecast, AnalysisContext};
use crate::checkpoint::{Checkpoint, CheckpointManager, LockTable, RestoreReport, SweepReport};
use crate::config::{self, EngineConfig};
use crate::error::{Result, ScanError, ValidationError};
use crate::executor::{ExecuteOptions, ExecutionMode, ExecutionResult, Executor};
use crate::fsops::{FileOps, StdFileOps};
use crate::learning::{LearningReport, LearningStore};
use crate::maintenance::MaintenanceGate;
use crate::progress::ProgressReporter;
use crate::rules::{RuleMatch, RuleStore};
use crate::scanner::{self, WalkOutcome};
use crate::storage::{self, lock_db, Database, SharedDb};
use crate::types::{FolderSnapshot, Recommendation, SystemHealth};
use chrono::{DateTime, Local, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LAST_SWEEP_KEY: &str = "last_sweep";

/// Process-wide owner of the stores, the checkpoint manager and the
/// executor. Analysis calls may run concurrently; each holds the learning
/// profile's read lock for its duration.
pub struct SentinelEngine {
    config: EngineConfig,
    db: SharedDb,
    rules: RuleStore,
    learning: Arc<LearningStore>,
    checkpoints: Arc<CheckpointManager>,
    executor: Executor,
    gate: MaintenanceGate,
}

#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub recommendations: Vec<Recommendation>,
    pub scan_errors: Vec<ScanError>,
    pub rejected_rules: Vec<ValidationError>,
    pub relationships: RelationshipSummary,
    pub forecast: Option<SpaceForecast>,
    pub folders: usize,
    pub files: usize,
    pub duration: Duration,
}

impl SentinelEngine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        Self::from_database(config, db)
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        Self::from_database(config, Database::open_in_memory()?)
    }

    fn from_database(config: EngineConfig, db: Database) -> Result<Self> {
        let db = storage::shared(db);
        let rules = RuleStore::new(Arc::clone(&db));
        rules.seed_defaults()?;

        let learning = Arc::new(LearningStore::load(Arc::clone(&db), config.learning.clone())?);
        let checkpoints = Arc::new(CheckpointManager::new(
            Arc::clone(&db),
            config.backup_path(),
            config.retention_days,
            LockTable::new(),
        ));
        let executor = Executor::new(Arc::clone(&checkpoints), Arc::clone(&learning), Arc::new(StdFileOps));
        let gate = MaintenanceGate::new(&config.maintenance, config.sweep_interval_hours);

        let engine = Self {
            config,
            db,
            rules,
            learning,
            checkpoints,
            executor,
            gate,
        };

        // Startup sweep; failures only delay expiry until the next one.
        if let Err(e) = engine.sweep(Utc::now()) {
            warn!("Startup retention sweep failed: {}", e);
        }
        info!("Engine ready (database {})", engine.config.database_path);
        Ok(engine)
    }

    /// Route mutations through `ops` instead of the local filesystem.
    pub fn with_file_ops(mut self, ops: Arc<dyn FileOps>) -> Self {
        self.executor = Executor::new(Arc::clone(&self.checkpoints), Arc::clone(&self.learning), ops);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Walk the configured roots into folder snapshots.
    pub fn scan(&self, reporter: &dyn ProgressReporter) -> WalkOutcome {
        let roots = config::non_overlapping_directories(self.config.root_paths.clone());
        info!("Scanning directories: {:?}", roots);

        let root_slices: Vec<&str> = roots.iter().map(|s| s.as_str()).collect();
        let ignore_slices: Vec<&str> = self.config.ignore_patterns.iter().map(|s| s.as_str()).collect();

        reporter.on_scan_start();
        let start = Instant::now();
        let outcome = scanner::build_snapshots(&root_slices, &ignore_slices, Utc::now(), reporter);
        let elapsed = start.elapsed().as_secs_f64();
        reporter.on_scan_complete(outcome.file_count(), elapsed);
        debug!(
            "Scan completed in {:.2}s: {} folders, {} files, {} unreadable",
            elapsed,
            outcome.snapshots.len(),
            outcome.file_count(),
            outcome.errors.len()
        );
        outcome
    }

    pub fn analyze(
        &self,
        snapshots: &[FolderSnapshot],
        health: Option<&SystemHealth>,
        reporter: &dyn ProgressReporter,
    ) -> Result<AnalysisReport> {
        self.analyze_at(snapshots, health, Utc::now(), reporter)
    }

    /// Run every analysis layer over `snapshots` as of `now` and return the
    /// ranked recommendations.
    pub fn analyze_at(
        &self,
        snapshots: &[FolderSnapshot],
        health: Option<&SystemHealth>,
        now: DateTime<Utc>,
        reporter: &dyn ProgressReporter,
    ) -> Result<AnalysisReport> {
        let start = Instant::now();
        let rules = self.rules.load_set()?;
        let forecast = health.map(SpaceForecast::from_health);

        reporter.on_analysis_start(snapshots.len());
        info!("Analyzing {} folders with {} active rules", snapshots.len(), rules.rules().len());

        let (recommendations, analyses, projects) = {
            let profile = self.learning.read();
            let ctx = AnalysisContext {
                config: &self.config,
                rules: &rules,
                profile: &profile,
                forecast: forecast.as_ref(),
                now,
            };
            let (analyses, projects) = analysis::analyze_snapshots(snapshots, &ctx, reporter);
            (analysis::recommend(&analyses, &ctx), analyses, projects)
        };

        let matches: Vec<RuleMatch> = analyses
            .iter()
            .flat_map(|a| a.rule_matches.iter().cloned())
            .collect();
        if let Err(e) = self.rules.record_matches(&matches) {
            warn!("Could not update rule match counts: {}", e);
        }

        let report = AnalysisReport {
            scan_errors: analyses.iter().flat_map(|a| a.errors.iter().cloned()).collect(),
            rejected_rules: rules.rejected().to_vec(),
            relationships: analysis::summarize(&analyses, &projects),
            forecast,
            folders: analyses.len(),
            files: analyses.iter().map(|a| a.records.len()).sum(),
            duration: start.elapsed(),
            recommendations,
        };
        reporter.on_analysis_complete(report.recommendations.len(), report.duration.as_secs_f64());
        info!(
            "Analysis produced {} recommendations from {} files in {:.2}s",
            report.recommendations.len(),
            report.files,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    /// Options bounded by the configured filesystem timeout.
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions::with_timeout(self.config.fs_timeout())
    }

    pub fn execute(
        &self,
        recommendation: &Recommendation,
        mode: ExecutionMode,
        options: &ExecuteOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<ExecutionResult> {
        self.executor.execute(recommendation, mode, options, reporter)
    }

    pub fn reject(&self, recommendation: &Recommendation) -> Result<bool> {
        self.executor.reject(recommendation)
    }

    pub fn undo(&self, checkpoint_id: &str) -> Result<RestoreReport> {
        self.checkpoints.undo(checkpoint_id, self.config.fs_timeout())
    }

    pub fn undo_last(&self) -> Result<RestoreReport> {
        self.checkpoints.undo_last(self.config.fs_timeout())
    }

    pub fn checkpoint(&self, id: &str) -> Result<Checkpoint> {
        self.checkpoints.get(id)
    }

    /// All checkpoints, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        self.checkpoints.history(limit)
    }

    /// Committed checkpoints that can still be undone, newest first.
    pub fn undo_candidates(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        self.checkpoints.undo_candidates(limit)
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let report = self.checkpoints.sweep(now)?;
        lock_db(&self.db).set_meta(LAST_SWEEP_KEY, &now.to_rfc3339())?;
        Ok(report)
    }

    fn last_sweep(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = lock_db(&self.db).get_meta(LAST_SWEEP_KEY)?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    /// Entry point for an idle-triggered scheduler: runs the retention
    /// sweep when it is due and the machine is quiet.
    pub fn run_maintenance(&self, health: &SystemHealth, now: DateTime<Utc>) -> Result<Option<SweepReport>> {
        let hour = now.with_timezone(&Local).hour();
        if !self.gate.may_run(health, hour) {
            debug!("Maintenance skipped: system busy or outside idle window");
            return Ok(None);
        }
        if !self.gate.sweep_due(self.last_sweep()?, now) {
            return Ok(None);
        }
        self.sweep(now).map(Some)
    }

    pub fn maintenance_gate(&self) -> &MaintenanceGate {
        &self.gate
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn learning(&self) -> &LearningStore {
        &self.learning
    }

    pub fn learning_report(&self) -> LearningReport {
        self.learning.report()
    }

    /// Persist the learning profile. Call once before exit.
    pub fn shutdown(&self) -> Result<()> {
        self.learning.flush()?;
        info!("Engine shut down");
        Ok(())
    }
}
