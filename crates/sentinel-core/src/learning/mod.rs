//! Adaptive acceptance tracking.
//!
//! [`LearningStore`] owns the single [`LearningProfile`] of an installation.
//! Analysis takes the shared read lock; outcome recording takes the write
//! lock, persists the new profile and only then publishes it.

use crate::config::LearningConfig;
use crate::error::Result;
use crate::storage::{lock_db, SharedDb};
use crate::types::ActionKind;
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard};
use tracing::{debug, info};

/// Acceptance rate reported for kinds without any history.
pub const NEUTRAL_CONFIDENCE: u8 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindCounters {
    pub attempts: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl KindCounters {
    /// Accepted share of decided outcomes, `0..=100`.
    pub fn acceptance_rate(&self) -> Option<u8> {
        let decided = self.accepted + self.rejected;
        if decided == 0 {
            None
        } else {
            Some((self.accepted * 100 / decided) as u8)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Running mean of the age (days) of files whose cleanup was accepted.
    pub cleanup_age_days: Option<f64>,
    pub cleanup_age_samples: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cleanup_age_days: None,
            cleanup_age_samples: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub execution_id: String,
    pub kind: ActionKind,
    pub accepted: bool,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub succeeded: usize,
    #[serde(default)]
    pub failed: usize,
}

/// One decision on a recommendation, as reported by the executor or by an
/// explicit rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub execution_id: String,
    pub kind: ActionKind,
    pub accepted: bool,
    pub succeeded: usize,
    pub failed: usize,
    /// Mean age of the affected files, feeds the preferred cleanup age.
    pub mean_age_days: Option<f64>,
}

impl Outcome {
    pub fn new(execution_id: impl Into<String>, kind: ActionKind, accepted: bool) -> Self {
        Self {
            execution_id: execution_id.into(),
            kind,
            accepted,
            succeeded: 0,
            failed: 0,
            mean_age_days: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningProfile {
    pub counters: BTreeMap<ActionKind, KindCounters>,
    pub bias: BTreeMap<ActionKind, i32>,
    pub thresholds: Thresholds,
    pub recent: VecDeque<OutcomeEntry>,
    pub tracking_since: DateTime<Utc>,
}

impl Default for LearningProfile {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl LearningProfile {
    pub fn new(tracking_since: DateTime<Utc>) -> Self {
        Self {
            counters: BTreeMap::new(),
            bias: BTreeMap::new(),
            thresholds: Thresholds::default(),
            recent: VecDeque::new(),
            tracking_since,
        }
    }

    pub fn counters(&self, kind: ActionKind) -> KindCounters {
        self.counters.get(&kind).copied().unwrap_or_default()
    }

    pub fn bias(&self, kind: ActionKind) -> i32 {
        self.bias.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_outcomes(&self) -> u64 {
        self.counters.values().map(|c| c.attempts).sum()
    }

    /// Historical acceptance for `kind`, neutral when unknown.
    pub fn action_confidence(&self, kind: ActionKind) -> u8 {
        self.counters(kind)
            .acceptance_rate()
            .unwrap_or(NEUTRAL_CONFIDENCE)
    }

    /// Heuristic suggestions of a kind stop once it has enough history and
    /// its acceptance rate has fallen below the configured floor.
    pub fn should_suggest(&self, kind: ActionKind, cfg: &LearningConfig) -> bool {
        let counters = self.counters(kind);
        if counters.attempts < cfg.min_samples as u64 {
            return true;
        }
        self.action_confidence(kind) >= cfg.suppress_below_percent
    }

    /// Kind with the most accepted outcomes overall. Ties go to the kind
    /// declared first in [`ActionKind::ALL`].
    pub fn favorite_action(&self) -> Option<ActionKind> {
        let mut best: Option<(ActionKind, u64)> = None;
        for kind in ActionKind::ALL {
            let accepted = self.counters(kind).accepted;
            if accepted > 0 && best.map_or(true, |(_, n)| accepted > n) {
                best = Some((kind, accepted));
            }
        }
        best.map(|(kind, _)| kind)
    }

    pub fn preferred_cleanup_age(&self, cfg: &LearningConfig) -> f64 {
        self.thresholds
            .cleanup_age_days
            .unwrap_or(cfg.default_cleanup_age_days)
    }

    /// Kind with the highest acceptance rate over the last `recent_window`
    /// outcomes. `None` until `min_samples` outcomes have been recorded.
    pub fn predict_next_action(&self, cfg: &LearningConfig) -> Option<ActionKind> {
        if self.recent.len() < cfg.min_samples.max(1) {
            return None;
        }

        let mut window: BTreeMap<ActionKind, (u64, u64)> = BTreeMap::new();
        for entry in self.recent.iter().rev().take(cfg.recent_window.max(1)) {
            let slot = window.entry(entry.kind).or_default();
            slot.1 += 1;
            if entry.accepted {
                slot.0 += 1;
            }
        }

        let mut best: Option<(ActionKind, u64, u64)> = None;
        for (kind, (accepted, total)) in window {
            if accepted == 0 {
                continue;
            }
            let better = match best {
                None => true,
                // accepted/total > best_accepted/best_total, then more accepted
                Some((_, ba, bt)) => {
                    let lhs = accepted * bt;
                    let rhs = ba * total;
                    lhs > rhs || (lhs == rhs && accepted > ba)
                }
            };
            if better {
                best = Some((kind, accepted, total));
            }
        }
        best.map(|(kind, _, _)| kind)
    }

    /// Apply one outcome. Accepted/rejected counters only ever grow.
    pub fn apply(&mut self, outcome: &Outcome, cfg: &LearningConfig, now: DateTime<Utc>) {
        let counters = self.counters.entry(outcome.kind).or_default();
        counters.attempts += 1;
        if outcome.accepted {
            counters.accepted += 1;
        } else {
            counters.rejected += 1;
        }

        let step = if outcome.accepted { cfg.bias_step } else { -cfg.bias_step };
        let bias = self.bias.entry(outcome.kind).or_insert(0);
        *bias = (*bias + step).clamp(-cfg.max_bias, cfg.max_bias);

        if outcome.accepted && outcome.kind == ActionKind::Cleanup {
            if let Some(age) = outcome.mean_age_days.filter(|a| a.is_finite() && *a >= 0.0) {
                let n = self.thresholds.cleanup_age_samples as f64;
                let mean = self.thresholds.cleanup_age_days.unwrap_or(age);
                self.thresholds.cleanup_age_days = Some((mean * n + age) / (n + 1.0));
                self.thresholds.cleanup_age_samples += 1;
            }
        }

        self.recent.push_back(OutcomeEntry {
            execution_id: outcome.execution_id.clone(),
            kind: outcome.kind,
            accepted: outcome.accepted,
            at: now,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
        });
        while self.recent.len() > cfg.history_limit.max(1) {
            self.recent.pop_front();
        }
    }
}

/// Read-only summary for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct LearningReport {
    pub tracking_since: DateTime<Utc>,
    pub total_outcomes: u64,
    pub counters: BTreeMap<ActionKind, KindCounters>,
    pub confidence: BTreeMap<ActionKind, u8>,
    pub favorite_action: Option<ActionKind>,
    pub predicted_next_action: Option<ActionKind>,
    pub preferred_cleanup_age_days: f64,
}

impl fmt::Display for LearningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tracking since {}", self.tracking_since.format("%Y-%m-%d"))?;
        writeln!(f, "Outcomes recorded: {}", self.total_outcomes)?;
        for (kind, counters) in &self.counters {
            writeln!(
                f,
                "  {:<9} attempts {:>4}  accepted {:>4}  rejected {:>4}  confidence {:>3}%",
                kind.as_str(),
                counters.attempts,
                counters.accepted,
                counters.rejected,
                self.confidence.get(kind).copied().unwrap_or(NEUTRAL_CONFIDENCE),
            )?;
        }
        let show = |k: Option<ActionKind>| k.map_or("none".to_string(), |k| k.to_string());
        writeln!(f, "Favorite action: {}", show(self.favorite_action))?;
        writeln!(f, "Predicted next action: {}", show(self.predicted_next_action))?;
        write!(f, "Preferred cleanup age: {:.0} days", self.preferred_cleanup_age_days)
    }
}

/// Process-wide owner of the learning profile.
pub struct LearningStore {
    db: SharedDb,
    cfg: LearningConfig,
    profile: RwLock<LearningProfile>,
    /// Execution ids already counted. Also serializes writers.
    seen: Mutex<AHashSet<String>>,
}

impl LearningStore {
    /// Load the persisted profile, or start a fresh one.
    pub fn load(db: SharedDb, cfg: LearningConfig) -> Result<Self> {
        let (profile, seen) = {
            let conn = lock_db(&db);
            let profile = match conn.load_learning_profile()? {
                Some(json) => serde_json::from_str(&json)?,
                None => {
                    let fresh = LearningProfile::default();
                    conn.save_learning_profile(&serde_json::to_string(&fresh)?)?;
                    fresh
                }
            };
            let seen: AHashSet<String> = conn.learning_outcome_ids()?.into_iter().collect();
            (profile, seen)
        };
        debug!(
            "Learning profile loaded: {} outcomes, {} execution ids",
            profile.total_outcomes(),
            seen.len()
        );

        Ok(Self {
            db,
            cfg,
            profile: RwLock::new(profile),
            seen: Mutex::new(seen),
        })
    }

    pub fn config(&self) -> &LearningConfig {
        &self.cfg
    }

    /// Shared read access, held for the duration of an analysis pass.
    pub fn read(&self) -> RwLockReadGuard<'_, LearningProfile> {
        self.profile.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an outcome once per execution id. Returns `false` when the id
    /// was already counted.
    pub fn record_outcome(&self, outcome: &Outcome, now: DateTime<Utc>) -> Result<bool> {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(&outcome.execution_id) {
            debug!("Outcome {} already recorded", outcome.execution_id);
            return Ok(false);
        }

        let mut next = self.read().clone();
        next.apply(outcome, &self.cfg, now);
        let json = serde_json::to_string(&next)?;

        lock_db(&self.db).record_learning_outcome(
            &outcome.execution_id,
            outcome.kind.as_str(),
            outcome.accepted,
            &now.to_rfc3339(),
            &json,
        )?;

        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = next;
        seen.insert(outcome.execution_id.clone());
        debug!(
            "Recorded {} outcome for {} ({})",
            if outcome.accepted { "accepted" } else { "rejected" },
            outcome.kind,
            outcome.execution_id
        );
        Ok(true)
    }

    pub fn predict_next_action(&self) -> Option<ActionKind> {
        self.read().predict_next_action(&self.cfg)
    }

    pub fn report(&self) -> LearningReport {
        let profile = self.read();
        LearningReport {
            tracking_since: profile.tracking_since,
            total_outcomes: profile.total_outcomes(),
            counters: profile.counters.clone(),
            confidence: ActionKind::ALL
                .iter()
                .filter(|k| profile.counters.contains_key(k))
                .map(|k| (*k, profile.action_confidence(*k)))
                .collect(),
            favorite_action: profile.favorite_action(),
            predicted_next_action: profile.predict_next_action(&self.cfg),
            preferred_cleanup_age_days: profile.preferred_cleanup_age(&self.cfg),
        }
    }

    /// Start a new profile. Execution ids stay recorded so old outcomes
    /// cannot be replayed into the fresh profile.
    pub fn reset(&self, now: DateTime<Utc>) -> Result<()> {
        let _writer = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = LearningProfile::new(now);
        lock_db(&self.db).save_learning_profile(&serde_json::to_string(&fresh)?)?;
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        info!("Learning profile reset");
        Ok(())
    }

    /// Write the current profile. Every mutation already persists; this is
    /// the shutdown flush.
    pub fn flush(&self) -> Result<()> {
        let json = serde_json::to_string(&*self.read())?;
        lock_db(&self.db).save_learning_profile(&json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LearningConfig {
        LearningConfig::default()
    }

    #[test]
    fn test_neutral_confidence_without_history() {
        let profile = LearningProfile::default();
        assert_eq!(profile.action_confidence(ActionKind::Archive), NEUTRAL_CONFIDENCE);
        assert!(profile.should_suggest(ActionKind::Archive, &cfg()));
        assert_eq!(profile.favorite_action(), None);
        assert_eq!(profile.predict_next_action(&cfg()), None);
    }

    #[test]
    fn test_bias_moves_and_clamps() {
        let mut profile = LearningProfile::default();
        let now = Utc::now();
        for i in 0..20 {
            profile.apply(&Outcome::new(format!("a{}", i), ActionKind::Cleanup, true), &cfg(), now);
        }
        assert_eq!(profile.bias(ActionKind::Cleanup), cfg().max_bias);

        profile.apply(&Outcome::new("r", ActionKind::Cleanup, false), &cfg(), now);
        assert_eq!(profile.bias(ActionKind::Cleanup), cfg().max_bias - cfg().bias_step);
        assert_eq!(profile.counters(ActionKind::Cleanup).accepted, 20);
        assert_eq!(profile.counters(ActionKind::Cleanup).rejected, 1);
    }

    #[test]
    fn test_rejections_suppress_after_enough_samples() {
        let mut profile = LearningProfile::default();
        let now = Utc::now();
        for i in 0..5 {
            profile.apply(&Outcome::new(format!("r{}", i), ActionKind::Compress, false), &cfg(), now);
        }
        assert!(!profile.should_suggest(ActionKind::Compress, &cfg()));
        assert_eq!(profile.action_confidence(ActionKind::Compress), 0);
    }

    #[test]
    fn test_cleanup_age_is_running_mean() {
        let mut profile = LearningProfile::default();
        let now = Utc::now();
        for (i, age) in [10.0, 20.0, 60.0].iter().enumerate() {
            let mut outcome = Outcome::new(format!("c{}", i), ActionKind::Cleanup, true);
            outcome.mean_age_days = Some(*age);
            profile.apply(&outcome, &cfg(), now);
        }
        assert_eq!(profile.preferred_cleanup_age(&cfg()), 30.0);
    }

    #[test]
    fn test_history_is_capped() {
        let mut small = cfg();
        small.history_limit = 3;
        let mut profile = LearningProfile::default();
        for i in 0..5 {
            profile.apply(&Outcome::new(format!("x{}", i), ActionKind::Review, true), &small, Utc::now());
        }
        assert_eq!(profile.recent.len(), 3);
        assert_eq!(profile.recent[0].execution_id, "x2");
        assert_eq!(profile.counters(ActionKind::Review).attempts, 5);
    }

    #[test]
    fn test_prediction_prefers_recent_acceptance_rate() {
        let mut profile = LearningProfile::default();
        let now = Utc::now();
        for i in 0..4 {
            profile.apply(&Outcome::new(format!("o{}", i), ActionKind::Organize, i % 2 == 0), &cfg(), now);
        }
        for i in 0..3 {
            profile.apply(&Outcome::new(format!("a{}", i), ActionKind::Archive, true), &cfg(), now);
        }
        assert_eq!(profile.predict_next_action(&cfg()), Some(ActionKind::Archive));
        assert_eq!(profile.favorite_action(), Some(ActionKind::Archive));
    }
}
