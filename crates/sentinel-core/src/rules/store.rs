use super::evaluator::{match_counts, RuleMatch, RuleSet};
use super::model::{default_rules, validate, Rule, RuleSpec};
use crate::error::{Error, Result, ValidationError};
use crate::storage::models::RuleRow;
use crate::storage::{lock_db, SharedDb};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use tracing::{info, warn};

const SEEDED_KEY: &str = "rules_seeded";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub total: usize,
    pub enabled: usize,
    pub rejected: usize,
    pub total_matches: u64,
}

/// Persisted rules. Every write is validated first, so a malformed rule
/// can only reach the database through a hand-edited row.
pub struct RuleStore {
    db: SharedDb,
}

fn rule_from_row(row: RuleRow) -> Result<Rule, ValidationError> {
    let mut spec: RuleSpec = serde_json::from_str(&row.definition)
        .map_err(|e| ValidationError::new(&row.name, format!("unreadable definition: {}", e)))?;
    spec.name = row.name;
    spec.enabled = row.enabled;
    spec.priority = u8::try_from(row.priority)
        .map_err(|_| ValidationError::new(&spec.name, format!("priority {} out of range", row.priority)))?;
    Ok(Rule {
        id: row.id,
        spec,
        match_count: row.match_count.max(0) as u64,
        created_at: Utc
            .timestamp_millis_opt(row.created_at)
            .single()
            .unwrap_or_default(),
    })
}

impl RuleStore {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Install the default templates the first time the store is opened.
    /// Deleted defaults stay deleted.
    pub fn seed_defaults(&self) -> Result<usize> {
        let db = lock_db(&self.db);
        if db.get_meta(SEEDED_KEY)?.is_some() {
            return Ok(0);
        }
        let defaults = default_rules();
        for spec in &defaults {
            db.insert_rule(&spec.name, &serde_json::to_string(spec)?, i64::from(spec.priority), spec.enabled)?;
        }
        db.set_meta(SEEDED_KEY, "1")?;
        info!("Installed {} default rules", defaults.len());
        Ok(defaults.len())
    }

    /// Every readable rule, plus the rows that could not be read.
    pub fn list(&self) -> Result<(Vec<Rule>, Vec<ValidationError>)> {
        let rows = lock_db(&self.db).list_rules()?;
        let mut rules = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for row in rows {
            match rule_from_row(row) {
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    warn!("Skipping stored rule: {}", err);
                    unreadable.push(err);
                }
            }
        }
        Ok((rules, unreadable))
    }

    pub fn get(&self, id: i64) -> Result<Rule> {
        self.list()?
            .0
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("rule {}", id)))
    }

    /// Compile enabled rules for evaluation.
    pub fn load_set(&self) -> Result<RuleSet> {
        let (rules, unreadable) = self.list()?;
        let mut set = RuleSet::compile(&rules);
        for err in unreadable {
            set.push_rejected(err);
        }
        Ok(set)
    }

    pub fn add(&self, spec: &RuleSpec) -> Result<i64> {
        validate(spec)?;
        let id = lock_db(&self.db).insert_rule(
            spec.name.trim(),
            &serde_json::to_string(spec)?,
            i64::from(spec.priority),
            spec.enabled,
        )?;
        info!("Added rule {} '{}'", id, spec.name);
        Ok(id)
    }

    pub fn update(&self, id: i64, spec: &RuleSpec) -> Result<()> {
        validate(spec)?;
        let changed = lock_db(&self.db).update_rule(
            id,
            spec.name.trim(),
            &serde_json::to_string(spec)?,
            i64::from(spec.priority),
            spec.enabled,
        )?;
        if !changed {
            return Err(Error::NotFound(format!("rule {}", id)));
        }
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        if !lock_db(&self.db).delete_rule(id)? {
            return Err(Error::NotFound(format!("rule {}", id)));
        }
        Ok(())
    }

    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        if !lock_db(&self.db).set_rule_enabled(id, enabled)? {
            return Err(Error::NotFound(format!("rule {}", id)));
        }
        Ok(())
    }

    /// Flip a rule on or off. Returns the new state.
    pub fn toggle(&self, id: i64) -> Result<bool> {
        let enabled = !self.get(id)?.spec.enabled;
        self.set_enabled(id, enabled)?;
        Ok(enabled)
    }

    pub fn record_matches(&self, matches: &[RuleMatch]) -> Result<()> {
        let counts = match_counts(matches);
        if counts.is_empty() {
            return Ok(());
        }
        lock_db(&self.db).add_rule_matches(&counts)?;
        Ok(())
    }

    pub fn summary(&self) -> Result<RuleSummary> {
        let (rules, unreadable) = self.list()?;
        let rejected = unreadable.len() + RuleSet::compile(&rules).rejected().len();
        Ok(RuleSummary {
            total: rules.len() + unreadable.len(),
            enabled: rules.iter().filter(|r| r.spec.enabled).count(),
            rejected,
            total_matches: rules.iter().map(|r| r.match_count).sum(),
        })
    }
}
