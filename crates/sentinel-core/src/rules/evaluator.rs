use super::model::{compile_spec, CompiledRule, Rule};
use crate::error::ValidationError;
use crate::types::{Candidate, CandidateSource, Factor, FileRecord};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::warn;

/// Compiled, ordered rule set. Disabled and malformed rules are left out;
/// malformed ones are reported in `rejected`.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    rejected: Vec<ValidationError>,
}

/// The winning rule for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub path: PathBuf,
    pub rule_id: i64,
}

impl RuleSet {
    /// Compile persisted rules. Order is priority descending, then id
    /// ascending (declaration order), which makes it a total order.
    pub fn compile(rules: &[Rule]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut rejected = Vec::new();

        for rule in rules.iter().filter(|r| r.spec.enabled) {
            match compile_spec(rule.id, &rule.spec) {
                Ok(c) => compiled.push(c),
                Err(err) => {
                    warn!("Excluding rule {}: {}", rule.id, err);
                    rejected.push(err);
                }
            }
        }

        compiled.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Self {
            rules: compiled,
            rejected,
        }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn rejected(&self) -> &[ValidationError] {
        &self.rejected
    }

    /// Record a rule that failed before it could be compiled.
    pub(crate) fn push_rejected(&mut self, err: ValidationError) {
        self.rejected.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule in evaluation order whose conditions all hold.
    pub fn winner(&self, record: &FileRecord, now: DateTime<Utc>) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(record, now))
    }

    /// Evaluate every record. Each file is claimed by at most one rule; lower
    /// priority matches for the same file are discarded. Fragments are
    /// grouped per (rule, action, destination) in order of first match.
    pub fn evaluate(&self, records: &[FileRecord], now: DateTime<Utc>) -> (Vec<Candidate>, Vec<RuleMatch>) {
        let mut matches = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut index: AHashMap<(i64, usize, Option<PathBuf>), usize> = AHashMap::new();

        for record in records {
            let Some(rule) = self.winner(record, now) else {
                continue;
            };
            matches.push(RuleMatch {
                path: record.path.clone(),
                rule_id: rule.id,
            });

            for (action_idx, action) in rule.actions.iter().enumerate() {
                let destination = action.destination_for(record.folder());
                let key = (rule.id, action_idx, destination.clone());
                match index.get(&key) {
                    Some(&i) => candidates[i].targets.push(record.path.clone()),
                    None => {
                        index.insert(key, candidates.len());
                        let confidence = 80 + rule.priority / 5;
                        candidates.push(Candidate {
                            kind: action.kind,
                            targets: vec![record.path.clone()],
                            confidence,
                            rationale: vec![Factor::new(format!("rule:{}", rule.name), confidence)],
                            destination,
                            description: format!("{} (rule '{}')", action.kind, rule.name),
                            source: CandidateSource::Rule {
                                rule_id: rule.id,
                                priority: rule.priority,
                            },
                        });
                    }
                }
            }
        }

        (candidates, matches)
    }
}

/// Matches per rule id, for persisting match counts.
pub fn match_counts(matches: &[RuleMatch]) -> Vec<(i64, u64)> {
    let mut counts: AHashMap<i64, u64> = AHashMap::new();
    for m in matches {
        *counts.entry(m.rule_id).or_default() += 1;
    }
    let mut counts: Vec<(i64, u64)> = counts.into_iter().collect();
    counts.sort();
    counts
}
