//! Merge candidates from every layer into ranked recommendations.

use crate::config::LearningConfig;
use crate::learning::LearningProfile;
use crate::types::{clamp_score, ActionKind, Candidate, CandidateSource, Factor, Recommendation};
use ahash::{AHashMap, AHashSet};
use std::path::PathBuf;
use tracing::debug;

/// Share of a heuristic confidence kept when blending in learned history.
const HEURISTIC_SHARE: f64 = 0.7;

struct Merged {
    kind: ActionKind,
    targets: Vec<PathBuf>,
    confidence: u8,
    best: u8,
    rationale: Vec<Factor>,
    destination: Option<PathBuf>,
    description: String,
}

/// Blend detector and insight confidences with how often the user accepted
/// this kind before. The scorer already folds history in as a factor.
fn personalize(candidate: &mut Candidate, profile: &LearningProfile) {
    if !matches!(candidate.source, CandidateSource::Detector | CandidateSource::Insight) {
        return;
    }
    if profile.counters(candidate.kind).attempts == 0 {
        return;
    }
    let history = f64::from(profile.action_confidence(candidate.kind));
    let blended = f64::from(candidate.confidence) * HEURISTIC_SHARE
        + history * (1.0 - HEURISTIC_SHARE)
        + f64::from(profile.bias(candidate.kind));
    candidate.confidence = clamp_score(blended);
}

fn normalized(targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut targets = targets.to_vec();
    targets.sort();
    targets.dedup();
    targets
}

/// Combine candidates into one recommendation per (file set, kind).
///
/// Files claimed by a rule are removed from every non-rule candidate. Kinds
/// the user keeps rejecting are dropped unless a rule asked for them. Exact
/// (file set, kind) repeats merge by maximum confidence with rationales
/// concatenated; a later candidate that only partly overlaps an earlier one of
/// the same kind keeps just the files nobody claimed yet. The result is sorted
/// by confidence, then target count, then first-seen order.
pub fn aggregate(candidates: Vec<Candidate>, profile: &LearningProfile, cfg: &LearningConfig) -> Vec<Recommendation> {
    let rule_claimed: AHashSet<PathBuf> = candidates
        .iter()
        .filter(|c| c.source.is_rule())
        .flat_map(|c| c.targets.iter().cloned())
        .collect();

    let mut merged: Vec<Merged> = Vec::new();
    let mut index: AHashMap<(Vec<PathBuf>, ActionKind), usize> = AHashMap::new();
    let mut claimed: AHashSet<(PathBuf, ActionKind)> = AHashSet::new();

    for mut candidate in candidates {
        let from_rule = candidate.source.is_rule();
        if !from_rule {
            if !profile.should_suggest(candidate.kind, cfg) {
                debug!("Suppressing {} candidate: {}", candidate.kind, candidate.description);
                continue;
            }
            candidate.targets.retain(|p| !rule_claimed.contains(p));
            personalize(&mut candidate, profile);
        }

        let targets = normalized(&candidate.targets);
        if targets.is_empty() {
            continue;
        }
        let key = (targets, candidate.kind);

        if let Some(&slot) = index.get(&key) {
            let existing = &mut merged[slot];
            existing.rationale.extend(candidate.rationale);
            if candidate.confidence > existing.best {
                existing.best = candidate.confidence;
                existing.description = candidate.description;
            }
            existing.confidence = existing.confidence.max(candidate.confidence);
            if existing.destination.is_none() {
                existing.destination = candidate.destination;
            }
            continue;
        }

        let (targets, kind) = key;
        let fresh: Vec<PathBuf> = targets
            .into_iter()
            .filter(|p| !claimed.contains(&(p.clone(), kind)))
            .collect();
        if fresh.is_empty() {
            continue;
        }
        for path in &fresh {
            claimed.insert((path.clone(), kind));
        }

        index.insert((fresh.clone(), kind), merged.len());
        merged.push(Merged {
            kind,
            targets: fresh,
            confidence: candidate.confidence,
            best: candidate.confidence,
            rationale: candidate.rationale,
            destination: candidate.destination,
            description: candidate.description,
        });
    }

    let mut out: Vec<Recommendation> = merged
        .into_iter()
        .filter_map(|m| {
            Recommendation::new(m.kind, m.targets, m.confidence, m.rationale, m.destination, m.description)
        })
        .collect();

    // Stable: equal keys keep first-seen order.
    out.sort_by(|a, b| {
        b.confidence()
            .cmp(&a.confidence())
            .then_with(|| b.targets().len().cmp(&a.targets().len()))
    });
    out
}
