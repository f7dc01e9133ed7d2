pub mod evaluator;
pub mod model;
pub mod store;

pub use evaluator::{match_counts, RuleMatch, RuleSet};
pub use model::{default_rules, validate, ActionSpec, ConditionSpec, Rule, RuleSpec};
pub use store::{RuleStore, RuleSummary};
