use crate::error::ValidationError;
use crate::types::{ActionKind, FileRecord};
use chrono::{DateTime, Utc};
use glob::Pattern;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const MAX_PRIORITY: u8 = 100;

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_enabled() -> bool {
    true
}

/// One condition as stored: a type tag, an optional operator and a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub value: Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl ConditionSpec {
    pub fn new(kind: &str, operator: Option<&str>, value: impl Into<Value>) -> Self {
        Self {
            kind: kind.to_string(),
            operator: operator.map(str::to_string),
            value: value.into(),
            case_sensitive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl ActionSpec {
    pub fn new(kind: &str, destination: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            destination: destination.map(str::to_string),
        }
    }
}

/// A user-owned rule definition, as created through the API and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub conditions: Vec<ConditionSpec>,
    pub actions: Vec<ActionSpec>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A persisted rule. `id` is assigned on insert and doubles as the
/// declaration order used to break priority ties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub id: i64,
    pub spec: RuleSpec,
    pub match_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Greater,
    Less,
    Equal,
}

impl Comparison {
    fn parse(rule: &str, op: &str, allow_equal: bool) -> Result<Self, ValidationError> {
        match op {
            ">" => Ok(Comparison::Greater),
            "<" => Ok(Comparison::Less),
            "=" | "==" if allow_equal => Ok(Comparison::Equal),
            other => Err(ValidationError::new(rule, format!("unsupported operator '{}'", other))),
        }
    }

    fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Greater => left > right,
            Comparison::Less => left < right,
            // Sizes are compared at whole-megabyte resolution.
            Comparison::Equal => (left - right).abs() < 0.5,
        }
    }
}

/// Closed set of condition types. Unknown type tags are rejected when the
/// rule is compiled, never skipped during evaluation.
#[derive(Debug, Clone)]
pub enum Condition {
    FilenameContains { needle: String, case_sensitive: bool },
    FilenameMatches(Pattern),
    ExtensionIs(String),
    SizeMb { op: Comparison, value: f64 },
    AgeDays { op: Comparison, value: f64 },
    FolderContains(String),
    RegexMatch(Regex),
}

impl Condition {
    pub fn compile(rule: &str, spec: &ConditionSpec) -> Result<Self, ValidationError> {
        let text = || -> Result<String, ValidationError> {
            match &spec.value {
                Value::String(s) if !s.is_empty() => Ok(s.clone()),
                _ => Err(ValidationError::new(
                    rule,
                    format!("condition '{}' needs a non-empty string value", spec.kind),
                )),
            }
        };
        let number = || -> Result<f64, ValidationError> {
            spec.value
                .as_f64()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| {
                    ValidationError::new(
                        rule,
                        format!("condition '{}' needs a non-negative number", spec.kind),
                    )
                })
        };

        match spec.kind.as_str() {
            "filename_contains" => {
                let needle = text()?;
                Ok(Condition::FilenameContains {
                    needle: if spec.case_sensitive { needle } else { needle.to_lowercase() },
                    case_sensitive: spec.case_sensitive,
                })
            }
            "filename_matches" => Pattern::new(&text()?)
                .map(Condition::FilenameMatches)
                .map_err(|e| ValidationError::new(rule, format!("invalid wildcard: {}", e))),
            "extension_is" => Ok(Condition::ExtensionIs(
                text()?.trim_start_matches('.').to_ascii_lowercase(),
            )),
            "size_mb" => Ok(Condition::SizeMb {
                op: Comparison::parse(rule, spec.operator.as_deref().unwrap_or("="), true)?,
                value: number()?,
            }),
            "age_days" => Ok(Condition::AgeDays {
                op: Comparison::parse(rule, spec.operator.as_deref().unwrap_or(">"), false)?,
                value: number()?,
            }),
            "folder_contains" => Ok(Condition::FolderContains(text()?)),
            "regex_match" => RegexBuilder::new(&text()?)
                .case_insensitive(!spec.case_sensitive)
                .build()
                .map(Condition::RegexMatch)
                .map_err(|e| ValidationError::new(rule, format!("invalid regex: {}", e))),
            other => Err(ValidationError::new(
                rule,
                format!("unknown condition type '{}'", other),
            )),
        }
    }

    pub fn matches(&self, record: &FileRecord, now: DateTime<Utc>) -> bool {
        match self {
            Condition::FilenameContains { needle, case_sensitive } => {
                if *case_sensitive {
                    record.name.contains(needle.as_str())
                } else {
                    record.name.to_lowercase().contains(needle.as_str())
                }
            }
            Condition::FilenameMatches(pattern) => pattern.matches(&record.name),
            Condition::ExtensionIs(ext) => record.extension == *ext,
            Condition::SizeMb { op, value } => op.holds(record.size_mb(), *value),
            Condition::AgeDays { op, value } => op.holds(record.age_days(now) as f64, *value),
            Condition::FolderContains(folder) => record
                .folder()
                .components()
                .any(|c| c.as_os_str().to_string_lossy() == folder.as_str()),
            Condition::RegexMatch(re) => re.is_match(&record.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleAction {
    pub kind: ActionKind,
    pub destination: Option<PathBuf>,
}

impl RuleAction {
    pub fn compile(rule: &str, spec: &ActionSpec) -> Result<Self, ValidationError> {
        let destination = spec
            .destination
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);
        let kind = match spec.kind.as_str() {
            "cleanup" | "delete" => ActionKind::Cleanup,
            "organize" => ActionKind::Organize,
            "move" => {
                if destination.is_none() {
                    return Err(ValidationError::new(rule, "move action needs a destination"));
                }
                ActionKind::Organize
            }
            "archive" => ActionKind::Archive,
            "compress" => ActionKind::Compress,
            "review" => ActionKind::Review,
            other => {
                return Err(ValidationError::new(
                    rule,
                    format!("unknown action type '{}'", other),
                ))
            }
        };
        Ok(Self { kind, destination })
    }

    /// Destination for a file living in `folder`. Relative destinations are
    /// resolved against that folder.
    pub fn destination_for(&self, folder: &Path) -> Option<PathBuf> {
        self.destination.as_ref().map(|d| {
            if d.is_absolute() {
                d.clone()
            } else {
                folder.join(d)
            }
        })
    }
}

/// A validated rule ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: i64,
    pub name: String,
    pub priority: u8,
    pub conditions: Vec<Condition>,
    pub actions: Vec<RuleAction>,
}

impl CompiledRule {
    pub fn matches(&self, record: &FileRecord, now: DateTime<Utc>) -> bool {
        self.conditions.iter().all(|c| c.matches(record, now))
    }
}

/// Validate a rule definition without persisting it.
pub fn validate(spec: &RuleSpec) -> Result<(), ValidationError> {
    compile_spec(0, spec).map(|_| ())
}

pub fn compile_spec(id: i64, spec: &RuleSpec) -> Result<CompiledRule, ValidationError> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(ValidationError::new(format!("#{}", id), "rule name is empty"));
    }
    if spec.priority > MAX_PRIORITY {
        return Err(ValidationError::new(
            name,
            format!("priority {} is above {}", spec.priority, MAX_PRIORITY),
        ));
    }
    if spec.conditions.is_empty() {
        return Err(ValidationError::new(name, "rule has no conditions"));
    }
    if spec.actions.is_empty() {
        return Err(ValidationError::new(name, "rule has no actions"));
    }

    Ok(CompiledRule {
        id,
        name: name.to_string(),
        priority: spec.priority,
        conditions: spec
            .conditions
            .iter()
            .map(|c| Condition::compile(name, c))
            .collect::<Result<_, _>>()?,
        actions: spec
            .actions
            .iter()
            .map(|a| RuleAction::compile(name, a))
            .collect::<Result<_, _>>()?,
    })
}

/// Rules installed on first start.
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec {
            name: "Screenshots to Screenshots folder".to_string(),
            conditions: vec![ConditionSpec::new("filename_contains", None, "screenshot")],
            actions: vec![ActionSpec::new("move", Some("Screenshots"))],
            priority: 10,
            enabled: true,
        },
        RuleSpec {
            name: "Old downloads cleanup".to_string(),
            conditions: vec![
                ConditionSpec::new("folder_contains", None, "Downloads"),
                ConditionSpec::new("age_days", Some(">"), 90),
            ],
            actions: vec![ActionSpec::new("archive", Some("Old Downloads"))],
            priority: DEFAULT_PRIORITY,
            enabled: true,
        },
    ]
}
