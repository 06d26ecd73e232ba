//! TOML configuration: dataset options, session limits, and the rule list.
//!
//! Every section is optional. Rules are read as loose
//! `(subject, relation, object)` triples and converted into `Constraint`
//! values here; an unrecognized relation is a fatal configuration error and
//! no rule from the file is registered.

use crate::constraints::{Constraint, ConstraintChecker, ValidationError};
use crate::session::{RejectionPolicy, SessionConfig};
use crate::table::{DEFAULT_LABEL_COLUMN, DEFAULT_SMOOTHING};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error(
        "Unknown constraint relation '{relation}' in rule ({subject}, {relation}, {object}). Expected one of: implies, ->, excludes, xor, requires"
    )]
    UnknownRelation {
        subject: String,
        relation: String,
        object: String,
    },
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Either failure that can abort rule registration.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Implies,
    Excludes,
    Requires,
}

impl FromStr for Relation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implies" | "->" | "implication" => Ok(Relation::Implies),
            "excludes" | "xor" | "mutual_exclusion" => Ok(Relation::Excludes),
            "requires" => Ok(Relation::Requires),
            _ => Err(()),
        }
    }
}

/// A rule as written in the configuration file.
///
/// For `requires`, `subject` is the disease and `object` the symptom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl RuleSpec {
    pub fn to_constraint(&self) -> Result<Constraint, ConfigError> {
        let relation: Relation = self
            .relation
            .parse()
            .map_err(|_| ConfigError::UnknownRelation {
                subject: self.subject.clone(),
                relation: self.relation.clone(),
                object: self.object.clone(),
            })?;
        let subject = self.subject.clone();
        let object = self.object.clone();
        Ok(match relation {
            Relation::Implies => Constraint::Implication {
                cause: subject,
                effect: object,
            },
            Relation::Excludes => Constraint::MutualExclusion {
                a: subject,
                b: object,
            },
            Relation::Requires => Constraint::DiseaseRequires {
                disease: subject,
                symptom: object,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSection {
    pub label_column: String,
    pub smoothing: f64,
    pub separator: char,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            smoothing: DEFAULT_SMOOTHING,
            separator: ',',
        }
    }
}

impl DatasetSection {
    pub fn separator_byte(&self) -> Result<u8, ConfigError> {
        if self.separator.is_ascii() {
            Ok(self.separator as u8)
        } else {
            Err(ConfigError::InvalidValue {
                key: "dataset.separator",
                reason: format!("'{}' is not a single ASCII character", self.separator),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub confidence_threshold: f64,
    pub max_questions: usize,
    pub top_k: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            confidence_threshold: defaults.confidence_threshold,
            max_questions: defaults.max_questions,
            top_k: defaults.top_k,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnoserConfig {
    pub dataset: DatasetSection,
    pub session: SessionSection,
    pub rules: Vec<RuleSpec>,
}

impl DiagnoserConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = text.parse()?;
        log::info!(
            "Loaded configuration from '{}' ({} rules)",
            path.display(),
            config.rules.len()
        );
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.session.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "session.confidence_threshold",
                reason: format!("{threshold} is outside (0, 1]"),
            });
        }
        if self.session.max_questions == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.max_questions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.session.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.top_k",
                reason: "must be at least 1".to_string(),
            });
        }
        let smoothing = self.dataset.smoothing;
        if !smoothing.is_finite() || smoothing <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "dataset.smoothing",
                reason: format!("{smoothing} is not strictly positive"),
            });
        }
        self.dataset.separator_byte()?;
        Ok(())
    }

    pub fn session_config(&self, rejection: RejectionPolicy) -> SessionConfig {
        SessionConfig {
            confidence_threshold: self.session.confidence_threshold,
            max_questions: self.session.max_questions,
            top_k: self.session.top_k,
            rejection,
        }
    }
}

impl FromStr for DiagnoserConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: DiagnoserConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Converts and registers rules in file order.
///
/// Every relation is resolved before anything is registered, so an unknown
/// relation leaves the checker untouched. A rule naming an unknown symptom or
/// disease stops registration at that rule.
pub fn register_rules(
    checker: &mut ConstraintChecker,
    rules: &[RuleSpec],
) -> Result<(), RuleError> {
    let constraints = rules
        .iter()
        .map(RuleSpec::to_constraint)
        .collect::<Result<Vec<_>, _>>()?;
    for constraint in constraints {
        checker.add(constraint)?;
    }
    Ok(())
}
