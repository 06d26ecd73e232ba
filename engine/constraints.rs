//! Logical rules over symptom and disease flags.
//!
//! The checker validates a given (possibly partial) assignment against the
//! registered rules and reports every violation. It never searches for
//! satisfying assignments. `check_consistency` is a static pass over the rules
//! alone that detects a bounded set of contradiction patterns; a clean report
//! does not prove the rule set satisfiable.

use crate::belief::Response;
use crate::table::ProbabilityTable;
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

/// A (possibly partial) assignment of flags to symptom and disease names.
pub type Assignment = HashMap<String, Response>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "relation", rename_all = "snake_case")]
pub enum Constraint {
    /// `cause = 1` requires `effect = 1`.
    Implication { cause: String, effect: String },
    /// `a` and `b` are never both 1.
    MutualExclusion { a: String, b: String },
    /// Asserting `disease = 1` requires `symptom = 1`.
    DiseaseRequires { disease: String, symptom: String },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Implication { cause, effect } => write!(f, "{cause} -> {effect}"),
            Constraint::MutualExclusion { a, b } => write!(f, "{a} XOR {b}"),
            Constraint::DiseaseRequires { disease, symptom } => {
                write!(f, "{disease} requires {symptom}")
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Symptom '{0}' not found in the probability table's symptom list.")]
    UnknownSymptom(String),
    #[error("Disease '{0}' not found in the probability table's disease list.")]
    UnknownDisease(String),
}

/// Result of checking one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_valid: bool,
    /// One message per violated rule, in registration order.
    pub violations: Vec<String>,
}

/// Result of the static analysis of the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConstraintChecker {
    symptoms: Vec<String>,
    known_symptoms: AHashSet<String>,
    known_diseases: AHashSet<String>,
    constraints: Vec<Constraint>,
}

impl ConstraintChecker {
    pub fn new(table: &ProbabilityTable) -> Self {
        Self {
            symptoms: table.symptoms().to_vec(),
            known_symptoms: table.symptoms().iter().cloned().collect(),
            known_diseases: table.diseases().iter().cloned().collect(),
            constraints: Vec::new(),
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    fn require_symptom(&self, name: &str) -> Result<(), ValidationError> {
        if self.known_symptoms.contains(name) {
            Ok(())
        } else {
            Err(ValidationError::UnknownSymptom(name.to_string()))
        }
    }

    fn require_disease(&self, name: &str) -> Result<(), ValidationError> {
        if self.known_diseases.contains(name) {
            Ok(())
        } else {
            Err(ValidationError::UnknownDisease(name.to_string()))
        }
    }

    /// Registers a rule after checking that every name it mentions is known.
    /// A rejected rule leaves the existing list untouched.
    pub fn add(&mut self, constraint: Constraint) -> Result<(), ValidationError> {
        match &constraint {
            Constraint::Implication { cause, effect } => {
                self.require_symptom(cause)?;
                self.require_symptom(effect)?;
            }
            Constraint::MutualExclusion { a, b } => {
                self.require_symptom(a)?;
                self.require_symptom(b)?;
            }
            Constraint::DiseaseRequires { disease, symptom } => {
                self.require_disease(disease)?;
                self.require_symptom(symptom)?;
            }
        }
        log::info!("Added constraint: {constraint}");
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn add_implication(&mut self, cause: &str, effect: &str) -> Result<(), ValidationError> {
        self.add(Constraint::Implication {
            cause: cause.to_string(),
            effect: effect.to_string(),
        })
    }

    pub fn add_exclusion(&mut self, a: &str, b: &str) -> Result<(), ValidationError> {
        self.add(Constraint::MutualExclusion {
            a: a.to_string(),
            b: b.to_string(),
        })
    }

    pub fn add_requirement(&mut self, disease: &str, symptom: &str) -> Result<(), ValidationError> {
        self.add(Constraint::DiseaseRequires {
            disease: disease.to_string(),
            symptom: symptom.to_string(),
        })
    }

    /// Checks an assignment against every rule and collects all violations.
    ///
    /// Keys that are neither known symptoms nor known diseases are ignored.
    /// Names missing from the assignment read as 0.
    pub fn check(&self, assignment: &Assignment) -> Verdict {
        let relevant: AHashMap<&str, i8> = assignment
            .iter()
            .filter(|(k, _)| self.known_symptoms.contains(*k) || self.known_diseases.contains(*k))
            .map(|(k, v)| (k.as_str(), v.flag()))
            .collect();
        if relevant.len() < assignment.len() {
            log::debug!(
                "Ignoring {} unrecognized assignment keys",
                assignment.len() - relevant.len()
            );
        }
        let flag = |name: &str| relevant.get(name).copied().unwrap_or(0);

        let mut violations = Vec::new();
        for constraint in &self.constraints {
            match constraint {
                Constraint::Implication { cause, effect } => {
                    if flag(cause.as_str()) == 1 && flag(effect.as_str()) == 0 {
                        violations.push(format!("Violation: {cause}=1 requires {effect}=1"));
                    }
                }
                Constraint::MutualExclusion { a, b } => {
                    if flag(a.as_str()) == 1 && flag(b.as_str()) == 1 {
                        violations.push(format!("Violation: {a} and {b} cannot both be 1"));
                    }
                }
                Constraint::DiseaseRequires { disease, symptom } => {
                    if flag(disease.as_str()) == 1 && flag(symptom.as_str()) == 0 {
                        violations.push(format!(
                            "Violation: disease {disease} requires symptom {symptom}=1"
                        ));
                    }
                }
            }
        }

        Verdict {
            is_valid: violations.is_empty(),
            violations,
        }
    }

    /// Static analysis of the registered rules.
    ///
    /// Detects:
    /// - an implication `x -> y` registered alongside an exclusion of `x` and `y`;
    /// - a symptom whose implication closure (cycles included) reaches both sides
    ///   of an exclusion, so it can never be 1;
    /// - a disease whose requirements can only be met by such a symptom, or
    ///   whose requirements together force an excluded pair.
    pub fn check_consistency(&self) -> ConsistencyReport {
        let mut implies: AHashMap<&str, Vec<&str>> = AHashMap::new();
        let mut exclusions: Vec<(&str, &str)> = Vec::new();
        let mut requirements: Vec<(&str, Vec<&str>)> = Vec::new();

        for constraint in &self.constraints {
            match constraint {
                Constraint::Implication { cause, effect } => {
                    implies
                        .entry(cause.as_str())
                        .or_default()
                        .push(effect.as_str());
                }
                Constraint::MutualExclusion { a, b } => exclusions.push((a.as_str(), b.as_str())),
                Constraint::DiseaseRequires { disease, symptom } => {
                    match requirements.iter_mut().find(|(d, _)| *d == disease.as_str()) {
                        Some((_, symptoms)) => symptoms.push(symptom.as_str()),
                        None => requirements.push((disease.as_str(), vec![symptom.as_str()])),
                    }
                }
            }
        }

        let excluded = |x: &str, y: &str| {
            exclusions
                .iter()
                .any(|&(a, b)| (a == x && b == y) || (a == y && b == x))
        };

        let mut issues = Vec::new();
        let mut never_present: AHashSet<&str> = AHashSet::new();

        for constraint in &self.constraints {
            match constraint {
                Constraint::Implication { cause, effect }
                    if excluded(cause.as_str(), effect.as_str()) =>
                {
                    issues.push(format!(
                        "Direct contradiction: {cause} -> {effect} is registered together with the mutual exclusion of {cause} and {effect}; {cause} can never be 1"
                    ));
                    never_present.insert(cause.as_str());
                }
                Constraint::MutualExclusion { a, b } if a == b => {
                    issues.push(format!(
                        "Mutual exclusion of {a} with itself means {a} can never be 1"
                    ));
                    never_present.insert(a.as_str());
                }
                _ => {}
            }
        }

        for symptom in &self.symptoms {
            let symptom = symptom.as_str();
            if never_present.contains(symptom) || !implies.contains_key(symptom) {
                continue;
            }
            let closure = implication_closure([symptom], &implies);
            if let Some((a, b)) = forced_exclusion(&closure.reached, &exclusions) {
                let cycle = if closure.cyclic {
                    " (through an implication cycle)"
                } else {
                    ""
                };
                issues.push(format!(
                    "{symptom} can never be 1: its implications{cycle} force both {a} and {b}, which are mutually exclusive"
                ));
                never_present.insert(symptom);
            }
        }

        for (disease, required) in &requirements {
            if let Some(blocked) = required.iter().find(|s| never_present.contains(**s)) {
                issues.push(format!(
                    "Disease {disease} requires {blocked}, which can never be 1; {disease} can only ever be 0"
                ));
                continue;
            }
            let closure = implication_closure(required.iter().copied(), &implies);
            if let Some((a, b)) = forced_exclusion(&closure.reached, &exclusions) {
                issues.push(format!(
                    "Disease {disease} requires symptoms that together force both {a} and {b}, which are mutually exclusive; {disease} can only ever be 0"
                ));
            }
        }

        if issues.is_empty() {
            log::debug!(
                "Consistency check passed for {} rules",
                self.constraints.len()
            );
        } else {
            for issue in &issues {
                log::warn!("Rule consistency issue: {issue}");
            }
        }

        ConsistencyReport {
            ok: issues.is_empty(),
            issues,
        }
    }
}

struct Closure<'a> {
    reached: AHashSet<&'a str>,
    /// True if some start symptom is reachable from itself.
    cyclic: bool,
}

/// Every symptom forced to 1 when all `starts` are 1.
fn implication_closure<'a>(
    starts: impl IntoIterator<Item = &'a str>,
    implies: &AHashMap<&'a str, Vec<&'a str>>,
) -> Closure<'a> {
    let starts: Vec<&str> = starts.into_iter().collect();
    let mut reached: AHashSet<&str> = starts.iter().copied().collect();
    let mut queue: VecDeque<&str> = starts.iter().copied().collect();
    let mut cyclic = false;

    while let Some(node) = queue.pop_front() {
        for &next in implies.get(node).into_iter().flatten() {
            if starts.contains(&next) {
                cyclic = true;
            }
            if reached.insert(next) {
                queue.push_back(next);
            }
        }
    }

    Closure { reached, cyclic }
}

/// The first registered exclusion whose two sides are both forced.
fn forced_exclusion<'a>(
    forced: &AHashSet<&str>,
    exclusions: &[(&'a str, &'a str)],
) -> Option<(&'a str, &'a str)> {
    exclusions
        .iter()
        .copied()
        .find(|(a, b)| forced.contains(a) && forced.contains(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn table() -> ProbabilityTable {
        let symptoms: Vec<String> = ["mild_fever", "high_fever", "fatigue", "dry_cough", "chills"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let diseases = vec!["flu".to_string(), "cold".to_string()];
        ProbabilityTable::from_parts(
            diseases,
            symptoms,
            Array1::from_elem(2, 0.5),
            Array2::from_elem((2, 5), 0.5),
        )
        .unwrap()
    }

    fn assignment(entries: &[(&str, i64)]) -> Assignment {
        entries
            .iter()
            .map(|&(k, v)| (k.to_string(), Response::from_flag(v).unwrap()))
            .collect()
    }

    #[test]
    fn implication_violation_names_both_symptoms() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("mild_fever", "fatigue").unwrap();

        let verdict = checker.check(&assignment(&[("mild_fever", 1), ("fatigue", 0)]));
        assert!(!verdict.is_valid);
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].contains("mild_fever"));
        assert!(verdict.violations[0].contains("fatigue"));
    }

    #[test]
    fn absent_keys_read_as_zero_and_unknown_is_not_zero() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("mild_fever", "fatigue").unwrap();
        assert!(!checker.check(&assignment(&[("mild_fever", 1)])).is_valid);
        let verdict = checker.check(&assignment(&[("mild_fever", 1), ("fatigue", -1)]));
        assert!(verdict.is_valid);
    }

    #[test]
    fn all_violations_are_collected() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("mild_fever", "fatigue").unwrap();
        checker.add_exclusion("high_fever", "dry_cough").unwrap();
        checker.add_requirement("flu", "chills").unwrap();

        let verdict = checker.check(&assignment(&[
            ("mild_fever", 1),
            ("high_fever", 1),
            ("dry_cough", 1),
            ("flu", 1),
        ]));
        assert_eq!(verdict.violations.len(), 3);
        assert!(verdict.violations[2].contains("flu"));
    }

    #[test]
    fn requirement_only_fires_on_asserted_disease() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_requirement("flu", "chills").unwrap();
        assert!(checker.check(&assignment(&[("chills", 0)])).is_valid);
        assert!(!checker.check(&assignment(&[("flu", 1)])).is_valid);
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_exclusion("high_fever", "fatigue").unwrap();
        let verdict = checker.check(&assignment(&[("headache", 1), ("high_fever", 1)]));
        assert!(verdict.is_valid);
    }

    #[test]
    fn unknown_names_are_rejected_without_side_effects() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("mild_fever", "fatigue").unwrap();
        assert_eq!(
            checker.add_implication("mild_fever", "sneezing"),
            Err(ValidationError::UnknownSymptom("sneezing".to_string()))
        );
        assert_eq!(
            checker.add_requirement("measles", "chills"),
            Err(ValidationError::UnknownDisease("measles".to_string()))
        );
        assert_eq!(checker.len(), 1);
    }

    #[test]
    fn direct_contradiction_is_reported() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("mild_fever", "fatigue").unwrap();
        checker.add_exclusion("mild_fever", "fatigue").unwrap();
        let report = checker.check_consistency();
        assert!(!report.ok);
        assert!(!report.issues.is_empty());
        assert!(report.issues[0].contains("mild_fever"));
    }

    #[test]
    fn cyclic_implications_with_exclusion_block_required_disease() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("high_fever", "chills").unwrap();
        checker.add_implication("chills", "high_fever").unwrap();
        checker.add_implication("chills", "fatigue").unwrap();
        checker.add_exclusion("high_fever", "fatigue").unwrap();
        checker.add_requirement("flu", "chills").unwrap();

        let report = checker.check_consistency();
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i.contains("implication cycle")));
        assert!(report.issues.iter().any(|i| i.contains("Disease flu")));
    }

    #[test]
    fn combined_requirements_forcing_exclusion_are_reported() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_exclusion("high_fever", "mild_fever").unwrap();
        checker.add_requirement("cold", "high_fever").unwrap();
        checker.add_requirement("cold", "mild_fever").unwrap();

        let report = checker.check_consistency();
        assert!(!report.ok);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("cold"));
    }

    #[test]
    fn self_exclusion_blocks_the_symptom() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_exclusion("chills", "chills").unwrap();
        checker.add_requirement("flu", "chills").unwrap();

        let report = checker.check_consistency();
        assert!(!report.ok);
        assert_eq!(
            report.issues[0],
            "Mutual exclusion of chills with itself means chills can never be 1"
        );
        assert!(report.issues[1].starts_with("Disease flu requires chills"));
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn acyclic_closure_reaching_both_sides_of_exclusion() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("mild_fever", "fatigue").unwrap();
        checker.add_implication("mild_fever", "chills").unwrap();
        checker.add_exclusion("fatigue", "chills").unwrap();

        let report = checker.check_consistency();
        assert_eq!(
            report.issues,
            vec![
                "mild_fever can never be 1: its implications force both fatigue and chills, \
                 which are mutually exclusive"
            ]
        );
        assert!(!report.issues[0].contains("implication cycle"));
    }

    #[test]
    fn consistent_rules_pass() {
        let mut checker = ConstraintChecker::new(&table());
        checker.add_implication("mild_fever", "fatigue").unwrap();
        checker.add_exclusion("high_fever", "mild_fever").unwrap();
        checker.add_requirement("flu", "fatigue").unwrap();
        let report = checker.check_consistency();
        assert!(report.ok);
        assert!(report.issues.is_empty());
    }
}
