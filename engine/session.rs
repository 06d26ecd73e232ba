//! The diagnostic loop.
//!
//! A `Session` owns everything mutable about one diagnosis: the belief, the
//! asked-set, the answer log and its own copy of the rules. The probability
//! table is shared read-only, so independent sessions never observe each
//! other. Answers come from a `Responder`; the session never blocks anywhere
//! else.

use crate::belief::{BeliefState, RankedDisease, Response};
use crate::constraints::{Assignment, ConstraintChecker};
use crate::record::{RecordedAnswer, SessionRecord};
use crate::selector::{AskedSet, QuestionSelector, Selection};
use crate::table::ProbabilityTable;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to obtain an answer: {0}")]
    Responder(#[from] io::Error),
}

/// What to do with a question whose answer broke a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Leave the symptom unasked so it can be asked again.
    Retry,
    /// Mark the symptom as asked without touching the belief.
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Stop once the leading disease reaches this posterior.
    pub confidence_threshold: f64,
    /// Question budget; rejected answers count against it.
    pub max_questions: usize,
    /// How many diseases to report.
    pub top_k: usize,
    pub rejection: RejectionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            max_questions: 20,
            top_k: 5,
            rejection: RejectionPolicy::Retry,
        }
    }
}

/// A question put to the responder.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub symptom: String,
    pub gain: f64,
    /// 1-based position within the budget.
    pub step: usize,
    pub budget: usize,
}

impl Question {
    /// The symptom name with underscores turned into spaces.
    pub fn readable_symptom(&self) -> String {
        self.symptom.replace('_', " ")
    }
}

/// The external party that answers questions: a person at a terminal, or an
/// oracle during simulation.
pub trait Responder {
    fn respond(&mut self, question: &Question) -> io::Result<Response>;

    fn on_rejected(&mut self, question: &Question, violations: &[String]) {
        let _ = (question, violations);
    }

    fn on_accepted(&mut self, question: &Question, ranking: &[RankedDisease]) {
        let _ = (question, ranking);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// The answer was not applied; the violations explain why.
    Rejected(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Confident,
    NoQuestionsLeft,
    BudgetExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Confident => "confidence threshold reached",
            StopReason::NoQuestionsLeft => "no further informative questions",
            StopReason::BudgetExhausted => "question budget exhausted",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub stop: StopReason,
    /// Questions put to the responder, rejected ones included.
    pub steps: usize,
    pub top_k: Vec<RankedDisease>,
}

#[derive(Debug, Clone)]
pub struct Session {
    belief: BeliefState,
    selector: QuestionSelector,
    checker: ConstraintChecker,
    asked: AskedSet,
    answers: Vec<(String, Response)>,
    config: SessionConfig,
    steps: usize,
}

impl Session {
    pub fn new(
        table: Arc<ProbabilityTable>,
        checker: ConstraintChecker,
        config: SessionConfig,
    ) -> Self {
        Self {
            belief: BeliefState::new(table.clone()),
            selector: QuestionSelector::new(table),
            checker,
            asked: AskedSet::new(),
            answers: Vec::new(),
            config,
            steps: 0,
        }
    }

    pub fn belief(&self) -> &BeliefState {
        &self.belief
    }

    pub fn asked(&self) -> &AskedSet {
        &self.asked
    }

    pub fn checker(&self) -> &ConstraintChecker {
        &self.checker
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Accepted answers in the order they were given.
    pub fn answers(&self) -> &[(String, Response)] {
        &self.answers
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn assignment(&self) -> Assignment {
        self.answers.iter().cloned().collect()
    }

    pub fn top_k(&self) -> Vec<RankedDisease> {
        self.belief.top_k(self.config.top_k)
    }

    pub fn is_confident(&self) -> bool {
        self.belief
            .top_k(1)
            .first()
            .is_some_and(|top| top.probability >= self.config.confidence_threshold)
    }

    pub fn next_question(&self) -> Selection {
        self.selector.select_next(&self.belief, &self.asked)
    }

    /// Validates the answer together with every earlier answer, then applies it.
    ///
    /// A rejected answer changes nothing.
    pub fn submit(&mut self, symptom: &str, response: Response) -> Submission {
        let mut tentative = self.assignment();
        tentative.insert(symptom.to_string(), response);

        let verdict = self.checker.check(&tentative);
        if !verdict.is_valid {
            log::warn!(
                "Rejected {}={}: {}",
                symptom,
                response,
                verdict.violations.join("; ")
            );
            return Submission::Rejected(verdict.violations);
        }

        match self.answers.iter_mut().find(|(s, _)| s == symptom) {
            Some(entry) => entry.1 = response,
            None => self.answers.push((symptom.to_string(), response)),
        }
        self.belief.update(symptom, response);
        self.asked.insert(symptom);
        Submission::Accepted
    }

    /// Applies pre-parsed flags (for example from a free-text mapper).
    ///
    /// Flags are applied in table symptom order; names the table does not know
    /// are skipped. Returns the rejected flags with their violations.
    pub fn observe(&mut self, flags: &HashMap<String, Response>) -> Vec<(String, Vec<String>)> {
        let ignored = flags
            .keys()
            .filter(|name| !self.belief.table().is_symptom(name))
            .count();
        if ignored > 0 {
            log::warn!("Ignoring {ignored} observed flags that name no known symptom");
        }

        let ordered: Vec<(String, Response)> = self
            .belief
            .table()
            .symptoms()
            .iter()
            .filter_map(|s| flags.get(s).map(|&r| (s.clone(), r)))
            .collect();

        let mut rejected = Vec::new();
        for (symptom, response) in ordered {
            if let Submission::Rejected(violations) = self.submit(&symptom, response) {
                rejected.push((symptom, violations));
            }
        }
        rejected
    }

    /// Asks questions until one of the `StopReason` conditions holds.
    ///
    /// Confidence is checked before the first question, so a prior that already
    /// meets the threshold stops the session with zero questions asked.
    pub fn run<R: Responder>(&mut self, responder: &mut R) -> Result<SessionOutcome, SessionError> {
        let stop = loop {
            if self.is_confident() {
                break StopReason::Confident;
            }
            if self.steps >= self.config.max_questions {
                break StopReason::BudgetExhausted;
            }
            let selection = self.next_question();
            let Some(symptom) = selection.symptom else {
                break StopReason::NoQuestionsLeft;
            };

            self.steps += 1;
            let question = Question {
                symptom,
                gain: selection.gain,
                step: self.steps,
                budget: self.config.max_questions,
            };
            let response = responder.respond(&question)?;

            match self.submit(&question.symptom, response) {
                Submission::Accepted => {
                    responder.on_accepted(&question, &self.top_k());
                }
                Submission::Rejected(violations) => {
                    if self.config.rejection == RejectionPolicy::Skip {
                        self.asked.insert(question.symptom.clone());
                    }
                    responder.on_rejected(&question, &violations);
                }
            }
        };

        let top_k = self.top_k();
        let leading = match top_k.first() {
            Some(top) => format!("{} {:.4}", top.disease, top.probability),
            None => "none".to_string(),
        };
        log::info!(
            "Session stopped after {} questions: {stop} (leading: {leading})",
            self.steps
        );

        Ok(SessionOutcome {
            stop,
            steps: self.steps,
            top_k,
        })
    }

    /// A serializable summary for a persistence sink.
    pub fn record(&self, session_id: impl Into<String>) -> SessionRecord {
        let table = self.belief.table();
        SessionRecord {
            session_id: session_id.into(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs()),
            confidence_threshold: self.config.confidence_threshold,
            num_questions_asked: self.answers.len(),
            steps: self.steps,
            answers: self
                .answers
                .iter()
                .map(|(symptom, response)| RecordedAnswer {
                    symptom: symptom.clone(),
                    response: response.flag(),
                })
                .collect(),
            final_topk: self.top_k(),
            priors: table
                .diseases()
                .iter()
                .zip(self.belief.priors().iter())
                .map(|(d, &p)| (d.clone(), p))
                .collect(),
            posteriors: self.belief.top_k(table.num_diseases()),
        }
    }
}
