//! Next-question selection by expected information gain.
//!
//! For a candidate symptom `s` and the current belief `b`:
//!
//! ```text
//! P(s=1)  = Σ_d b(d) · P(s=1 | d)
//! E[H']   = P(s=1) · H(b | s=1) + P(s=0) · H(b | s=0)
//! IG(s)   = H(b) − E[H']
//! ```
//!
//! The hypothetical posteriors use exactly the update rule of `BeliefState`.
//! Selection is greedy one-step lookahead: the candidate with the largest gain
//! wins and ties go to the candidate that comes first in symptom order.

use crate::belief::{BeliefState, Response, posterior_given, shannon_entropy};
use crate::table::ProbabilityTable;
use ahash::AHashSet;
use ndarray::ArrayView1;
use std::sync::Arc;

/// Symptoms already presented in the current session.
#[derive(Debug, Clone, Default)]
pub struct AskedSet {
    symptoms: AHashSet<String>,
}

impl AskedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the symptom was already present.
    pub fn insert(&mut self, symptom: impl Into<String>) -> bool {
        self.symptoms.insert(symptom.into())
    }

    pub fn contains(&self, symptom: &str) -> bool {
        self.symptoms.contains(symptom)
    }

    pub fn len(&self) -> usize {
        self.symptoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symptoms.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AskedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            symptoms: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// The outcome of one selection round.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// `None` when every symptom has been asked.
    pub symptom: Option<String>,
    /// Expected information gain in bits; `f64::NEG_INFINITY` when nothing is left.
    pub gain: f64,
}

impl Selection {
    fn exhausted() -> Self {
        Self {
            symptom: None,
            gain: f64::NEG_INFINITY,
        }
    }
}

/// A scored candidate question.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateGain {
    pub symptom: String,
    pub gain: f64,
    /// Predicted probability of a "yes" answer under the current belief.
    pub p_present: f64,
}

#[derive(Debug, Clone)]
pub struct QuestionSelector {
    table: Arc<ProbabilityTable>,
}

impl QuestionSelector {
    pub fn new(table: Arc<ProbabilityTable>) -> Self {
        Self { table }
    }

    /// Expected posterior entropy of asking symptom `symptom_idx`, and P(s=1).
    pub fn expected_entropy(&self, belief: ArrayView1<'_, f64>, symptom_idx: usize) -> (f64, f64) {
        let presence = self.table.symptom_column(symptom_idx);
        let p_present = belief.dot(&presence).clamp(0.0, 1.0);
        let p_absent = 1.0 - p_present;

        let if_present = posterior_given(belief, presence, Response::Present);
        let if_absent = posterior_given(belief, presence, Response::Absent);

        let expected = p_present * shannon_entropy(if_present.view())
            + p_absent * shannon_entropy(if_absent.view());
        (expected, p_present)
    }

    /// Expected information gain of one symptom, or `None` if the table does not know it.
    pub fn information_gain(&self, belief: &BeliefState, symptom: &str) -> Option<f64> {
        let idx = self.table.symptom_index(symptom)?;
        let (expected, _) = self.expected_entropy(belief.posterior(), idx);
        Some(belief.entropy() - expected)
    }

    /// Scores every unasked symptom, in symptom order.
    fn score_candidates(&self, belief: &BeliefState, asked: &AskedSet) -> Vec<CandidateGain> {
        let current = belief.entropy();
        self.table
            .symptoms()
            .iter()
            .enumerate()
            .filter(|(_, name)| !asked.contains(name))
            .map(|(idx, name)| {
                let (expected, p_present) = self.expected_entropy(belief.posterior(), idx);
                CandidateGain {
                    symptom: name.clone(),
                    gain: current - expected,
                    p_present,
                }
            })
            .collect()
    }

    /// Picks the unasked symptom with the highest expected information gain.
    pub fn select_next(&self, belief: &BeliefState, asked: &AskedSet) -> Selection {
        let mut best = Selection::exhausted();
        for candidate in self.score_candidates(belief, asked) {
            if candidate.gain > best.gain {
                best = Selection {
                    symptom: Some(candidate.symptom),
                    gain: candidate.gain,
                };
            }
        }

        match &best.symptom {
            Some(symptom) => log::debug!("Selected '{}' (IG={:.4} bits)", symptom, best.gain),
            None => log::debug!("No unasked symptoms remain"),
        }
        best
    }

    /// The `limit` best candidates, highest gain first. Ties keep symptom order.
    pub fn rank_candidates(
        &self,
        belief: &BeliefState,
        asked: &AskedSet,
        limit: usize,
    ) -> Vec<CandidateGain> {
        let mut scored = self.score_candidates(belief, asked);
        scored.sort_by(|a, b| b.gain.total_cmp(&a.gain));
        scored.truncate(limit);
        scored
    }
}
