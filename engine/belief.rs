//! Belief tracking over diseases.
//!
//! The belief vector is ordered like `ProbabilityTable::diseases()` and always
//! sums to 1. Observations are folded in with Bayes' rule under the assumption
//! that symptoms are conditionally independent given the disease.

use crate::table::ProbabilityTable;
use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Mass added to every entry when an update drives the total to exactly zero.
pub const ZERO_MASS_EPSILON: f64 = 1e-9;

/// An answer about one symptom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Absent,
    Present,
    /// Not observed, or skipped by the user.
    Unknown,
}

impl Response {
    /// Maps the conventional flags 1 / 0 / -1.
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            1 => Some(Response::Present),
            0 => Some(Response::Absent),
            -1 => Some(Response::Unknown),
            _ => None,
        }
    }

    pub fn flag(self) -> i8 {
        match self {
            Response::Present => 1,
            Response::Absent => 0,
            Response::Unknown => -1,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Response::Unknown)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Response::Present => "yes",
            Response::Absent => "no",
            Response::Unknown => "unknown",
        })
    }
}

/// A disease with its current posterior probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDisease {
    pub disease: String,
    pub probability: f64,
}

/// Rescales `mass` to sum to 1 in place.
///
/// If the total is exactly zero every entry first receives `ZERO_MASS_EPSILON`,
/// which turns an all-contradicted belief into a uniform one.
pub fn normalize(mass: &mut Array1<f64>) {
    if mass.is_empty() {
        return;
    }
    let mut total = mass.sum();
    if total == 0.0 {
        mass.mapv_inplace(|m| m + ZERO_MASS_EPSILON);
        total = mass.sum();
    }
    mass.mapv_inplace(|m| m / total);
}

/// Base-2 Shannon entropy. Only strictly positive masses contribute.
pub fn shannon_entropy(p: ArrayView1<'_, f64>) -> f64 {
    -p.iter()
        .filter(|&&m| m > 0.0)
        .map(|&m| m * m.log2())
        .sum::<f64>()
}

/// The normalized posterior of `belief` after observing `response`, given
/// `presence[d] = P(symptom=1 | d)`. `Unknown` returns the belief unchanged.
pub fn posterior_given(
    belief: ArrayView1<'_, f64>,
    presence: ArrayView1<'_, f64>,
    response: Response,
) -> Array1<f64> {
    let mut mass = belief.to_owned();
    match response {
        Response::Unknown => return mass,
        Response::Present => Zip::from(&mut mass)
            .and(&presence)
            .for_each(|m, &c| *m *= c),
        Response::Absent => Zip::from(&mut mass)
            .and(&presence)
            .for_each(|m, &c| *m *= 1.0 - c),
    }
    normalize(&mut mass);
    mass
}

/// The belief of one diagnostic session.
#[derive(Debug, Clone)]
pub struct BeliefState {
    table: Arc<ProbabilityTable>,
    priors: Array1<f64>,
    posterior: Array1<f64>,
}

impl BeliefState {
    pub fn new(table: Arc<ProbabilityTable>) -> Self {
        let priors: Array1<f64> = table
            .diseases()
            .iter()
            .map(|d| table.prior(d))
            .collect();
        Self {
            posterior: priors.clone(),
            priors,
            table,
        }
    }

    pub fn table(&self) -> &Arc<ProbabilityTable> {
        &self.table
    }

    pub fn priors(&self) -> ArrayView1<'_, f64> {
        self.priors.view()
    }

    pub fn posterior(&self) -> ArrayView1<'_, f64> {
        self.posterior.view()
    }

    pub fn probability(&self, disease: &str) -> Option<f64> {
        self.table.disease_index(disease).map(|d| self.posterior[d])
    }

    /// Folds one observation into the belief and returns the new posterior.
    pub fn update(&mut self, symptom: &str, response: Response) -> ArrayView1<'_, f64> {
        if response.is_known() {
            let presence = self.table.likelihood_of_presence(symptom);
            self.posterior = posterior_given(self.posterior.view(), presence.view(), response);
            log::debug!(
                "Belief updated with {}={}; entropy now {:.4} bits",
                symptom,
                response,
                self.entropy()
            );
        }
        self.posterior.view()
    }

    /// The `k` most probable diseases, highest first. Ties keep disease order.
    pub fn top_k(&self, k: usize) -> Vec<RankedDisease> {
        let mut order: Vec<usize> = (0..self.posterior.len()).collect();
        order.sort_by(|&a, &b| match self.posterior[b].total_cmp(&self.posterior[a]) {
            Ordering::Equal => a.cmp(&b),
            other => other,
        });
        order
            .into_iter()
            .take(k)
            .map(|d| RankedDisease {
                disease: self.table.diseases()[d].clone(),
                probability: self.posterior[d],
            })
            .collect()
    }

    pub fn entropy(&self) -> f64 {
        shannon_entropy(self.posterior.view())
    }

    /// Restores the posterior to the priors.
    pub fn reset(&mut self) {
        self.posterior.assign(&self.priors);
    }
}
