//! The probability table: disease priors and per-disease symptom conditionals
//! estimated from a labeled case table with additive smoothing.
//!
//! The table is immutable once built and is shared read-only by every session.
//! Lookups by name never fail. Names the table does not know resolve through
//! a single `UnknownEntityPolicy`.

use crate::data::{DataError, Dataset, LabeledData};
use ahash::AHashMap;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Default additive smoothing constant (Laplace smoothing).
pub const DEFAULT_SMOOTHING: f64 = 1.0;

/// Conventional name of the label column in symptom/disease case tables.
pub const DEFAULT_LABEL_COLUMN: &str = "prognosis";

const PRIOR_SUM_TOLERANCE: f64 = 1e-9;

/// Fallback values returned for diseases or symptoms the table does not know.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnknownEntityPolicy {
    /// P(symptom=1 | disease) for any unknown (disease, symptom) pair.
    pub conditional: f64,
}

impl Default for UnknownEntityPolicy {
    fn default() -> Self {
        // Maximally uninformative: the likelihood is the same for both answers.
        Self { conditional: 0.5 }
    }
}

impl UnknownEntityPolicy {
    pub fn conditional(&self) -> f64 {
        self.conditional
    }

    /// Uniform prior over `num_diseases`.
    pub fn prior(&self, num_diseases: usize) -> f64 {
        if num_diseases == 0 {
            0.0
        } else {
            1.0 / num_diseases as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbabilityTable {
    diseases: Vec<String>,
    symptoms: Vec<String>,
    disease_index: AHashMap<String, usize>,
    symptom_index: AHashMap<String, usize>,
    priors: Array1<f64>,
    /// Shape [n_diseases, n_symptoms].
    conditionals: Array2<f64>,
    smoothing: f64,
    policy: UnknownEntityPolicy,
}

/// Builds a probability table from a case table.
///
/// Diseases are the sorted unique labels; symptoms keep their column order.
/// `prior(d) = count(d) / N` and
/// `conditional(d, s) = (count(s=1, label=d) + α) / (count(label=d) + 2α)`.
pub fn build_table(
    dataset: &Dataset,
    label_column: &str,
    smoothing: f64,
) -> Result<ProbabilityTable, DataError> {
    if !smoothing.is_finite() || smoothing <= 0.0 {
        return Err(DataError::InvalidSmoothing(smoothing));
    }
    let labeled = dataset.labeled(label_column)?;
    ProbabilityTable::from_labeled(&labeled, smoothing)
}

impl ProbabilityTable {
    pub fn from_labeled(data: &LabeledData, smoothing: f64) -> Result<Self, DataError> {
        if !smoothing.is_finite() || smoothing <= 0.0 {
            return Err(DataError::InvalidSmoothing(smoothing));
        }
        if data.labels.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        let mut diseases: Vec<String> = data.labels.clone();
        diseases.sort();
        diseases.dedup();
        let disease_index = index_of(&diseases);

        let n_rows = data.labels.len();
        let n_symptoms = data.symptoms.len();
        let mut case_counts = Array1::<f64>::zeros(diseases.len());
        let mut positive_counts = Array2::<f64>::zeros((diseases.len(), n_symptoms));

        for (row, label) in data.labels.iter().enumerate() {
            let d = disease_index[label.as_str()];
            case_counts[d] += 1.0;
            let flags = data.flags.row(row);
            let mut positives = positive_counts.row_mut(d);
            for (count, &flag) in positives.iter_mut().zip(flags.iter()) {
                *count += f64::from(flag);
            }
        }

        let priors = case_counts.mapv(|c| c / n_rows as f64);

        let mut conditionals = positive_counts;
        for (d, mut row) in conditionals.outer_iter_mut().enumerate() {
            let denominator = case_counts[d] + 2.0 * smoothing;
            row.mapv_inplace(|count| (count + smoothing) / denominator);
        }

        log::info!(
            "Built probability table: {} diseases, {} symptoms from {} cases (smoothing {})",
            diseases.len(),
            n_symptoms,
            n_rows,
            smoothing
        );

        Ok(Self {
            symptom_index: index_of(&data.symptoms),
            symptoms: data.symptoms.clone(),
            disease_index,
            diseases,
            priors,
            conditionals,
            smoothing,
            policy: UnknownEntityPolicy::default(),
        })
    }

    /// Assembles a table from already-estimated probabilities.
    ///
    /// Priors must be non-negative and sum to 1; every conditional must lie in (0, 1).
    pub fn from_parts(
        diseases: Vec<String>,
        symptoms: Vec<String>,
        priors: Array1<f64>,
        conditionals: Array2<f64>,
    ) -> Result<Self, DataError> {
        if priors.len() != diseases.len() {
            return Err(DataError::InconsistentTable(format!(
                "{} priors for {} diseases",
                priors.len(),
                diseases.len()
            )));
        }
        if conditionals.dim() != (diseases.len(), symptoms.len()) {
            return Err(DataError::InconsistentTable(format!(
                "conditional matrix has shape {:?}, expected ({}, {})",
                conditionals.dim(),
                diseases.len(),
                symptoms.len()
            )));
        }
        if priors.iter().any(|&p| !p.is_finite() || p < 0.0) {
            return Err(DataError::InconsistentTable(
                "priors must be finite and non-negative".to_string(),
            ));
        }
        let total: f64 = priors.sum();
        if (total - 1.0).abs() > PRIOR_SUM_TOLERANCE {
            return Err(DataError::InconsistentTable(format!(
                "priors sum to {total}, expected 1"
            )));
        }
        if conditionals.iter().any(|&c| !(c > 0.0 && c < 1.0)) {
            return Err(DataError::InconsistentTable(
                "every conditional must lie strictly between 0 and 1".to_string(),
            ));
        }

        let disease_index = index_of(&diseases);
        let symptom_index = index_of(&symptoms);
        if disease_index.len() != diseases.len() || symptom_index.len() != symptoms.len() {
            return Err(DataError::InconsistentTable(
                "disease and symptom names must be unique".to_string(),
            ));
        }

        Ok(Self {
            diseases,
            symptoms,
            disease_index,
            symptom_index,
            priors,
            conditionals,
            smoothing: 0.0,
            policy: UnknownEntityPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: UnknownEntityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &UnknownEntityPolicy {
        &self.policy
    }

    pub fn diseases(&self) -> &[String] {
        &self.diseases
    }

    pub fn symptoms(&self) -> &[String] {
        &self.symptoms
    }

    pub fn num_diseases(&self) -> usize {
        self.diseases.len()
    }

    pub fn num_symptoms(&self) -> usize {
        self.symptoms.len()
    }

    /// Smoothing constant used at construction; 0 for tables assembled from parts.
    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }

    pub fn disease_index(&self, disease: &str) -> Option<usize> {
        self.disease_index.get(disease).copied()
    }

    pub fn symptom_index(&self, symptom: &str) -> Option<usize> {
        self.symptom_index.get(symptom).copied()
    }

    pub fn is_disease(&self, name: &str) -> bool {
        self.disease_index.contains_key(name)
    }

    pub fn is_symptom(&self, name: &str) -> bool {
        self.symptom_index.contains_key(name)
    }

    /// P(disease). Unknown diseases get the uniform prior.
    pub fn prior(&self, disease: &str) -> f64 {
        match self.disease_index(disease) {
            Some(d) => self.priors[d],
            None => self.policy.prior(self.diseases.len()),
        }
    }

    /// P(symptom=1 | disease). Unknown pairs get the policy fallback.
    pub fn conditional(&self, disease: &str, symptom: &str) -> f64 {
        match (self.disease_index(disease), self.symptom_index(symptom)) {
            (Some(d), Some(s)) => self.conditionals[[d, s]],
            _ => self.policy.conditional(),
        }
    }

    pub fn priors(&self) -> ArrayView1<'_, f64> {
        self.priors.view()
    }

    pub fn conditionals(&self) -> ArrayView2<'_, f64> {
        self.conditionals.view()
    }

    /// P(symptom=1 | d) for every disease, in disease order.
    pub fn symptom_column(&self, symptom_idx: usize) -> ArrayView1<'_, f64> {
        self.conditionals.column(symptom_idx)
    }

    /// Like `symptom_column`, but by name; unknown symptoms yield the fallback for every disease.
    pub fn likelihood_of_presence(&self, symptom: &str) -> Array1<f64> {
        match self.symptom_index(symptom) {
            Some(s) => self.conditionals.column(s).to_owned(),
            None => Array1::from_elem(self.diseases.len(), self.policy.conditional()),
        }
    }
}

fn index_of(names: &[String]) -> AHashMap<String, usize> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}
