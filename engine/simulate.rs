//! Batch accuracy simulation.
//!
//! Each sampled row of a labeled case table becomes one simulated patient: a
//! fresh `Session` asks its questions and an oracle answers them from the row.
//! Sessions share only the read-only table, so cases run in parallel.

use crate::belief::Response;
use crate::constraints::ConstraintChecker;
use crate::data::LabeledData;
use crate::session::{
    Question, RejectionPolicy, Responder, Session, SessionConfig, SessionError, StopReason,
};
use crate::table::ProbabilityTable;
use ahash::AHashMap;
use ndarray::ArrayView1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("No cases to simulate: the dataset is empty or zero samples were requested")]
    NoCases,
    #[error("Dataset symptom '{0}' is not part of the probability table")]
    UnknownSymptom(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Failed to write simulation results: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to write simulation results: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Upper bound on sampled rows.
    pub samples: usize,
    pub seed: u64,
    /// The rejection policy is forced to `Skip`.
    pub session: SessionConfig,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            samples: 100,
            seed: 0,
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    /// Row index in the case table.
    pub row: usize,
    pub true_label: String,
    pub top1: String,
    pub top1_probability: f64,
    pub top1_correct: bool,
    pub top3_correct: bool,
    pub questions_asked: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub n: usize,
    pub top1_accuracy: f64,
    pub top3_accuracy: f64,
    pub mean_questions: f64,
}

impl SimulationSummary {
    fn from_cases(cases: &[CaseResult]) -> Self {
        let n = cases.len();
        let fraction = |count: usize| count as f64 / n as f64;
        Self {
            n,
            top1_accuracy: fraction(cases.iter().filter(|c| c.top1_correct).count()),
            top3_accuracy: fraction(cases.iter().filter(|c| c.top3_correct).count()),
            mean_questions: fraction(cases.iter().map(|c| c.questions_asked).sum()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// In sampled order.
    pub cases: Vec<CaseResult>,
    pub summary: SimulationSummary,
}

/// Observer for reporting simulation progress. Called from worker threads.
pub trait SimulationProgress: Sync {
    fn on_start(&self, total_cases: usize) {
        let _ = total_cases;
    }
    fn on_case_finished(&self, result: &CaseResult) {
        let _ = result;
    }
    fn on_finish(&self) {}
}

#[derive(Default)]
pub struct NoopSimulationProgress;

impl SimulationProgress for NoopSimulationProgress {}

/// Answers every question from one known row.
struct OracleResponder<'a> {
    flags: ArrayView1<'a, u8>,
    columns: &'a AHashMap<String, usize>,
}

impl Responder for OracleResponder<'_> {
    fn respond(&mut self, question: &Question) -> io::Result<Response> {
        Ok(match self.columns.get(&question.symptom) {
            Some(&col) if self.flags[col] == 1 => Response::Present,
            Some(_) => Response::Absent,
            None => Response::Unknown,
        })
    }
}

/// Samples up to `options.samples` rows without replacement and diagnoses each
/// one with a fresh session.
pub fn simulate(
    table: Arc<ProbabilityTable>,
    checker: &ConstraintChecker,
    data: &LabeledData,
    options: &SimulationOptions,
    progress: &dyn SimulationProgress,
) -> Result<SimulationReport, SimulationError> {
    let available = data.labels.len();
    let amount = options.samples.min(available);
    if amount == 0 {
        return Err(SimulationError::NoCases);
    }
    if let Some(missing) = data.symptoms.iter().find(|s| !table.is_symptom(s)) {
        return Err(SimulationError::UnknownSymptom(missing.clone()));
    }

    let columns: AHashMap<String, usize> = data
        .symptoms
        .iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), i))
        .collect();

    let mut rng = StdRng::seed_from_u64(options.seed);
    let rows = index::sample(&mut rng, available, amount).into_vec();

    let config = SessionConfig {
        rejection: RejectionPolicy::Skip,
        ..options.session.clone()
    };

    log::info!(
        "Simulating {} of {} cases (seed {})",
        amount,
        available,
        options.seed
    );
    progress.on_start(amount);

    let cases = rows
        .par_iter()
        .map(|&row| -> Result<CaseResult, SimulationError> {
            let mut session = Session::new(table.clone(), checker.clone(), config.clone());
            let mut oracle = OracleResponder {
                flags: data.flags.row(row),
                columns: &columns,
            };
            let outcome = session.run(&mut oracle)?;

            let true_label = &data.labels[row];
            let top3 = session.belief().top_k(3);
            let (top1, top1_probability) = top3
                .first()
                .map(|t| (t.disease.clone(), t.probability))
                .unwrap_or_default();
            let result = CaseResult {
                row,
                true_label: true_label.clone(),
                top1_correct: &top1 == true_label,
                top3_correct: top3.iter().any(|t| &t.disease == true_label),
                top1,
                top1_probability,
                questions_asked: outcome.steps,
                stop: outcome.stop,
            };
            progress.on_case_finished(&result);
            Ok(result)
        })
        .collect::<Result<Vec<_>, SimulationError>>()?;

    progress.on_finish();
    let summary = SimulationSummary::from_cases(&cases);
    log::info!(
        "Simulation finished: top-1 {:.3}, top-3 {:.3}, {:.2} questions on average",
        summary.top1_accuracy,
        summary.top3_accuracy,
        summary.mean_questions
    );
    Ok(SimulationReport { cases, summary })
}

/// Writes one CSV row per case with a header.
pub fn write_cases_csv(path: &Path, cases: &[CaseResult]) -> Result<(), SimulationError> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for case in cases {
        writer.serialize(case)?;
    }
    writer.flush()?;
    log::info!(
        "Wrote {} simulated cases to '{}'",
        cases.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, Dataset};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn data() -> LabeledData {
        let columns = vec![
            "itching".to_string(),
            "cough".to_string(),
            "prognosis".to_string(),
        ];
        let mut rows = Vec::new();
        for _ in 0..4 {
            rows.push(vec![Cell::from(1u8), Cell::from(0u8), Cell::from("Allergy")]);
            rows.push(vec![Cell::from(0u8), Cell::from(1u8), Cell::from("Cold")]);
        }
        Dataset::new(columns, rows)
            .unwrap()
            .labeled("prognosis")
            .unwrap()
    }

    fn setup() -> (Arc<ProbabilityTable>, ConstraintChecker, LabeledData) {
        let data = data();
        let table = Arc::new(ProbabilityTable::from_labeled(&data, 1.0).unwrap());
        let checker = ConstraintChecker::new(&table);
        (table, checker, data)
    }

    #[derive(Default)]
    struct Counter {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SimulationProgress for Counter {
        fn on_start(&self, total_cases: usize) {
            self.started.store(total_cases, Ordering::SeqCst);
        }
        fn on_case_finished(&self, result: &CaseResult) {
            assert!(result.questions_asked >= 1);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn separable_cases_are_all_correct() {
        let (table, checker, data) = setup();
        let options = SimulationOptions {
            samples: 8,
            seed: 7,
            ..SimulationOptions::default()
        };
        let counter = Counter::default();
        let report = simulate(table, &checker, &data, &options, &counter).unwrap();

        assert_eq!(report.summary.n, 8);
        assert_eq!(report.summary.top1_accuracy, 1.0);
        assert_eq!(report.summary.top3_accuracy, 1.0);
        assert_eq!(counter.started.load(Ordering::SeqCst), 8);
        assert_eq!(counter.finished.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn sampling_is_seeded_and_without_replacement() {
        let (table, checker, data) = setup();
        let options = SimulationOptions {
            samples: 5,
            seed: 42,
            ..SimulationOptions::default()
        };
        let first = simulate(
            table.clone(),
            &checker,
            &data,
            &options,
            &NoopSimulationProgress,
        )
        .unwrap();
        let second = simulate(table, &checker, &data, &options, &NoopSimulationProgress).unwrap();
        let rows: Vec<usize> = first.cases.iter().map(|c| c.row).collect();
        assert_eq!(rows, second.cases.iter().map(|c| c.row).collect::<Vec<_>>());

        let mut unique = rows.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn sample_count_is_capped_by_dataset_size() {
        let (table, checker, data) = setup();
        let options = SimulationOptions {
            samples: 1000,
            ..SimulationOptions::default()
        };
        let report = simulate(table, &checker, &data, &options, &NoopSimulationProgress).unwrap();
        assert_eq!(report.cases.len(), 8);
    }

    #[test]
    fn zero_samples_is_an_error() {
        let (table, checker, data) = setup();
        let options = SimulationOptions {
            samples: 0,
            ..SimulationOptions::default()
        };
        let err = simulate(table, &checker, &data, &options, &NoopSimulationProgress).unwrap_err();
        assert!(matches!(err, SimulationError::NoCases));
    }

    #[test]
    fn rejected_answers_are_skipped_and_counted() {
        let (table, mut checker, data) = setup();
        // Every Allergy row has itching=1, which this rule rejects.
        checker.add_implication("itching", "cough").unwrap();
        let options = SimulationOptions {
            samples: 8,
            session: SessionConfig {
                confidence_threshold: 1.0,
                ..SessionConfig::default()
            },
            ..SimulationOptions::default()
        };
        let report = simulate(table, &checker, &data, &options, &NoopSimulationProgress).unwrap();
        for case in &report.cases {
            assert_eq!(case.questions_asked, 2);
            assert_eq!(case.stop, StopReason::NoQuestionsLeft);
        }
    }

    #[test]
    fn cases_are_written_as_csv() {
        let (table, checker, data) = setup();
        let options = SimulationOptions {
            samples: 3,
            ..SimulationOptions::default()
        };
        let report = simulate(table, &checker, &data, &options, &NoopSimulationProgress).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        write_cases_csv(&path, &report.cases).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("row,true_label,top1,top1_probability,top1_correct,top3_correct,questions_asked,stop")
        );
        assert_eq!(lines.count(), 3);
    }
}
