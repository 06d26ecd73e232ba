use diagnoser::Response;
use diagnoser::config::{DiagnoserConfig, register_rules};
use diagnoser::constraints::ConstraintChecker;
use diagnoser::data::load_dataset;
use diagnoser::record::{JsonSessionSink, SessionSink, read_record};
use diagnoser::session::{RejectionPolicy, Session};
use diagnoser::simulate::{NoopSimulationProgress, SimulationOptions, simulate, write_cases_csv};
use diagnoser::table::ProbabilityTable;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

const CASES: &str = "\
diagnosis;itching;skin_rash;continuous_sneezing;high_fever;cough
Fungal infection;1;1;0;0;0
Fungal infection;1;1;0;0;0
Fungal infection;1;0;0;0;0
Allergy;0;0;1;0;0
Allergy;0;0;1;0;1
Common Cold;0;0;0;1;1
Common Cold;0;0;1;1;1
Common Cold;0;0;0;1;1
";

const CONFIG: &str = r#"
[dataset]
label_column = "diagnosis"
separator = ";"

[session]
confidence_threshold = 0.75
max_questions = 4
top_k = 3

[[rules]]
subject = "high_fever"
relation = "->"
object = "cough"

[[rules]]
subject = "itching"
relation = "xor"
object = "continuous_sneezing"

[[rules]]
subject = "Common Cold"
relation = "requires"
object = "high_fever"
"#;

#[test]
fn configured_pipeline_runs_end_to_end() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("cases.csv");
    let config_path = dir.path().join("diagnoser.toml");
    fs::write(&data_path, CASES).unwrap();
    fs::write(&config_path, CONFIG).unwrap();

    let config = DiagnoserConfig::load(&config_path).unwrap();
    let dataset = load_dataset(&data_path, config.dataset.separator_byte().unwrap()).unwrap();
    let data = dataset.labeled(&config.dataset.label_column).unwrap();
    let table = ProbabilityTable::from_labeled(&data, config.dataset.smoothing).unwrap();
    let table = Arc::new(table);

    let mut checker = ConstraintChecker::new(&table);
    register_rules(&mut checker, &config.rules).unwrap();
    assert_eq!(checker.len(), 3);
    assert!(checker.check_consistency().ok);

    let options = SimulationOptions {
        samples: 50,
        seed: 3,
        session: config.session_config(RejectionPolicy::Skip),
    };
    let report = simulate(
        table.clone(),
        &checker,
        &data,
        &options,
        &NoopSimulationProgress,
    )
    .unwrap();
    assert_eq!(report.summary.n, 8);
    assert!(report.summary.top3_accuracy >= report.summary.top1_accuracy);
    assert!(report.cases.iter().all(|c| c.questions_asked <= 4));

    let csv_path = dir.path().join("results.csv");
    write_cases_csv(&csv_path, &report.cases).unwrap();
    assert_eq!(fs::read_to_string(&csv_path).unwrap().lines().count(), 9);

    let mut session = Session::new(
        table,
        checker,
        config.session_config(RejectionPolicy::Retry),
    );
    let flags: HashMap<String, Response> = [
        ("high_fever".to_string(), Response::Present),
        ("cough".to_string(), Response::Absent),
    ]
    .into_iter()
    .collect();
    let rejected = session.observe(&flags);
    assert_eq!(rejected.len(), 1);
    // Unanswered effects read as 0, so the cause is refused.
    assert_eq!(rejected[0].0, "high_fever");
    assert_eq!(
        rejected[0].1,
        vec!["Violation: high_fever=1 requires cough=1"]
    );

    let mut sink = JsonSessionSink::new(dir.path().join("sessions")).unwrap();
    sink.persist(&session.record("42")).unwrap();
    let record = read_record(&sink.path_for("42")).unwrap();
    assert_eq!(record.num_questions_asked, 1);
    assert_eq!(record.answers[0].symptom, "cough");
    assert_eq!(record.answers[0].response, 0);
    assert_eq!(record.final_topk.len(), 3);
}
