#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use std::collections::HashMap;
use std::error::Error;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use diagnoser::belief::{BeliefState, RankedDisease, Response};
use diagnoser::config::{DiagnoserConfig, register_rules};
use diagnoser::constraints::{ConsistencyReport, ConstraintChecker};
use diagnoser::data::{LabeledData, load_dataset};
use diagnoser::record::{JsonSessionSink, SessionSink};
use diagnoser::selector::{AskedSet, QuestionSelector};
use diagnoser::session::{Question, RejectionPolicy, Responder, Session};
use diagnoser::simulate::{
    CaseResult, SimulationOptions, SimulationProgress, simulate, write_cases_csv,
};
use diagnoser::table::ProbabilityTable;

/// Options shared by every subcommand that needs the case table.
#[derive(Args)]
pub struct DataArgs {
    /// Path to the case table (header row, one label column, 0/1 symptom columns)
    #[arg(value_name = "DATASET")]
    pub dataset: PathBuf,

    /// TOML configuration with dataset options, session limits and rules
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Name of the label column (overrides the configuration)
    #[arg(long)]
    pub label_column: Option<String>,

    /// Additive smoothing constant (overrides the configuration)
    #[arg(long)]
    pub smoothing: Option<f64>,
}

/// Session limits that can override the configuration.
#[derive(Args)]
pub struct SessionArgs {
    /// Stop once the leading disease reaches this probability
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Maximum number of questions
    #[arg(long)]
    pub max_questions: Option<usize>,

    /// Number of diseases to display
    #[arg(long)]
    pub top_k: Option<usize>,
}

#[derive(Args)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Pre-parsed observation applied before questioning, e.g. `--observe itching=1`
    #[arg(long, value_name = "SYMPTOM=FLAG")]
    pub observe: Vec<String>,

    /// Directory for the JSON session record (not written if omitted)
    #[arg(long)]
    pub sessions_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Number of cases to sample
    #[arg(long, default_value = "100")]
    pub samples: usize,

    /// Seed for case sampling
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Write per-case results to this CSV file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RulesArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Print the rules as JSON instead of one per line
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// How many priors and opening questions to list
    #[arg(long, default_value = "10")]
    pub top: usize,
}

#[derive(Parser)]
#[command(name = "diagnoser", version, about = "Sequential symptom-based diagnosis")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive diagnostic session
    Diagnose(DiagnoseArgs),
    /// Measure diagnostic accuracy against sampled dataset rows
    Simulate(SimulateArgs),
    /// Print the configured rules and check them for contradictions
    Rules(RulesArgs),
    /// Summarize the probability table built from a dataset
    Inspect(InspectArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Diagnose(args)) => run_diagnose(args),
        Some(Commands::Simulate(args)) => run_simulate(args),
        Some(Commands::Rules(args)) => run_rules(args),
        Some(Commands::Inspect(args)) => run_inspect(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Everything built from the dataset and configuration.
struct Context {
    config: DiagnoserConfig,
    data: LabeledData,
    table: Arc<ProbabilityTable>,
    checker: ConstraintChecker,
}

fn load_context(args: &DataArgs, session: Option<&SessionArgs>) -> Result<Context, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => DiagnoserConfig::load(path)?,
        None => DiagnoserConfig::default(),
    };
    if let Some(label) = &args.label_column {
        config.dataset.label_column = label.clone();
    }
    if let Some(smoothing) = args.smoothing {
        config.dataset.smoothing = smoothing;
    }
    if let Some(session) = session {
        if let Some(threshold) = session.threshold {
            config.session.confidence_threshold = threshold;
        }
        if let Some(max_questions) = session.max_questions {
            config.session.max_questions = max_questions;
        }
        if let Some(top_k) = session.top_k {
            config.session.top_k = top_k;
        }
    }
    config.validate()?;

    let dataset = load_dataset(&args.dataset, config.dataset.separator_byte()?)?;
    let data = dataset.labeled(&config.dataset.label_column)?;
    let table = ProbabilityTable::from_labeled(&data, config.dataset.smoothing)?;
    let table = Arc::new(table);

    let mut checker = ConstraintChecker::new(&table);
    register_rules(&mut checker, &config.rules)?;

    Ok(Context {
        config,
        data,
        table,
        checker,
    })
}

fn print_ranking(ranking: &[RankedDisease]) {
    for (rank, entry) in ranking.iter().enumerate() {
        let position = rank + 1;
        println!("  {position}. {} ({:.4})", entry.disease, entry.probability);
    }
}

/// Parses `symptom=flag` pairs where flag is 1, 0 or -1.
fn parse_observations(pairs: &[String]) -> Result<HashMap<String, Response>, Box<dyn Error>> {
    pairs
        .iter()
        .map(|pair| -> Result<(String, Response), Box<dyn Error>> {
            let (symptom, flag) = pair
                .split_once('=')
                .ok_or_else(|| format!("Observation '{pair}' is not of the form symptom=flag"))?;
            let response = flag
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(Response::from_flag)
                .ok_or_else(|| format!("Observation '{pair}' must use 1, 0 or -1"))?;
            Ok((symptom.trim().to_string(), response))
        })
        .collect()
}

fn prompt(question: &Question) -> String {
    format!(
        "[{}/{}] Do you have {}? [IG={:.3}] (y/n/u, q to quit) ",
        question.step,
        question.budget,
        question.readable_symptom(),
        question.gain
    )
}

/// Asks questions on stdout and reads answers from stdin.
struct TerminalResponder<R: BufRead> {
    input: R,
    top_k: usize,
}

impl<R: BufRead> TerminalResponder<R> {
    fn read_answer(&mut self) -> io::Result<Option<Response>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before the session finished",
            ));
        }
        Ok(match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" | "1" => Some(Response::Present),
            "n" | "no" | "0" => Some(Response::Absent),
            "u" | "unknown" | "?" | "-1" => Some(Response::Unknown),
            "q" | "quit" => {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "session aborted by the user",
                ));
            }
            _ => None,
        })
    }
}

impl<R: BufRead> Responder for TerminalResponder<R> {
    fn respond(&mut self, question: &Question) -> io::Result<Response> {
        loop {
            print!("{}", prompt(question));
            io::stdout().flush()?;
            if let Some(response) = self.read_answer()? {
                return Ok(response);
            }
            println!("Please answer y, n or u.");
        }
    }

    fn on_rejected(&mut self, question: &Question, violations: &[String]) {
        println!(
            "That answer about {} contradicts earlier answers:",
            question.readable_symptom()
        );
        for violation in violations {
            println!("  {violation}");
        }
        println!("The answer was not recorded.");
    }

    fn on_accepted(&mut self, question: &Question, ranking: &[RankedDisease]) {
        log::debug!("Accepted answer for '{}'", question.symptom);
        println!("Current top {}:", self.top_k.min(ranking.len()));
        print_ranking(ranking);
    }
}

fn run_diagnose(args: DiagnoseArgs) -> Result<(), Box<dyn Error>> {
    let ctx = load_context(&args.data, Some(&args.session))?;
    let report = ctx.checker.check_consistency();
    for issue in &report.issues {
        println!("Warning: {issue}");
    }

    let config = ctx.config.session_config(RejectionPolicy::Retry);
    let top_k = config.top_k;
    let mut session = Session::new(ctx.table.clone(), ctx.checker, config);

    let observations = parse_observations(&args.observe)?;
    if !observations.is_empty() {
        for (symptom, violations) in session.observe(&observations) {
            println!("Ignored observation {symptom}: {}", violations.join("; "));
        }
        println!("After the initial observations:");
        print_ranking(&session.top_k());
    }

    let stdin = io::stdin();
    let mut responder = TerminalResponder {
        input: stdin.lock(),
        top_k,
    };
    let outcome = session.run(&mut responder)?;

    println!();
    println!(
        "Finished after {} questions: {}.",
        outcome.steps, outcome.stop
    );
    println!("Most likely diagnoses:");
    print_ranking(&outcome.top_k);

    if let Some(dir) = args.sessions_dir {
        let session_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)?
            .as_secs()
            .to_string();
        let mut sink = JsonSessionSink::new(dir)?;
        sink.persist(&session.record(session_id.as_str()))?;
        println!("Session saved to {}", sink.path_for(&session_id).display());
    }
    Ok(())
}

/// Renders simulation progress with an `indicatif` bar on stderr.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let draw_target = if io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        bar.set_message("simulated cases");
        Self { bar }
    }
}

impl SimulationProgress for BarProgress {
    fn on_start(&self, total_cases: usize) {
        self.bar.set_length(total_cases as u64);
    }

    fn on_case_finished(&self, result: &CaseResult) {
        self.bar.inc(1);
        if !result.top3_correct {
            log::debug!(
                "Row {} ({}) missed the top 3",
                result.row, result.true_label
            );
        }
    }

    fn on_finish(&self) {
        self.bar.finish_with_message("done");
    }
}

fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn Error>> {
    let ctx = load_context(&args.data, Some(&args.session))?;
    let options = SimulationOptions {
        samples: args.samples,
        seed: args.seed,
        session: ctx.config.session_config(RejectionPolicy::Skip),
    };

    let progress = BarProgress::new();
    let report = simulate(ctx.table, &ctx.checker, &ctx.data, &options, &progress)?;

    let summary = &report.summary;
    println!("Cases simulated: {}", summary.n);
    println!("Top-1 accuracy:  {:.4}", summary.top1_accuracy);
    println!("Top-3 accuracy:  {:.4}", summary.top3_accuracy);
    println!("Mean questions:  {:.2}", summary.mean_questions);

    if let Some(path) = args.output {
        write_cases_csv(&path, &report.cases)?;
        println!("Per-case results written to {}", path.display());
    }
    Ok(())
}

/// The registered rules as a JSON array tagged by relation.
fn rules_json(checker: &ConstraintChecker) -> serde_json::Result<String> {
    serde_json::to_string_pretty(checker.constraints())
}

fn print_rules(checker: &ConstraintChecker, report: &ConsistencyReport) {
    if checker.is_empty() {
        println!("No rules configured.");
        return;
    }
    println!("{} rules:", checker.len());
    for constraint in checker.constraints() {
        println!("  {constraint}");
    }
    if report.ok {
        println!("No contradictions found.");
    }
    for issue in &report.issues {
        println!("  {issue}");
    }
}

fn run_rules(args: RulesArgs) -> Result<(), Box<dyn Error>> {
    let ctx = load_context(&args.data, None)?;
    let report = ctx.checker.check_consistency();
    if args.json {
        println!("{}", rules_json(&ctx.checker)?);
    } else {
        print_rules(&ctx.checker, &report);
    }

    if report.ok {
        Ok(())
    } else {
        Err(format!("rule set has {} consistency issues", report.issues.len()).into())
    }
}

fn run_inspect(args: InspectArgs) -> Result<(), Box<dyn Error>> {
    let ctx = load_context(&args.data, None)?;
    let table = &ctx.table;
    println!(
        "{} cases, {} diseases, {} symptoms, smoothing {}",
        ctx.data.labels.len(),
        table.num_diseases(),
        table.num_symptoms(),
        table.smoothing()
    );

    let belief = BeliefState::new(table.clone());
    println!("Prior entropy: {:.4} bits", belief.entropy());
    println!("Most common diseases:");
    print_ranking(&belief.top_k(args.top));

    let selector = QuestionSelector::new(table.clone());
    let opening = selector.rank_candidates(&belief, &AskedSet::new(), args.top);
    println!(
        "Best opening questions: {}",
        opening
            .iter()
            .map(|c| format!("{} ({:.3} bits)", c.symptom, c.gain))
            .join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn observations_parse_flags() {
        let parsed =
            parse_observations(&["itching=1".to_string(), " cough = 0".to_string()]).unwrap();
        assert_eq!(parsed["itching"], Response::Present);
        assert_eq!(parsed["cough"], Response::Absent);
        assert!(parse_observations(&["itching".to_string()]).is_err());
        assert!(parse_observations(&["itching=2".to_string()]).is_err());
    }

    #[test]
    fn terminal_answers_are_read_until_valid() {
        let mut responder = TerminalResponder {
            input: io::Cursor::new("maybe\nY\n"),
            top_k: 5,
        };
        let question = Question {
            symptom: "skin_rash".to_string(),
            gain: 0.5,
            step: 1,
            budget: 20,
        };
        assert_eq!(responder.respond(&question).unwrap(), Response::Present);
        assert!(responder.respond(&question).is_err());
    }

    #[test]
    fn prompt_shows_information_gain() {
        let question = Question {
            symptom: "skin_rash".to_string(),
            gain: 0.4567,
            step: 2,
            budget: 20,
        };
        assert_eq!(
            prompt(&question),
            "[2/20] Do you have skin rash? [IG=0.457] (y/n/u, q to quit) "
        );
    }

    #[test]
    fn rules_serialize_tagged_by_relation() {
        let table = ProbabilityTable::from_parts(
            vec!["flu".into()],
            vec!["fever".into(), "cough".into()],
            array![1.0],
            array![[0.5, 0.5]],
        )
        .unwrap();
        let mut checker = ConstraintChecker::new(&table);
        checker.add_implication("fever", "cough").unwrap();
        checker.add_requirement("flu", "fever").unwrap();

        let json = rules_json(&checker).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["relation"], "implication");
        assert_eq!(value[0]["cause"], "fever");
        assert_eq!(value[0]["effect"], "cough");
        assert_eq!(value[1]["relation"], "disease_requires");
        assert_eq!(value[1]["disease"], "flu");
        assert_eq!(value[1]["symptom"], "fever");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
