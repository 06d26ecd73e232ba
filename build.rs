use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are checked.
const SOURCE_DIRS: [&str; 4] = ["engine", "cli", "tests", "benches"];

const CHANGE_MARKERS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Policy {
    UnderscoreBinding,
    ChangeMarker,
    DoubleStar,
    ShoutingComment,
    AllowDeadCode,
}

impl Policy {
    fn pattern(self) -> String {
        match self {
            Policy::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Policy::ChangeMarker => format!(r"(//|/\*).*(?:{})", CHANGE_MARKERS.join("|")),
            Policy::DoubleStar => r"(//|/\*).*\*\*".to_string(),
            Policy::ShoutingComment => r"(//|/\*).*".to_string(),
            Policy::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn explanation(self) -> &'static str {
        match self {
            Policy::UnderscoreBinding => {
                "Underscore-prefixed names are not allowed. Use the value or remove it."
            }
            Policy::ChangeMarker => {
                "Comments must not narrate edits (FIX, NEW, CHANGED, UPDATE and similar). Remove them."
            }
            Policy::DoubleStar => "'**' is only allowed in doc comments.",
            Policy::ShoutingComment => {
                "Comments whose letters are all uppercase are not allowed. Consider deleting the comment."
            }
            Policy::AllowDeadCode => {
                "#[allow(dead_code)] is not allowed. Use the code or remove it."
            }
        }
    }
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim_start_matches(['/', '!']).trim());
    }
    let start = line.find("/*")? + 2;
    let body = &line[start..];
    Some(match body.find("*/") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    })
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// Text between double quotes on a single line.
fn quoted_segments(line: &str) -> impl Iterator<Item = &str> {
    line.split('"').skip(1).step_by(2)
}

struct PolicyCollector {
    policy: Policy,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl PolicyCollector {
    fn new(policy: Policy, file_path: &Path) -> Self {
        Self {
            policy,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn is_violation(&self, line: &str) -> bool {
        match self.policy {
            Policy::UnderscoreBinding => {
                let in_comment = line.trim_start().starts_with("//") || line.contains("/*");
                let in_string = quoted_segments(line).any(|s| s.contains('_'));
                !in_comment && !in_string
            }
            Policy::ChangeMarker | Policy::AllowDeadCode => true,
            Policy::DoubleStar => !is_doc_comment(line),
            Policy::ShoutingComment => comment_text(line).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
        }
    }

    fn into_error(self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: {} source policy violations in {}:\n",
            self.violations.len(),
            self.file_path.display()
        );
        for violation in &self.violations {
            message.push_str(&format!("   {violation}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.policy.explanation()));
        Some(message)
    }
}

impl Sink for PolicyCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn source_files() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn enforce(policy: Policy, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&policy.pattern())?;
    let mut searcher = Searcher::new();
    for path in files {
        let mut collector = PolicyCollector::new(policy, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(message) = collector.into_error() {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let files = source_files();
    let policies = [
        Policy::UnderscoreBinding,
        Policy::ChangeMarker,
        Policy::DoubleStar,
        Policy::ShoutingComment,
        Policy::AllowDeadCode,
    ];
    for policy in policies {
        if let Err(e) = enforce(policy, &files) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
