//! Serializable session summaries and where they are written.

use crate::belief::RankedDisease;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    pub symptom: String,
    /// 1, 0, or -1 for unknown.
    pub response: i8,
}

/// Everything needed to audit one finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// Seconds since the Unix epoch at the time the record was taken.
    pub timestamp: u64,
    pub confidence_threshold: f64,
    /// Accepted answers.
    pub num_questions_asked: usize,
    /// Questions put to the responder, rejected ones included.
    pub steps: usize,
    pub answers: Vec<RecordedAnswer>,
    pub final_topk: Vec<RankedDisease>,
    pub priors: BTreeMap<String, f64>,
    /// Full posterior, most probable first.
    pub posteriors: Vec<RankedDisease>,
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to write session record: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize session record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination for finished session records.
pub trait SessionSink {
    type Error: std::error::Error;

    fn persist(&mut self, record: &SessionRecord) -> Result<(), Self::Error>;
}

/// Writes one pretty-printed `session_<id>.json` file per record.
#[derive(Debug, Clone)]
pub struct JsonSessionSink {
    dir: PathBuf,
}

impl JsonSessionSink {
    /// Creates the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("session_{session_id}.json"))
    }
}

impl SessionSink for JsonSessionSink {
    type Error = RecordError;

    fn persist(&mut self, record: &SessionRecord) -> Result<(), Self::Error> {
        let path = self.path_for(&record.session_id);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, record)?;
        log::info!("Session record written to '{}'", path.display());
        Ok(())
    }
}

/// Reads a record previously written by `JsonSessionSink`.
pub fn read_record(path: &Path) -> Result<SessionRecord, RecordError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}
