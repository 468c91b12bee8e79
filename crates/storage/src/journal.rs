use chrono::Utc;
use pagepilot_core::{Paths, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

#[derive(Debug, Serialize, Deserialize)]
struct JournalHeader {
    #[serde(rename = "_type")]
    kind: String,
    run_id: String,
    created_at: String,
}

/// Append-only JSONL log of one run. The first line is a metadata header;
/// every following line is one record.
#[derive(Debug, Clone)]
pub struct RunJournal {
    run_id: String,
    path: PathBuf,
}

impl RunJournal {
    pub fn new(paths: &Paths, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            path: paths.journal_file(run_id),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !self.path.exists() {
            let mut file = File::create(&self.path)?;
            let header = JournalHeader {
                kind: "metadata".to_string(),
                run_id: self.run_id.clone(),
                created_at: Utc::now().to_rfc3339(),
            };
            writeln!(file, "{}", serde_json::to_string(&header)?)?;
            debug!(run_id = %self.run_id, path = %self.path.display(), "Created run journal");
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Read every record back in append order. Lines that fail to parse are
    /// logged and skipped.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, line = %line, "Failed to parse journal line");
                    continue;
                }
            };
            if value.get("_type").and_then(|v| v.as_str()) == Some("metadata") {
                continue;
            }
            match serde_json::from_value::<T>(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(error = %e, line = %line, "Failed to decode journal record");
                }
            }
        }

        Ok(records)
    }

    /// Run ids that have a journal on disk, sorted.
    pub fn list_runs(paths: &Paths) -> Result<Vec<String>> {
        let dir = paths.journal_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    runs.push(stem.to_string());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        step: u32,
        content: String,
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let journal = RunJournal::new(&paths, "run-1");

        for step in 0..3 {
            journal
                .append(&Rec { step, content: format!("entry {}", step) })
                .unwrap();
        }

        let records: Vec<Rec> = journal.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], Rec { step: 2, content: "entry 2".into() });
        assert_eq!(RunJournal::list_runs(&paths).unwrap(), vec!["run-1".to_string()]);
    }

    #[test]
    fn test_bad_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let journal = RunJournal::new(&paths, "run-2");
        journal.append(&json!({"step": 0, "content": "goal"})).unwrap();

        let mut file = OpenOptions::new().append(true).open(journal.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file, "{{\"unrelated\": true}}").unwrap();
        drop(file);
        journal.append(&json!({"step": 1, "content": "obs"})).unwrap();

        let records: Vec<Rec> = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].content, "obs");
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let journal = RunJournal::new(&paths, "nope");
        let records: Vec<Rec> = journal.read_all().unwrap();
        assert!(records.is_empty());
        assert!(!journal.exists());
    }
}
