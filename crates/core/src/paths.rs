use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".pagepilot"))
            .unwrap_or_else(|| PathBuf::from(".pagepilot"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Append-only per-run journals (full, untrimmed history).
    pub fn journal_dir(&self) -> PathBuf {
        self.base.join("journal")
    }

    pub fn journal_file(&self, run_id: &str) -> PathBuf {
        self.journal_dir().join(format!("{}.jsonl", safe_key(run_id)))
    }

    /// Scratchpad snapshots, one JSON document per run.
    pub fn runs_dir(&self) -> PathBuf {
        self.base.join("runs")
    }

    pub fn run_file(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{}.json", safe_key(run_id)))
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.journal_dir())?;
        std::fs::create_dir_all(self.runs_dir())?;
        Ok(())
    }
}

fn safe_key(key: &str) -> String {
    key.replace([':', '/', '\\'], "_")
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
