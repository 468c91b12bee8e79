use pagepilot_core::{Error, Paths, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// One JSON snapshot per run under `runs/`.
pub struct RunStore {
    paths: Paths,
}

impl RunStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn save<T: Serialize>(&self, run_id: &str, snapshot: &T) -> Result<()> {
        let path = self.paths.run_file(run_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename; readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(run_id, path = %path.display(), "Saved run snapshot");
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, run_id: &str) -> Result<Option<T>> {
        let path = self.paths.run_file(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let snapshot = serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("corrupt snapshot {}: {}", path.display(), e)))?;
        Ok(Some(snapshot))
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.paths.runs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    runs.push(stem.to_string());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    pub fn delete(&self, run_id: &str) -> Result<bool> {
        let path = self.paths.run_file(run_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}
