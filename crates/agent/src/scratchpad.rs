//! Structured working memory for one run.
//!
//! Entries are append-only. When the entry count exceeds the cap, the window
//! is trimmed to the goal entry plus the most recent `max - 1` entries. With a
//! [`RunJournal`] attached, every entry is mirrored to disk as it is appended,
//! so the full history survives trimming.

use chrono::{DateTime, Utc};
use pagepilot_core::{ActionResult, Error, Result};
use pagepilot_storage::RunJournal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

pub const DEFAULT_MAX_ENTRIES: usize = 60;
pub const DEFAULT_OBSERVATION_CLIP: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Goal,
    Observation,
    Thought,
    Action,
    Result,
    Error,
}

impl EntryKind {
    fn label(&self) -> &'static str {
        match self {
            EntryKind::Goal => "Goal",
            EntryKind::Observation => "Observation",
            EntryKind::Thought => "Thought",
            EntryKind::Action => "Action",
            EntryKind::Result => "Result",
            EntryKind::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    GoalAchieved,
    Failed,
    UserCancelled,
    MaxStepsReached,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::GoalAchieved => "goal_achieved",
            CompletionReason::Failed => "failed",
            CompletionReason::UserCancelled => "user_cancelled",
            CompletionReason::MaxStepsReached => "max_steps_reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
    pub step: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadStats {
    pub total_entries: usize,
    pub steps: u32,
    pub actions: usize,
    pub successes: usize,
    pub failures: usize,
    pub errors: usize,
    pub elapsed_ms: i64,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_observation_clip() -> usize {
    DEFAULT_OBSERVATION_CLIP
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scratchpad {
    goal: String,
    entries: Vec<ScratchpadEntry>,
    current_step: u32,
    is_complete: bool,
    final_answer: Option<String>,
    completion_reason: Option<CompletionReason>,
    start_time: DateTime<Utc>,
    #[serde(skip, default = "default_max_entries")]
    max_entries: usize,
    #[serde(skip, default = "default_observation_clip")]
    observation_clip: usize,
    #[serde(skip)]
    journal: Option<RunJournal>,
}

impl Scratchpad {
    pub fn new(goal: &str, max_entries: usize) -> Self {
        let start_time = Utc::now();
        Self {
            goal: goal.to_string(),
            entries: vec![ScratchpadEntry {
                kind: EntryKind::Goal,
                content: goal.to_string(),
                step: 0,
                timestamp: start_time,
                metadata: None,
            }],
            current_step: 0,
            is_complete: false,
            final_answer: None,
            completion_reason: None,
            start_time,
            max_entries: max_entries.max(2),
            observation_clip: DEFAULT_OBSERVATION_CLIP,
            journal: None,
        }
    }

    /// Observations longer than `chars` are clipped in [`format_for_llm`](Self::format_for_llm).
    pub fn with_observation_clip(mut self, chars: usize) -> Self {
        self.observation_clip = chars;
        self
    }

    /// Mirror every entry, including those already present, into `journal`.
    pub fn attach_journal(&mut self, journal: RunJournal) {
        for entry in &self.entries {
            if let Err(e) = journal.append(entry) {
                warn!(run_id = %journal.run_id(), error = %e, "Failed to write scratchpad journal");
            }
        }
        self.journal = Some(journal);
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn entries(&self) -> &[ScratchpadEntry] {
        &self.entries
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.completion_reason
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn push(&mut self, kind: EntryKind, content: String, metadata: Option<Value>) {
        let entry = ScratchpadEntry {
            kind,
            content,
            step: self.current_step,
            timestamp: Utc::now(),
            metadata,
        };
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&entry) {
                warn!(run_id = %journal.run_id(), error = %e, "Failed to write scratchpad journal");
            }
        }
        self.entries.push(entry);
        self.trim();
    }

    fn trim(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let excess = self.entries.len() - self.max_entries;
        // entries[0] is the goal
        self.entries.drain(1..=excess);
    }

    pub fn add_observation(&mut self, content: impl Into<String>) {
        self.push(EntryKind::Observation, content.into(), None);
    }

    pub fn add_thought(&mut self, content: impl Into<String>) {
        self.push(EntryKind::Thought, content.into(), None);
    }

    pub fn add_action(&mut self, name: &str, params: &Value) {
        let content = if params.as_object().map(|o| o.is_empty()).unwrap_or(params.is_null()) {
            name.to_string()
        } else {
            format!("{} {}", name, params)
        };
        self.push(
            EntryKind::Action,
            content,
            Some(json!({ "name": name, "params": params })),
        );
    }

    pub fn add_result(&mut self, result: &ActionResult) {
        let mut metadata = json!({ "success": result.success });
        if let Some(data) = &result.data {
            metadata["data"] = data.clone();
        }
        if let Some(error) = &result.error {
            metadata["error"] = Value::String(error.clone());
        }
        self.push(EntryKind::Result, result.message.clone(), Some(metadata));
    }

    pub fn add_error(&mut self, content: impl Into<String>) {
        self.push(EntryKind::Error, content.into(), None);
    }

    /// Advance to the next step. Has no effect once the run is complete.
    pub fn next_step(&mut self) -> u32 {
        if !self.is_complete {
            self.current_step += 1;
        }
        self.current_step
    }

    /// Mark the run finished. The first completion wins.
    pub fn complete(&mut self, answer: Option<String>, reason: CompletionReason) {
        if self.is_complete {
            return;
        }
        self.is_complete = true;
        self.final_answer = answer;
        self.completion_reason = Some(reason);
    }

    pub fn stats(&self) -> ScratchpadStats {
        let mut stats = ScratchpadStats {
            total_entries: self.entries.len(),
            steps: self.current_step,
            elapsed_ms: (Utc::now() - self.start_time).num_milliseconds(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.kind {
                EntryKind::Action => stats.actions += 1,
                EntryKind::Result => {
                    let ok = entry
                        .metadata
                        .as_ref()
                        .and_then(|m| m.get("success"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    if ok {
                        stats.successes += 1;
                    } else {
                        stats.failures += 1;
                    }
                }
                EntryKind::Error => stats.errors += 1,
                _ => {}
            }
        }
        stats
    }

    /// History grouped by step, followed by a progress footer.
    pub fn format_for_llm(&self) -> String {
        let mut out = format!("Goal: {}\n", self.goal);
        let mut current: Option<u32> = None;

        for entry in self.entries.iter().skip(1) {
            if current != Some(entry.step) {
                current = Some(entry.step);
                if entry.step == 0 {
                    out.push_str("\nInitial state:\n");
                } else {
                    out.push_str(&format!("\nStep {}:\n", entry.step));
                }
            }
            let body = match entry.kind {
                EntryKind::Observation => clip(&entry.content, self.observation_clip),
                EntryKind::Result => {
                    let ok = entry
                        .metadata
                        .as_ref()
                        .and_then(|m| m.get("success"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    format!("{} {}", if ok { "✓" } else { "✗" }, entry.content)
                }
                _ => entry.content.clone(),
            };
            out.push_str(&format!("  {}: {}\n", entry.kind.label(), body));
        }

        let stats = self.stats();
        out.push_str(&format!(
            "\nProgress: {} actions ({} succeeded, {} failed), {} errors, {:.1}s elapsed\n",
            stats.actions,
            stats.successes,
            stats.failures,
            stats.errors,
            stats.elapsed_ms as f64 / 1000.0
        ));
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let pad: Scratchpad = serde_json::from_str(raw)?;
        match pad.entries.first() {
            Some(first) if first.kind == EntryKind::Goal => Ok(pad),
            _ => Err(Error::Validation("scratchpad must start with its goal entry".to_string())),
        }
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{}…", clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagepilot_core::Paths;
    use tempfile::TempDir;

    #[test]
    fn test_goal_first_and_steps_monotonic() {
        let mut pad = Scratchpad::new("find the docs", 60);
        pad.add_observation("page loaded");
        pad.next_step();
        pad.add_thought("click docs");
        pad.add_action("click", &json!({"text": "Docs"}));
        pad.add_result(&ActionResult::ok("clicked"));
        pad.next_step();
        pad.add_error("boom");

        assert_eq!(pad.entries()[0].kind, EntryKind::Goal);
        let steps: Vec<u32> = pad.entries().iter().map(|e| e.step).collect();
        assert!(steps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(pad.current_step(), 2);
    }

    #[test]
    fn test_trim_keeps_goal_and_latest() {
        let mut pad = Scratchpad::new("goal", 5);
        for i in 0..10 {
            pad.add_observation(format!("obs {}", i));
        }
        assert_eq!(pad.entries().len(), 5);
        assert_eq!(pad.entries()[0].kind, EntryKind::Goal);
        assert_eq!(pad.entries()[1].content, "obs 6");
        assert_eq!(pad.entries().last().unwrap().content, "obs 9");
    }

    #[test]
    fn test_complete_stops_steps_and_first_wins() {
        let mut pad = Scratchpad::new("goal", 10);
        pad.next_step();
        pad.complete(Some("done".into()), CompletionReason::GoalAchieved);
        pad.complete(None, CompletionReason::Failed);
        assert_eq!(pad.next_step(), 1);
        assert_eq!(pad.final_answer(), Some("done"));
        assert_eq!(pad.completion_reason(), Some(CompletionReason::GoalAchieved));
    }

    #[test]
    fn test_stats_and_format() {
        let mut pad = Scratchpad::new("buy milk", 60).with_observation_clip(10);
        pad.add_observation("a very long observation text");
        pad.next_step();
        pad.add_action("click", &json!({"selector": "#buy"}));
        pad.add_result(&ActionResult::failure("Element not found"));
        pad.next_step();
        pad.add_action("go_back", &json!({}));
        pad.add_result(&ActionResult::ok("went back"));

        let stats = pad.stats();
        assert_eq!(stats.actions, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);

        let text = pad.format_for_llm();
        assert!(text.starts_with("Goal: buy milk\n"));
        assert!(text.contains("Initial state:\n  Observation: a very lon…\n"));
        assert!(text.contains("Step 1:\n  Action: click {\"selector\":\"#buy\"}\n  Result: ✗ Element not found\n"));
        assert!(text.contains("Step 2:\n  Action: go_back\n  Result: ✓ went back\n"));
        assert!(text.contains("Progress: 2 actions (1 succeeded, 1 failed), 0 errors"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut pad = Scratchpad::new("goal", 60);
        pad.add_observation("obs");
        pad.next_step();
        pad.complete(Some("answer".into()), CompletionReason::MaxStepsReached);

        let raw = pad.to_json().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["currentStep"], 1);
        assert_eq!(value["isComplete"], true);
        assert_eq!(value["completionReason"], "max_steps_reached");
        assert_eq!(value["entries"][0]["type"], "goal");
        assert!(value.get("journal").is_none());

        let back = Scratchpad::from_json(&raw).unwrap();
        assert_eq!(back.entries(), pad.entries());
        assert_eq!(back.final_answer(), Some("answer"));

        let broken = raw.replacen("\"type\": \"goal\"", "\"type\": \"thought\"", 1);
        assert!(Scratchpad::from_json(&broken).is_err());
    }

    #[test]
    fn test_journal_keeps_trimmed_entries() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let mut pad = Scratchpad::new("goal", 3);
        pad.attach_journal(RunJournal::new(&paths, "run-x"));
        for i in 0..6 {
            pad.add_thought(format!("t{}", i));
        }
        assert_eq!(pad.entries().len(), 3);

        let all: Vec<ScratchpadEntry> = RunJournal::new(&paths, "run-x").read_all().unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[0].kind, EntryKind::Goal);
        assert_eq!(all[6].content, "t5");
    }
}
