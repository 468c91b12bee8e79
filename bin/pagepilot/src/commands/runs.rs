use pagepilot_agent::{Scratchpad, ScratchpadEntry};
use pagepilot_core::Paths;
use pagepilot_storage::{RunJournal, RunStore};

pub async fn list() -> anyhow::Result<()> {
    let paths = Paths::new();
    let store = RunStore::new(paths.clone());
    let runs = store.list()?;

    println!();
    println!("🗂  Saved runs ({})", runs.len());
    for run_id in &runs {
        match store.load::<Scratchpad>(run_id) {
            Ok(Some(pad)) => {
                let reason = pad.completion_reason().map(|r| r.as_str()).unwrap_or("in_progress");
                println!(
                    "  {}  {:<18} {} steps  {}",
                    run_id,
                    reason,
                    pad.current_step(),
                    pad.goal().chars().take(50).collect::<String>()
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Unreadable run snapshot");
                println!("  {}  ✗ {}", run_id, e);
            }
        }
    }
    println!();
    Ok(())
}

pub async fn show(run_id: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let Some(pad) = RunStore::new(paths).load::<Scratchpad>(run_id)? else {
        anyhow::bail!("No saved run '{}'", run_id);
    };

    println!();
    println!("{}", pad.format_for_llm());

    let stats = pad.stats();
    println!("Started:  {}", pad.start_time().to_rfc3339());
    println!(
        "Outcome:  {}",
        pad.completion_reason().map(|r| r.as_str()).unwrap_or("in_progress")
    );
    if let Some(answer) = pad.final_answer() {
        println!("Answer:   {}", answer);
    }
    println!(
        "Stats:    {} steps, {} entries, {} actions, {} errors",
        stats.steps, stats.total_entries, stats.actions, stats.errors
    );
    Ok(())
}

pub async fn journal(run_id: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let journal = RunJournal::new(&paths, run_id);
    if !journal.exists() {
        anyhow::bail!("No journal for run '{}'", run_id);
    }

    let entries: Vec<ScratchpadEntry> = journal.read_all()?;
    println!();
    println!("📜 Journal {} ({} entries)", run_id, entries.len());
    for entry in &entries {
        let kind = serde_json::to_value(entry.kind)?;
        println!(
            "  [{:>3}] {} {:<11} {}",
            entry.step,
            entry.timestamp.format("%H:%M:%S"),
            kind.as_str().unwrap_or(""),
            entry.content
        );
    }
    Ok(())
}
