use pagepilot_core::{Config, Paths};
use pagepilot_storage::{RunJournal, RunStore};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("pagepilot status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found, using defaults)" }
    );

    let config = Config::load_or_default(&paths)?;
    println!(
        "Agent:     maxSteps={} settleDelayMs={} maxScratchpadEntries={}",
        config.agent.max_steps, config.agent.settle_delay_ms, config.agent.max_scratchpad_entries
    );
    println!(
        "Retry:     blocker recovery {} (pause {}ms)",
        if config.retry.enable_blocker_recovery { "on" } else { "off" },
        config.retry.recovery_pause_ms
    );
    println!();

    let enabled = config.mcp.enabled_servers().count();
    println!("MCP servers: {} configured, {} enabled", config.mcp.servers.len(), enabled);
    for server in &config.mcp.servers {
        println!(
            "  {:<16} {:<10} {}",
            server.id,
            server.transport.name(),
            if server.enabled { "✓ enabled" } else { "✗ disabled" }
        );
    }
    println!();

    let saved = RunStore::new(paths.clone()).list()?.len();
    let journals = RunJournal::list_runs(&paths)?.len();
    println!("Runs:      {} saved, {} journals", saved, journals);

    if !config_exists {
        println!();
        println!("Run `pagepilot config init` to create a config file.");
    }
    Ok(())
}
