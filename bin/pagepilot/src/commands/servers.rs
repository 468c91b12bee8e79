use pagepilot_core::{Config, Paths};
use pagepilot_tools::ProtocolClient;

pub async fn list() -> anyhow::Result<()> {
    let config = Config::load_or_default(&Paths::new())?;

    println!();
    println!("🔌 MCP servers ({} configured)", config.mcp.servers.len());
    println!();
    if config.mcp.servers.is_empty() {
        println!("  (none). Add entries under mcp.servers in the config file.");
        return Ok(());
    }

    for server in &config.mcp.servers {
        let status = if server.enabled { "✓" } else { "✗" };
        println!("  {} {:<16} {}", status, server.id, server.display_name());
        println!("      {} {}", server.transport.name(), server.url);
        if let Some(auth) = &server.auth {
            println!("      auth: {} header", auth.header_name);
        }
    }
    println!();
    Ok(())
}

pub async fn test(id: &str) -> anyhow::Result<()> {
    let config = Config::load_or_default(&Paths::new())?;
    if config.get_server(id).is_none() {
        anyhow::bail!("No MCP server with id '{}' in config", id);
    }

    let client = ProtocolClient::new(&config.mcp)?;
    println!("Testing MCP server '{}'...", id);
    let result = client.test_server(id).await;
    client.close_all().await;

    match result {
        Ok(probe) => {
            println!("✓ Connected via {} in {}ms", probe.transport.name(), probe.elapsed_ms);
            println!("  Endpoint: {}", probe.endpoint);
            if let Some(session) = &probe.session_id {
                println!("  Session:  {}", session);
            }
            println!("  Tools:    {}", probe.tool_count);
            Ok(())
        }
        Err(e) => {
            tracing::error!(server = %id, error = %e, "MCP connectivity test failed");
            println!("✗ {}", e);
            anyhow::bail!("server '{}' failed the connectivity test", id)
        }
    }
}
