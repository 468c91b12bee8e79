use pagepilot_core::{Config, Paths, ToolDescriptor};
use pagepilot_tools::{browser_actions, ProtocolClient};
use std::collections::BTreeMap;

fn print_tool(tool: &ToolDescriptor) {
    let short_desc: String = tool.description.chars().take(60).collect();
    let ellipsis = if tool.description.chars().count() > 60 { "..." } else { "" };
    println!("     {:<32} {}{}", tool.name, short_desc, ellipsis);
}

/// Discover tools concurrently and print them grouped by server.
pub async fn list(server: Option<String>) -> anyhow::Result<()> {
    let config = Config::load_or_default(&Paths::new())?;
    let client = ProtocolClient::new(&config.mcp)?;

    let tools = match &server {
        Some(id) => {
            let Some(server) = config.get_server(id) else {
                anyhow::bail!("No MCP server with id '{}' in config", id);
            };
            client.discover_server_tools(server).await?
        }
        None => client.discover_all_tools().await,
    };
    client.close_all().await;

    println!();
    if server.is_none() {
        let native = browser_actions();
        println!("  📂 browser ({})", native.len());
        for tool in &native {
            print_tool(tool);
        }
        println!();
    }

    let mut by_server: BTreeMap<&str, Vec<&ToolDescriptor>> = BTreeMap::new();
    for tool in &tools {
        let server_id = tool
            .mcp_metadata
            .as_ref()
            .map(|m| m.server_id.as_str())
            .unwrap_or("unknown");
        by_server.entry(server_id).or_default().push(tool);
    }

    if by_server.is_empty() {
        println!("  No MCP tools discovered.");
    }
    for (server_id, tools) in &by_server {
        println!("  📂 {} ({})", server_id, tools.len());
        for tool in tools {
            print_tool(tool);
        }
        println!();
    }
    Ok(())
}

/// Invoke one MCP tool and print the normalized result.
pub async fn call(name: &str, params: &str) -> anyhow::Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(params).map_err(|e| anyhow::anyhow!("Invalid JSON params: {}", e))?;
    let config = Config::load_or_default(&Paths::new())?;
    let client = ProtocolClient::new(&config.mcp)?;

    let result = client.invoke_tool(name, args).await;
    client.close_all().await;

    if result.success {
        println!("✓ {}", result.message);
    } else {
        println!("✗ {}", result.message);
    }
    if let Some(data) = &result.data {
        println!();
        println!("{}", serde_json::to_string_pretty(data)?);
    }
    if !result.success {
        tracing::warn!(tool = %name, error = %result.error_text(), "MCP tool call failed");
        anyhow::bail!("tool call failed");
    }
    Ok(())
}
