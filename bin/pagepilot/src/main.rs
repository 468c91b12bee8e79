mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagepilot")]
#[command(about = "Browser automation agent with MCP tool support", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration and MCP server status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Inspect configured MCP servers
    Servers {
        #[command(subcommand)]
        command: ServersCommands,
    },

    /// List or call tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },

    /// Inspect saved agent runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ServersCommands {
    /// List configured servers
    List,
    /// Handshake with a server and list its tools
    Test {
        /// Server id
        id: String,
    },
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// Discover tools on every enabled server
    List {
        /// Only this server
        #[arg(long)]
        server: Option<String>,
    },
    /// Call an MCP tool by its prefixed name
    Call {
        /// Tool name (e.g. mcp_fs1_write_file)
        name: String,
        /// JSON arguments (e.g. '{"path":"/tmp/a.txt"}')
        #[arg(default_value = "{}")]
        params: String,
    },
}

#[derive(Subcommand)]
enum RunsCommands {
    /// List saved runs
    List,
    /// Show a saved run's history and stats
    Show {
        /// Run id
        run_id: String,
    },
    /// Print a run's full journal
    Journal {
        /// Run id
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show().await?,
            ConfigCommands::Init { force } => commands::config_cmd::init(force).await?,
        },
        Commands::Servers { command } => match command {
            ServersCommands::List => commands::servers::list().await?,
            ServersCommands::Test { id } => commands::servers::test(&id).await?,
        },
        Commands::Tools { command } => match command {
            ToolsCommands::List { server } => commands::tools_cmd::list(server).await?,
            ToolsCommands::Call { name, params } => commands::tools_cmd::call(&name, &params).await?,
        },
        Commands::Runs { command } => match command {
            RunsCommands::List => commands::runs::list().await?,
            RunsCommands::Show { run_id } => commands::runs::show(&run_id).await?,
            RunsCommands::Journal { run_id } => commands::runs::journal(&run_id).await?,
        },
    }

    Ok(())
}
