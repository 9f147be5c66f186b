use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dutch geodata lookups and RD/WGS84 conversion")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the geonl tools over MCP on stdin/stdout.
    Mcp {
        /// Tracing filter, e.g. "debug" or "geonl_lib=trace" (default: RUST_LOG or info).
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Convert a point between RD (EPSG:28992) and WGS84.
    Convert(commands::convert::ConvertArgs),
    /// Free-text location search against the PDOK Locatieserver.
    Search(commands::search::SearchArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Mcp { log_level } => commands::mcp::run(log_level.as_deref()),
        Command::Convert(args) => commands::convert::run(&args),
        Command::Search(args) => commands::search::run(&args),
    }
}
