// Module exports for CLI subcommands
//
// Each module handles one subcommand; main.rs only parses and dispatches.

pub mod convert;
pub mod mcp;
pub mod search;
