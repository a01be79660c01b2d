use std::{env, path::PathBuf, process};

use clap::Parser;
use flowdeck::config::ConfigManager;

mod cli;

use cli::{Cli, CliContext, default_command, execute};

/// Resolve the flowdeck root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("FLOWDECK_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./flowdeck")
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();
    let env_file = root.join("config").join(".env");
    let context = CliContext::new(root, ConfigManager::env(env_file));

    let command = cli.command.unwrap_or_else(default_command);
    if let Err(e) = execute(&context, command).await {
        eprintln!("flowdeck: {e:#}");
        process::exit(1);
    }
    Ok(())
}
