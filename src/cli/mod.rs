use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod init;
pub mod play;
pub mod plugins;
pub mod resolve;
pub mod schema;

use play::PlayArgs;
use plugins::PluginsArgs;
use resolve::ResolveArgs;
use schema::SchemaArgs;

use flowdeck::{
    apps::App,
    config::{ConfigManager, RuntimeConfig},
    logger::{LogConfig, init_tracing},
};

#[derive(Parser, Debug)]
#[command(
    name = "flowdeck",
    about = "Pluggable scenario player with hooks and template resolution",
    version = "0.2.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a fresh layout
    Init,

    /// List discovered plugins
    Plugins(PluginsArgs),

    /// Resolve `{{variable}}` placeholders against a context file
    Resolve(ResolveArgs),

    /// Step through a scenario interactively
    Play(PlayArgs),

    /// Emit JSON-Schema into `<root>/schemas`
    Schema(SchemaArgs),
}

#[derive(Clone)]
pub struct CliContext {
    pub root: PathBuf,
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(root: PathBuf, config_manager: ConfigManager) -> Self {
        Self {
            root,
            config_manager,
        }
    }

    /// Typed settings read from `<root>/config/.env`.
    pub async fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::load(&self.config_manager, &self.root).await
    }

    pub fn init_logging(&self, config: &RuntimeConfig) -> anyhow::Result<()> {
        init_tracing(&LogConfig::new(self.root.join("logs"), config.log_level.clone()))
    }

    /// Boots the runtime for a one-shot command: no hot reload.
    pub async fn bootstrap(&self) -> anyhow::Result<App> {
        let mut config = self.runtime_config().await;
        self.init_logging(&config)?;
        config.watch = false;
        App::bootstrap(config).await
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init => init::execute(context).await,
        Commands::Plugins(args) => plugins::execute(args, context).await,
        Commands::Resolve(args) => resolve::execute(args, context).await,
        Commands::Play(args) => play::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Plugins(PluginsArgs::default())
}
