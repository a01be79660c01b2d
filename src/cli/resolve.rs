use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use clap::Args;

use super::CliContext;
use flowdeck::flowdeck_plugin::{ContextItem, FlowContextHandler, ResolveOptions};

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Text containing `{{variable}}` placeholders
    pub text: String,

    /// JSON or YAML file holding a list of context items
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// User input as `key=value`, may be repeated
    #[arg(long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, String)>,

    /// Fail on unresolved placeholders instead of keeping them
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn read_items(path: &Path) -> anyhow::Result<Vec<ContextItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading context {}", path.display()))?;
    let items = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)?,
        Some("yaml" | "yml") => serde_yaml_bw::from_str(&raw)?,
        _ => bail!("unsupported context file {}", path.display()),
    };
    Ok(items)
}

pub async fn execute(args: ResolveArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = context.runtime_config().await;
    context.init_logging(&config)?;

    let items = match &args.context {
        Some(path) => read_items(path)?,
        None => Vec::new(),
    };
    let mut handler = FlowContextHandler::with_items(items);
    for (key, value) in args.inputs {
        handler.set_user_input(&key, value);
    }

    let options = ResolveOptions {
        strict: args.strict || config.strict_templates,
        debug: false,
    };
    let resolved = handler
        .resolve(&args.text, options)
        .map_err(|e| anyhow!("could not resolve: {e}"))?;
    println!("{resolved}");
    Ok(())
}
