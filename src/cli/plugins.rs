use std::str::FromStr;

use anyhow::anyhow;
use clap::Args;

use super::CliContext;
use flowdeck::flowdeck_plugin::PluginCategory;

#[derive(Args, Debug, Default)]
pub struct PluginsArgs {
    /// Only list plugins of this category (flow, dashboard)
    #[arg(long)]
    pub category: Option<String>,

    /// Print the summaries as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub async fn execute(args: PluginsArgs, context: &CliContext) -> anyhow::Result<()> {
    let category = args
        .category
        .as_deref()
        .map(|c| PluginCategory::from_str(c).map_err(|_| anyhow!("unknown category '{c}'")))
        .transpose()?;

    let app = context.bootstrap().await?;
    let summaries: Vec<_> = app
        .host()
        .summaries()
        .into_iter()
        .filter(|s| category.is_none_or(|c| s.category == c))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("No plugins found in {}", app.config().plugins_dir.display());
    } else {
        for s in &summaries {
            let caps: Vec<&str> = s.capabilities.iter().map(|c| c.as_ref()).collect();
            println!(
                "{:<24} {:<10} {:<8} {}",
                s.key,
                s.category.as_ref(),
                if s.enabled { "enabled" } else { "disabled" },
                caps.join(",")
            );
        }
    }
    app.shutdown();
    Ok(())
}
