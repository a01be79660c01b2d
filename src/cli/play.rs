use std::path::PathBuf;

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::CliContext;
use flowdeck::{
    apps::App,
    player::{Playback, RenderedStep, read_scenario},
};

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Scenario file, relative paths are taken from the root directory
    pub scenario: PathBuf,

    /// Keep watching the plugin directory while playing
    #[arg(long, default_value_t = false)]
    pub watch: bool,
}

const HELP: &str = ":next  :prev  :restart  :quit   anything else answers the current step";

pub async fn execute(args: PlayArgs, context: &CliContext) -> anyhow::Result<()> {
    let path = if args.scenario.is_absolute() || args.scenario.exists() {
        args.scenario.clone()
    } else {
        context.root.join(&args.scenario)
    };
    let scenario = read_scenario(&path)?;

    let mut config = context.runtime_config().await;
    context.init_logging(&config)?;
    config.watch = config.watch && args.watch;
    let app = App::bootstrap(config).await?;

    let mut playback = Playback::new(app.host().clone(), scenario)?;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if playback.is_finished() {
            println!("-- end of scenario, :prev or :restart to continue --");
        } else {
            match playback.render_current() {
                Ok(step) => print_step(&step),
                Err(e) => warn!(%e, "could not render step"),
            }
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            ":quit" | ":q" => break,
            ":next" | ":n" => {
                playback.next_step();
            }
            ":prev" | ":p" => {
                playback.prev_step();
            }
            ":restart" => playback.restart(),
            ":help" => println!("{HELP}"),
            answer => {
                if playback.submit_input(answer).is_ok() {
                    playback.next_step();
                }
            }
        }
    }

    shutdown(&app);
    Ok(())
}

fn print_step(step: &RenderedStep) {
    println!();
    for block in &step.main {
        println!("{block}");
    }
    for block in &step.left_panel {
        println!("  [left] {block}");
    }
    for block in &step.right_panel {
        println!("  [right] {block}");
    }
    print!("> ");
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

fn shutdown(app: &App) {
    app.shutdown();
    println!("Goodbye!");
}
