use super::CliContext;
use flowdeck::apps::cmd_init;

pub async fn execute(context: &CliContext) -> anyhow::Result<()> {
    cmd_init(&context.root)?;
    println!(
        "Initialized flowdeck layout at {}. Try 'flowdeck play scenarios/demo.yaml'",
        context.root.display()
    );
    Ok(())
}
