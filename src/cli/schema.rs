use clap::Args;

use super::CliContext;
use flowdeck::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Also print each written file
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

pub async fn execute(args: SchemaArgs, context: &CliContext) -> anyhow::Result<()> {
    let app = context.bootstrap().await?;
    let out_dir = context.root.join("schemas");
    let written = write_schema(&out_dir, app.host())?;
    if args.verbose {
        for path in &written {
            println!("  {}", path.display());
        }
    }
    println!("Schemas written to {}", out_dir.display());
    app.shutdown();
    Ok(())
}
