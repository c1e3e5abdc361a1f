use std::fs;
use std::path::PathBuf;

use clap::Args;
use schemars::schema_for;

use super::CliContext;
use plugin_platform::message::PlatformRequest;
use plugin_platform::plugins::PluginManifest;
use plugin_platform::workflow::WorkflowDocument;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Output directory, `<root>/schemas` by default
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn execute(args: SchemaArgs, context: &CliContext) -> anyhow::Result<()> {
    let out_dir = args.out.unwrap_or_else(|| context.config.root.join("schemas"));
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("workflow.schema.json", serde_json::to_string_pretty(&schema_for!(WorkflowDocument))?),
        ("manifest.schema.json", serde_json::to_string_pretty(&schema_for!(PluginManifest))?),
        ("request.schema.json", serde_json::to_string_pretty(&schema_for!(PlatformRequest))?),
    ];
    for (name, json) in schemas {
        fs::write(out_dir.join(name), json)?;
    }
    println!("Schemas written to {}", out_dir.display());
    Ok(())
}
