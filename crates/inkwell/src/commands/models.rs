//! Models command - list models across providers.

use anyhow::Result;
use clap::Args;
use console::Style;
use inkwell_llm::ModelInfo;

use super::Context;

/// Arguments for the models command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    /// Output as JSON (for scripting)
    #[arg(long)]
    pub json: bool,
}

/// Run the models command.
pub async fn run(args: ModelsArgs, ctx: &Context) -> Result<()> {
    let mut listings = ctx.app.manager.list_all_models().await;
    if let Some(name) = &ctx.provider {
        listings.retain(|provider, _| provider == name);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    let bold = Style::new().bold();
    let dim = Style::new().dim();
    if listings.is_empty() {
        println!("{}", dim.apply_to("No providers configured."));
        return Ok(());
    }
    for (provider, models) in &listings {
        println!("{}", bold.apply_to(provider));
        if models.is_empty() {
            println!("  {}", dim.apply_to("(no models)"));
        }
        for model in models {
            println!("  {}", describe(model));
        }
    }
    Ok(())
}

fn describe(model: &ModelInfo) -> String {
    match model.size {
        Some(bytes) => format!("{}  {}", model.id, human_size(bytes)),
        None => model.id.clone(),
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
