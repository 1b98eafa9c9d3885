//! Kolosal Select - Main Entry Point
//!
//! Config-driven model selection from the command line.

use clap::Parser;
use kolosal_select::cli::{cmd_init, cmd_models, cmd_select, cmd_validate, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_select=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { export_dir } => cmd_init(&export_dir)?,
        Commands::Validate { config } => cmd_validate(&config)?,
        Commands::Select { config, data, target, base_accuracy, output, model_output } => {
            cmd_select(&config, &data, &target, base_accuracy, output.as_deref(), model_output.as_deref())?;
        }
        Commands::Models => cmd_models()?,
    }

    Ok(())
}
