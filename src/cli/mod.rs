//! Kolosal Select CLI Module
//!
//! Command-line interface for generating, validating and running model
//! selection configs.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{generate_sample_model_config, ModelConfig};
use crate::data::{load_data, split_features_target};
use crate::params::format_params;
use crate::search::{ParameterGrid, SearchRegistry};
use crate::selection::ModelBuilder;
use crate::training::EstimatorRegistry;

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn line_box_top()    { println!("  {}", dim("┌───────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└───────────────────────────────────────────────────────────┘")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-select")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Config-driven model selection with cross-validated grid search")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a sample model_config.yaml
    Init {
        /// Directory to write model_config.yaml into
        #[arg(short, long, default_value = "config")]
        export_dir: PathBuf,
    },

    /// Resolve every candidate in a model config without fitting
    Validate {
        /// Model config file
        #[arg(short, long, env = "KOLOSAL_SELECT_CONFIG")]
        config: PathBuf,
    },

    /// Search every candidate and report the best model
    Select {
        /// Model config file
        #[arg(short, long, env = "KOLOSAL_SELECT_CONFIG")]
        config: PathBuf,

        /// Input data file (CSV or JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Target column name
        #[arg(short, long)]
        target: String,

        /// Minimum acceptable best score
        #[arg(long)]
        base_accuracy: Option<f64>,

        /// Write the selection report (JSON) here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the fitted best model here
        #[arg(long)]
        model_output: Option<PathBuf>,
    },

    /// List registered estimators and search strategies
    Models,
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_init(export_dir: &Path) -> anyhow::Result<()> {
    section("Init");
    let path = generate_sample_model_config(export_dir)?;
    step_ok(&format!("Sample config written to {}", path.display().to_string().cyan()));
    Ok(())
}

pub fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    section("Validate");

    step_run("Loading config");
    let config = ModelConfig::from_path(config_path)?;
    step_done(&format!("{} candidates", config.model_selection.len()));

    let builder = ModelBuilder::new(config);
    step_run("Resolving candidates");
    builder.validate()?;
    step_done("");

    let search = &builder.config().grid_search;
    println!();
    println!("  {}", kv("search", &search.target()));
    println!("  {}", kv("params", &format_params(&search.params)));
    println!();
    println!("  {:<16} {:<44} {:>8}", muted("Candidate"), muted("Target"), muted("Combos"));
    println!("  {}", dim(&"─".repeat(70)));

    for (name, spec) in &builder.config().model_selection {
        let combos = ParameterGrid::new(&spec.search_param_grid)?.len();
        println!("  {:<16} {:<44} {:>8}", name, spec.target(), combos);
    }
    println!();
    step_ok("Config is valid");
    Ok(())
}

pub fn cmd_select(
    config_path: &Path,
    data_path: &Path,
    target: &str,
    base_accuracy: Option<f64>,
    output: Option<&Path>,
    model_output: Option<&Path>,
) -> anyhow::Result<()> {
    section("Select");

    step_run("Loading data");
    let start = Instant::now();
    let df = load_data(data_path)?;
    let (x, y, features) = split_features_target(&df, target)?;
    step_done(&format!("{} rows × {} features in {:?}", x.nrows(), features.len(), start.elapsed()));

    step_run("Loading config");
    let builder = ModelBuilder::from_path(config_path)?;
    builder.validate()?;
    step_done(&format!("{} candidates", builder.config().model_selection.len()));

    let start = Instant::now();
    let best = builder.get_best_model(&x, &y, base_accuracy)?;
    let elapsed = start.elapsed();

    println!();
    println!("  {:<16} {:<40} {:>10}", muted("Candidate"), muted("Target"), muted("Score"));
    println!("  {}", dim(&"─".repeat(68)));
    for candidate in &best.candidates {
        let marker = if candidate.name == best.name { ok("●") } else { dim("○") };
        println!(
            "  {:<16} {:<40} {:>10.4} {}",
            candidate.name, candidate.target, candidate.best_score, marker
        );
    }

    println!();
    line_box_top();
    line_box(&kv("best     ", &best.name.bold().to_string()));
    line_box(&kv("target   ", &best.target));
    line_box(&kv("score    ", &format!("{:.4}", best.best_score)));
    line_box(&kv("params   ", &format_params(&best.best_parameters)));
    line_box(&kv("elapsed  ", &format!("{:.2?}", elapsed)));
    line_box_bottom();

    if let Some(path) = output {
        best.save_report(path)?;
        step_ok(&format!("Report saved to {}", path.display()));
    }
    if let Some(path) = model_output {
        best.save_model(path)?;
        step_ok(&format!("Model saved to {}", path.display()));
    }

    Ok(())
}

pub fn cmd_models() -> anyhow::Result<()> {
    section("Estimators");
    for (module, class) in EstimatorRegistry::with_defaults().entries() {
        println!("  {} {}", muted(&format!("{:<24}", module)), class);
    }

    section("Search strategies");
    for (module, class) in SearchRegistry::with_defaults().entries() {
        println!("  {} {}", muted(&format!("{:<24}", module)), class);
    }
    println!();
    Ok(())
}
