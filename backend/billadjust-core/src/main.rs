// src/main.rs
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use billadjust_core::{
    workbook, write_workbook, Engine, EngineConfig, ExportOptions, ProjectSelection, RateCard,
    RawTable, Results, RunInputs, SnapshotStore,
};

/// Allocate monthly project budget estimates across logged hours.
#[derive(Parser, Debug)]
#[command(name = "billadjust", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Time extract CSV (one row per logged entry)
    #[arg(long)]
    time: PathBuf,
    /// Rate card CSV
    #[arg(long)]
    rates: PathBuf,
    /// Project mapping CSV (code, label, customer name)
    #[arg(long)]
    mapping: PathBuf,
    /// Budget extract CSV with one forecast column per month
    #[arg(long)]
    budget: PathBuf,
    /// Label naming the budget month, e.g. "Heures IBM Mai 25". Defaults to
    /// the time extract's file name.
    #[arg(long)]
    period_label: Option<String>,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Directory for the CSV sheets (defaults to <output_dir>/<results key>)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Leave zero-hour rows out of the detail sheets
    #[arg(long)]
    hide_zero_hours: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare and execute in one go, then write the sheets
    Run {
        #[command(flatten)]
        inputs: InputArgs,
        /// Comma-separated project labels (all projects when omitted)
        #[arg(long, value_delimiter = ',')]
        projects: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Normalize and aggregate, store the prepared run and list its projects
    Prepare {
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Execute a stored prepared run for a project selection
    Execute {
        #[arg(long)]
        run_id: String,
        #[arg(long, value_delimiter = ',')]
        projects: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Override adjusted hours in stored results and rewrite the sheets
    Edit {
        #[arg(long)]
        run_id: String,
        /// Project selection the results were executed with (all when omitted)
        #[arg(long, value_delimiter = ',')]
        projects: Vec<String>,
        /// `<employee> - <project>=<hours>`, repeatable
        #[arg(long = "set", required = true)]
        overrides: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("Failed to load BILLADJUST_* configuration")?;
    let store = SnapshotStore::new(config.snapshot_dir.clone());

    match cli.command {
        Commands::Run {
            inputs,
            projects,
            output,
        } => {
            let (engine, run_inputs) = load_inputs(&inputs, config)?;
            let results = engine.run(&run_inputs, &selection(projects))?;
            store.save_results(&results)?;
            export(&engine, &results, &output)
        }
        Commands::Prepare { inputs } => {
            let (engine, run_inputs) = load_inputs(&inputs, config)?;
            let handle = engine.prepare(&run_inputs)?;
            store.save_handle(&handle)?;
            println!("run id: {}", handle.run_id);
            println!("period: {}", handle.period);
            for label in handle.available_projects() {
                println!("  {}", label);
            }
            report_diagnostics(&handle.diagnostics);
            Ok(())
        }
        Commands::Execute {
            run_id,
            projects,
            output,
        } => {
            let handle = store
                .load_handle(&run_id)?
                .ok_or_else(|| anyhow!("No prepared run with id {}", run_id))?;
            // Rates were applied during prepare; execute only needs the config
            let engine = Engine::new(Arc::new(RateCard::default()), config);
            let results = engine.execute(&handle, &selection(projects))?;
            store.save_results(&results)?;
            export(&engine, &results, &output)
        }
        Commands::Edit {
            run_id,
            projects,
            overrides,
            output,
        } => {
            let key = selection(projects).results_key(&run_id);
            let results = store
                .load_results(&key)?
                .ok_or_else(|| anyhow!("No stored results {} for run {}", key, run_id))?;
            let overrides = parse_overrides(&overrides)?;
            let edited = results.apply_overrides(&overrides)?;
            store.save_results(&edited)?;
            let engine = Engine::new(Arc::new(RateCard::default()), config);
            export(&engine, &edited, &output)
        }
    }
}

fn read_csv(name: &str, path: &Path, header_row: usize) -> Result<RawTable> {
    RawTable::from_csv_path(name, path, header_row)
        .with_context(|| format!("Failed to read {} extract {:?}", name, path))
}

fn load_inputs(args: &InputArgs, config: EngineConfig) -> Result<(Engine, RunInputs)> {
    let rates = read_csv("rates", &args.rates, 0)?;
    let budget_header_row = config.budget_header_row;
    let engine = Engine::from_rate_extract(&rates, config)?;

    let period_label = match &args.period_label {
        Some(label) => label.clone(),
        None => args
            .time
            .file_name()
            .and_then(|name| name.to_str())
            .map(String::from)
            .ok_or_else(|| anyhow!("Cannot derive a period label from {:?}", args.time))?,
    };

    let inputs = RunInputs {
        time_extract: read_csv("time", &args.time, 0)?,
        mapping: read_csv("mapping", &args.mapping, 0)?,
        budget: read_csv("budget", &args.budget, budget_header_row)?,
        period_label,
    };
    Ok((engine, inputs))
}

fn selection(projects: Vec<String>) -> ProjectSelection {
    if projects.is_empty() {
        ProjectSelection::All
    } else {
        ProjectSelection::only(projects.into_iter().map(|p| p.trim().to_string()))
    }
}

fn parse_override(raw: &str) -> Result<(String, Decimal)> {
    let (id, hours) = raw
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("Override '{}' is not of the form <id>=<hours>", raw))?;
    let id = id.trim();
    if id.is_empty() {
        bail!("Override '{}' has an empty row id", raw);
    }
    let hours = Decimal::from_str(hours.trim())
        .with_context(|| format!("Override '{}' has a non-numeric value", raw))?;
    Ok((id.to_string(), hours))
}

fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, Decimal>> {
    let mut overrides = BTreeMap::new();
    for entry in raw {
        let (id, hours) = parse_override(entry)?;
        if overrides.insert(id.clone(), hours).is_some() {
            warn!("Override for '{}' given more than once, the last one wins", id);
        }
    }
    Ok(overrides)
}

fn export(engine: &Engine, results: &Results, output: &OutputArgs) -> Result<()> {
    let dir = output
        .out
        .clone()
        .unwrap_or_else(|| engine.config().output_dir.join(results.results_key()));
    let options = ExportOptions {
        hide_zero_hours: output.hide_zero_hours,
    };
    let paths = write_workbook(&dir, &workbook(results, &options))?;

    println!("run id: {} (results {})", results.run_id, results.results_key());
    for result in &results.project_results {
        println!(
            "  {:<30} adjusted {:>8} h  cost {:>12}  variance {:>12}",
            result.project_label,
            result.adjusted_hours.round_dp(0),
            result.adjusted_cost.round_dp(0),
            result.variance.round_dp(0)
        );
    }
    for path in &paths {
        info!("Wrote {:?}", path);
    }
    report_diagnostics(&results.diagnostics);
    Ok(())
}

fn report_diagnostics(diagnostics: &billadjust_core::RunDiagnostics) {
    if diagnostics.is_empty() {
        return;
    }
    println!("{} diagnostics:", diagnostics.len());
    for diagnostic in diagnostics.entries() {
        println!("  - {}", diagnostic);
    }
}
