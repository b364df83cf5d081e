// src/main.rs
//
// =============================================================================
// PREPFLOW: COMMANDER & ENTRY POINT (v 0.1 )
// =============================================================================
//
// The wiring center.
//
// Modes:
// 1. RUN:  Loads a run config, applies overrides, executes against the
//          simulated deck and prints the run report as JSON.
// 2. PLAN: Validates and plans without motion: stages, compensating moves,
//          reagent loads.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use prepflow::drivers::operator::{AutoConfirm, ConsoleOperator};
use prepflow::drivers::simulated::SimulatedDeck;
use prepflow::drivers::{DeckDrivers, Operator, TokioClock, VirtualClock};
use prepflow::reagents::ReagentEstimate;
use prepflow::{PipelineController, RunConfig};

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "prepflow",
    version = "0.1",
    about = "Library-prep orchestration for a liquid-handling deck"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// YAML run config. Defaults apply where omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON string to override options (e.g. '{"column_count": 2}').
    #[arg(long)]
    params: Option<String>,

    /// Force a dry run.
    #[arg(long)]
    simulate: bool,

    /// Number of times to repeat the whole sequence.
    #[arg(long)]
    cycles: Option<u32>,

    /// Stress preset: full plate, dry run, re-rack tips, unattended, N cycles.
    #[arg(long, value_name = "CYCLES", conflicts_with = "config")]
    stress: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a run against the simulated deck.
    Run {
        #[command(flatten)]
        args: ConfigArgs,

        /// Wait for real on settles and shakes instead of a virtual clock.
        #[arg(long)]
        realtime: bool,

        /// Auto-confirm every operator pause.
        #[arg(long)]
        yes: bool,

        /// Also write the JSON report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Validate and print the plan without moving anything.
    Plan {
        #[command(flatten)]
        args: ConfigArgs,
    },
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match cli.command {
        Commands::Run {
            args,
            realtime,
            yes,
            report,
        } => run_protocol(args, realtime, yes, report).await,
        Commands::Plan { args } => print_plan(args),
    }
}

// ============================================================================
// 3. CONFIG ASSEMBLY
// ============================================================================

fn load_config(args: &ConfigArgs) -> Result<RunConfig> {
    let mut cfg = match (args.stress, &args.config) {
        (Some(cycles), _) => RunConfig::stress_test(cycles),
        (None, Some(path)) => RunConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, None) => RunConfig::default(),
    };

    // Inject overrides (same shape as the YAML file)
    if let Some(raw) = &args.params {
        let overrides: Value =
            serde_json::from_str(raw).context("--params is not valid JSON")?;
        cfg.apply_overrides(&overrides)?;
        log::info!("💉 applied overrides: {}", raw);
    }
    if args.simulate {
        cfg.simulate = true;
    }
    if let Some(cycles) = args.cycles {
        cfg.repeat_cycles = cycles;
    }
    Ok(cfg)
}

// ============================================================================
// 4. RUNTIME: RUN
// ============================================================================

async fn run_protocol(
    args: ConfigArgs,
    realtime: bool,
    yes: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let cfg = load_config(&args)?;
    let controller = PipelineController::new(cfg).context("run configuration rejected")?;

    let operator: Arc<dyn Operator> = if yes || controller.policy().unattended {
        Arc::new(AutoConfirm::new())
    } else {
        Arc::new(ConsoleOperator::stdin())
    };

    let clock = VirtualClock::new();
    let deck = SimulatedDeck::new(clock.clone());
    let mut drivers = DeckDrivers::simulated(&deck, operator);
    if realtime {
        drivers = drivers.with_clock(Arc::new(TokioClock));
    }

    log::info!(
        "🚀 starting run: {} column(s), {} cycle(s){}",
        controller.config().column_count,
        controller.config().repeat_cycles,
        if controller.policy().simulate {
            " [dry run]"
        } else {
            ""
        }
    );

    let mut session = controller.new_session()?;
    controller.run(&mut session, &drivers).await?;
    let report = session.report();

    log::info!(
        "⏱️  virtual time on deck: {:.0}s",
        clock.elapsed().as_secs_f64()
    );

    let json = serde_json::to_string_pretty(&report)?;
    if let Some(path) = report_path {
        std::fs::write(&path, &json)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }
    println!("{}", json);
    Ok(())
}

// ============================================================================
// 5. RUNTIME: PLAN
// ============================================================================

fn print_plan(args: ConfigArgs) -> Result<()> {
    let cfg = load_config(&args)?;
    let controller = PipelineController::new(cfg).context("run configuration rejected")?;
    let plan = controller.plan();

    println!("📋 stage plan");
    for stage in &plan.stages {
        let mark = if stage.enabled { "✔" } else { "·" };
        print!("  {} {:<28} on {}", mark, stage.id, stage.requires);
        if let Some(route) = stage.compensation {
            print!("   (compensating move {})", route);
        }
        println!();
    }
    println!("  plate ends on {}", plan.ends_on);
    if let (Some(route), true) = (plan.resync, controller.config().repeat_cycles > 1) {
        println!("  each later cycle starts with {}", route);
    }

    let estimate = ReagentEstimate::for_config(controller.config());
    println!(
        "\n🧪 reagents ({} reservoir, {})",
        estimate.reservoir,
        controller.config().reservoir_format.labware_name()
    );
    for load in &estimate.loads {
        println!("  {:<14} {:>8}  at {}", load.name, load.volume.to_string(), load.location);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stress_refuses_a_config_file() {
        let parsed = Cli::try_parse_from(["prepflow", "run", "--stress", "5", "--config", "run.yaml"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["prepflow", "run", "--stress", "5", "--params", "{}"]);
        assert!(parsed.is_ok());
    }
}
