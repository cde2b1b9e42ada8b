//! takt CLI - Finite-Capacity Production Scheduler
//!
//! Command-line interface for loading a scheduling-data file, producing
//! schedules, searching capacity configurations, and exporting scenario
//! snapshots.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use takt_solver::scenario::{
    anneal_capacities, minimize_uniform_capacity, optimize_target_greedy, run_baseline,
    run_with_capacities, run_with_criticality, AnnealOptions, CapacityVector, ScenarioContext,
    ScenarioRun, UniformSearchBounds,
};
use takt_solver::{diagnose, EngineConfig, ScheduleVariant};

#[derive(Parser)]
#[command(name = "takt")]
#[command(author, version, about = "Finite-capacity production scheduler", long_about = None)]
struct Cli {
    /// Scheduling data file (sectioned CSV)
    #[arg(long, global = true, default_value = "scheduling_data.csv")]
    csv: PathBuf,

    /// Verbose engine logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Variant {
    /// Earliest feasible slot, always
    Asap,
    /// Level-loaded slot selection against a utilization target
    Level,
    /// Criticality-aware: critical work ASAP, the rest level-loaded
    Critical,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the input file and validate the dependency graph
    Check,

    /// Produce a schedule with the capacities as loaded
    Schedule {
        /// Slot selection strategy
        #[arg(long, value_enum, default_value = "asap")]
        variant: Variant,

        /// Days between a late part's on-dock date and its earliest start
        #[arg(long, default_value = "1")]
        late_part_delay: i64,

        /// Day-utilization target for the level-loaded variants (percent)
        #[arg(long, default_value = "80")]
        target_utilization: f64,
    },

    /// Search capacity configurations
    Optimize {
        #[command(subcommand)]
        mode: OptimizeMode,
    },

    /// Explain capacity shortfalls, cycles, and blocked work
    Diagnose,

    /// Run the scenario suite and write snapshot JSON files
    Export {
        /// Output directory for the snapshot files
        #[arg(short, long, default_value = "snapshots")]
        out: PathBuf,

        /// Target earliness in days for the optimized scenario
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        target_earliness: i64,
    },
}

#[derive(Subcommand)]
enum OptimizeMode {
    /// Binary-search the minimal uniform (mechanics, quality) headcount
    Uniform {
        #[arg(long, default_value = "100")]
        max_mechanics: u32,

        #[arg(long, default_value = "50")]
        max_quality: u32,
    },

    /// Anneal per-team capacities toward a target earliness
    Target {
        /// Target worst-product lateness in days (negative = early)
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        target_earliness: i64,

        /// Use the deterministic greedy walk instead of annealing
        #[arg(long)]
        greedy: bool,

        #[arg(long, default_value = "300")]
        max_iterations: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let plan = takt_parser::parse_file(&cli.csv)
        .with_context(|| format!("loading {}", cli.csv.display()))?;
    let ctx = ScenarioContext::build(plan).context("resolving the dependency graph")?;

    println!(
        "Loaded {} templates, {} products, {} instances, {} constraints",
        ctx.plan.templates.len(),
        ctx.plan.products.len(),
        ctx.instances.len(),
        ctx.constraints.len()
    );

    match cli.command {
        Commands::Check => {
            println!("Dependency graph is valid.");
            Ok(())
        }
        Commands::Schedule {
            variant,
            late_part_delay,
            target_utilization,
        } => {
            let config = EngineConfig {
                late_part_delay_days: late_part_delay,
                variant: match variant {
                    Variant::Asap | Variant::Critical => ScheduleVariant::Asap,
                    Variant::Level => ScheduleVariant::LevelLoaded {
                        target_utilization,
                        max_lookahead_days: 3,
                    },
                },
                ..EngineConfig::default()
            };
            let run = match variant {
                Variant::Critical => run_with_criticality(&ctx, &config, target_utilization),
                _ => run_baseline(&ctx, &config),
            };
            print_run(&ctx, &run);
            Ok(())
        }
        Commands::Optimize { mode } => {
            let config = EngineConfig::default();
            match mode {
                OptimizeMode::Uniform {
                    max_mechanics,
                    max_quality,
                } => {
                    let bounds = UniformSearchBounds {
                        mechanics: (1, max_mechanics),
                        quality: (1, max_quality),
                    };
                    match minimize_uniform_capacity(&ctx, &config, bounds) {
                        Some(result) => {
                            println!(
                                "Optimal uniform capacity: mechanics={}, quality={}",
                                result.mechanics, result.quality
                            );
                            println!("Makespan: {} working days", result.makespan_days);
                            println!("Total headcount: {}", result.total_headcount);
                            Ok(())
                        }
                        None => bail!("no uniform capacity in range places every task"),
                    }
                }
                OptimizeMode::Target {
                    target_earliness,
                    greedy,
                    max_iterations,
                } => {
                    let result = if greedy {
                        optimize_target_greedy(&ctx, &config, target_earliness, max_iterations)
                    } else {
                        anneal_capacities(
                            &ctx,
                            &config,
                            &AnnealOptions {
                                target_earliness,
                                max_iterations,
                                ..AnnealOptions::default()
                            },
                        )
                    };
                    println!(
                        "Best configuration after {} iterations (score {:.0}):",
                        result.iterations_run, result.score
                    );
                    for (team, cap) in result
                        .capacities
                        .mechanic
                        .iter()
                        .chain(result.capacities.quality.iter())
                    {
                        println!("  {team}: {cap}");
                    }
                    if let Some(perf) = result.performance {
                        println!(
                            "Max lateness: {} days, workforce: {}",
                            perf.max_lateness_days
                                .map_or_else(|| "n/a".into(), |d| d.to_string()),
                            perf.total_workforce
                        );
                    }
                    Ok(())
                }
            }
        }
        Commands::Diagnose => {
            let run = run_baseline(&ctx, &EngineConfig::default());
            let report = diagnose::diagnose(&ctx, Some(&run.outcome));

            for shortfall in &report.capacity_shortfalls {
                println!(
                    "CAPACITY: {} needs {} people, team '{}' has {}",
                    shortfall.task, shortfall.needed, shortfall.team, shortfall.capacity
                );
            }
            for team in &report.unknown_teams {
                println!("UNKNOWN TEAM: '{team}' is not in any capacity table");
            }
            if let Some(cycle) = &report.cycle {
                println!("CYCLE: {cycle}");
            }
            for blocked in report.blocked.iter().take(10) {
                if blocked.waiting_on.is_empty() {
                    println!("UNPLACED: {} (no slot found)", blocked.task);
                } else {
                    let chain: Vec<String> =
                        blocked.waiting_on.iter().map(ToString::to_string).collect();
                    println!("BLOCKED: {} waiting on {}", blocked.task, chain.join(", "));
                }
            }
            if report.is_schedulable() && report.blocked.is_empty() {
                println!("No blocking issues found.");
            }
            Ok(())
        }
        Commands::Export {
            out,
            target_earliness,
        } => {
            std::fs::create_dir_all(&out)
                .with_context(|| format!("creating {}", out.display()))?;
            let config = EngineConfig::default();

            let baseline = run_baseline(&ctx, &config);
            write_snapshot(
                &out,
                "baseline",
                "Baseline scenario using loaded capacity data",
                &ctx,
                &config,
                &baseline,
            )?;

            if let Some(uniform) =
                minimize_uniform_capacity(&ctx, &config, UniformSearchBounds::default())
            {
                let capacities = CapacityVector {
                    mechanic: ctx
                        .plan
                        .mechanic_teams
                        .keys()
                        .map(|k| (k.clone(), uniform.mechanics))
                        .collect(),
                    quality: ctx
                        .plan
                        .quality_teams
                        .keys()
                        .map(|k| (k.clone(), uniform.quality))
                        .collect(),
                };
                let run = run_with_capacities(&ctx, &config, &capacities);
                write_snapshot(
                    &out,
                    "scenario2",
                    "Minimize makespan with uniform capacity",
                    &ctx,
                    &config,
                    &run,
                )?;
            }

            let annealed = anneal_capacities(
                &ctx,
                &config,
                &AnnealOptions {
                    target_earliness,
                    ..AnnealOptions::default()
                },
            );
            let run = run_with_capacities(&ctx, &config, &annealed.capacities);
            write_snapshot(
                &out,
                "scenario3",
                "Annealed per-team capacities toward the delivery target",
                &ctx,
                &config,
                &run,
            )?;

            println!("Snapshots written to {}", out.display());
            Ok(())
        }
    }
}

fn print_run(ctx: &ScenarioContext, run: &ScenarioRun) {
    println!(
        "Scheduled {}/{} instances",
        run.outcome.scheduled_count(),
        ctx.instances.len()
    );
    if run.outcome.slot_misses > 0 {
        println!("  slot misses: {}", run.outcome.slot_misses);
    }
    if run.outcome.far_future > 0 {
        println!("  far-future rejections: {}", run.outcome.far_future);
    }
    if !run.outcome.failed.is_empty() {
        println!("  failed: {}", run.outcome.failed.len());
    }
    println!("Makespan: {} working days", run.performance.makespan_days);
    for (product, lateness) in &run.performance.lateness_by_product {
        match lateness {
            Some(days) if *days <= 0 => {
                println!("  {product}: on time ({} days early)", -days);
            }
            Some(days) => println!("  {product}: LATE by {days} days"),
            None => println!("  {product}: nothing scheduled"),
        }
    }
}

fn write_snapshot(
    out: &std::path::Path,
    scenario_id: &str,
    description: &str,
    ctx: &ScenarioContext,
    config: &EngineConfig,
    run: &ScenarioRun,
) -> Result<()> {
    let mut capacities: BTreeMap<String, u32> = BTreeMap::new();
    capacities.extend(run.capacities.mechanic.clone());
    capacities.extend(run.capacities.quality.clone());
    for team in ctx.plan.customer_teams.values() {
        capacities.insert(team.name.clone(), team.capacity);
    }

    let snapshot = takt_snapshot::snapshot_run(
        scenario_id,
        description,
        ctx,
        &capacities,
        &run.outcome,
        config,
    );
    let path = out.join(format!("{scenario_id}.json"));
    let json = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    println!("  {} -> {}", scenario_id, path.display());
    Ok(())
}
