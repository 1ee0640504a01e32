//! E-ADARP BRKGA-QL - Command Line Interface
//!
//! Solves Electric Autonomous Dial-a-Ride instances with a biased random-key
//! genetic algorithm whose parameters are tuned online by Q-learning.

use clap::{Parser, Subcommand};
use eadarp_brkga_ql::benchmark::{format_routes, Experiment};
use eadarp_brkga_ql::config::SolverConfig;
use eadarp_brkga_ql::error::SolverError;
use eadarp_brkga_ql::evaluation::decode;
use eadarp_brkga_ql::problem::Problem;
use eadarp_brkga_ql::solution::Chromosome;

use indicatif::{ProgressBar, ProgressStyle};
use ordered_float::OrderedFloat;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::statistics::Statistics;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eadarp-brkga-ql")]
#[command(version = "1.0")]
#[command(about = "BRKGA with Q-learning for the Electric Autonomous Dial-a-Ride Problem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the optimizer on a problem
    Solve {
        /// Problem bundle (JSON)
        #[arg(short, long)]
        problem: PathBuf,

        /// Solver configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of independent runs
        #[arg(short, long)]
        runs: Option<usize>,

        /// Time limit per run in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Worker threads per run
        #[arg(long)]
        threads: Option<usize>,

        /// Stop every run after this many generations
        #[arg(short, long)]
        generations: Option<usize>,

        /// Disable local search
        #[arg(long)]
        no_local_search: bool,

        /// Log every generation and the final Q-table
        #[arg(long)]
        debug: bool,

        /// Write the best solution to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the per-run table to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Print statistics about a problem
    Analyze {
        /// Problem bundle (JSON)
        #[arg(short, long)]
        problem: PathBuf,
    },
}

/// Command line overrides of the run section
struct RunOverrides {
    runs: Option<usize>,
    time_limit: Option<f64>,
    threads: Option<usize>,
    generations: Option<usize>,
    no_local_search: bool,
    debug: bool,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Solve {
            problem,
            config,
            runs,
            time_limit,
            threads,
            generations,
            no_local_search,
            debug,
            output,
            csv,
        } => {
            let overrides = RunOverrides {
                runs,
                time_limit,
                threads,
                generations,
                no_local_search,
                debug,
            };
            solve_problem(&problem, config.as_ref(), overrides, output, csv)
        }

        Commands::Analyze { problem } => analyze_problem(&problem),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>, overrides: RunOverrides) -> Result<SolverConfig, SolverError> {
    let mut config = match path {
        Some(path) => SolverConfig::from_json_file(path)?,
        None => SolverConfig::default(),
    };

    let run = &mut config.run;
    if let Some(runs) = overrides.runs {
        run.max_runs = runs;
    }
    if let Some(time_limit) = overrides.time_limit {
        run.max_time = time_limit;
    }
    if let Some(threads) = overrides.threads {
        run.max_threads = threads;
    }
    if overrides.generations.is_some() {
        run.max_generations = overrides.generations;
    }
    if overrides.no_local_search {
        run.local_search = false;
    }
    run.debug |= overrides.debug;

    config.validate()?;
    Ok(config)
}

fn solve_problem(
    path: &PathBuf,
    config_path: Option<&PathBuf>,
    overrides: RunOverrides,
    output: Option<PathBuf>,
    csv: Option<PathBuf>,
) -> Result<(), SolverError> {
    println!("Loading problem from {:?}...", path);
    let problem = Problem::from_json_file(path)?;
    let config = load_config(config_path, overrides)?;

    if config.run.debug {
        println!("{}", problem.statistics());
    }

    let bar = ProgressBar::new(config.run.max_runs as u64);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} runs {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut experiment = Experiment::new(&problem, &config);
    experiment.run(|record| {
        bar.set_message(format!("seed {}: {:.2}", record.seed, record.objective));
        bar.inc(1);
    })?;
    bar.finish_and_clear();

    println!("{}", experiment.generate_report());

    if let Some(path) = csv {
        experiment.export_to_csv(&path)?;
        println!("Run table exported to {:?}", path);
    }
    if let Some(path) = output {
        experiment.export_best_json(&path)?;
        println!("Best solution saved to {:?}", path);
    }
    Ok(())
}

fn analyze_problem(path: &PathBuf) -> Result<(), SolverError> {
    let problem = Problem::from_json_file(path)?;

    println!("========== Problem Analysis ==========\n");
    println!("{}", problem.statistics());

    let u = problem.nb_users;
    let widths: Vec<f64> = problem.nodes[..2 * u]
        .iter()
        .map(|n| n.latest - n.earliest)
        .collect();
    if !widths.is_empty() {
        let avg = Statistics::mean(&widths);
        let min = Statistics::min(&widths);
        let max = Statistics::max(&widths);
        println!("Time Window Widths:");
        println!("  Average: {:.2}", avg);
        println!("  Min: {:.2}", min);
        println!("  Max: {:.2}", max);
    }

    println!("\nVehicles:");
    for (v, vehicle) in problem.vehicles.iter().enumerate() {
        println!(
            "  {}: capacity {}, battery {:.1}/{:.1}, min end battery {:.1}, depot {}",
            v,
            vehicle.capacity,
            vehicle.initial_battery,
            vehicle.battery_capacity,
            vehicle.min_end_battery(),
            problem.origin_depots[v]
        );
    }

    // quick estimate from random chromosomes
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let sample = (0..100)
        .map(|_| decode(&problem, Chromosome::random(&problem, &mut rng)))
        .min_by_key(|s| OrderedFloat(s.objective));
    if let Some(sample) = sample {
        println!("\nBest of 100 random chromosomes: {:.2}", sample.objective);
        print!("{}", format_routes(&problem, &sample));
    }
    Ok(())
}
