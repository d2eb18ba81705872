//! LoopGuard CLI
//!
//! # Usage
//!
//! ## Analyze a kernel export
//! ```bash
//! cargo run --bin loopguard -- analyze \
//!   --input kernel.json \
//!   --config analysis.json \
//!   --output report.json \
//!   --verbose
//! ```
//!
//! ## Use an external dependence oracle
//! ```bash
//! cargo run --bin loopguard -- analyze \
//!   --input kernel.json \
//!   --oracle ./dependence-tester --oracle-arg --json
//! ```
//!
//! ## Check a dependency graph for cycles
//! ```bash
//! cargo run --bin loopguard -- cycles --edge S1:S2 --edge S2:S1
//! ```

use clap::{Parser, Subcommand};
use log::info;
use loopguard::kernel::KernelFile;
use loopguard::pipeline::RegionOutcome;
use loopguard::profile::{summarize, NodeProfile};
use loopguard::{AnalysisConfig, AnalysisPipeline, DependencyGraph, ProcessOracle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "loopguard")]
#[clap(about = "LoopGuard - Safety Analysis for Parallel Loop Offloading")]
#[clap(version = "1.0")]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the candidate loops of a kernel export
    ///
    /// Reports which array accesses and integer operations still need runtime
    /// checks, which loops may run in parallel and whether offloading pays off.
    Analyze {
        /// Kernel export (JSON)
        #[clap(long = "input", short = 'i', value_name = "FILE")]
        input: PathBuf,

        /// Analysis configuration (JSON); defaults apply when omitted
        #[clap(long = "config", short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// External dependence oracle program
        #[clap(long = "oracle", value_name = "PROGRAM")]
        oracle: Option<PathBuf>,

        /// Extra argument passed to the oracle program (repeatable)
        #[clap(long = "oracle-arg", value_name = "ARG")]
        oracle_args: Vec<String>,

        /// Do not scan array contents for value bounds
        #[clap(long = "no-scan")]
        no_scan: bool,

        /// Also check array contents for repeated values
        #[clap(long = "scan-uniqueness")]
        scan_uniqueness: bool,

        /// Offload cost threshold
        #[clap(long = "threshold", value_name = "COST")]
        threshold: Option<u64>,

        /// Analyze candidate loops one after another
        #[clap(long = "sequential")]
        sequential: bool,

        /// Write the JSON report here instead of stdout
        #[clap(long = "output", short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Print a per-loop summary
        #[clap(long = "verbose", short = 'v')]
        verbose: bool,
    },

    /// Check a dependency graph for cycles
    Cycles {
        /// Edge as SOURCE:SINK (repeatable)
        #[clap(long = "edge", short = 'e', value_name = "SOURCE:SINK")]
        edges: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise --verbose raises the default level
    let verbose = matches!(args.command, Commands::Analyze { verbose: true, .. });
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Analyze {
            input,
            config,
            oracle,
            oracle_args,
            no_scan,
            scan_uniqueness,
            threshold,
            sequential,
            output,
            verbose,
        } => {
            let mut config = match config {
                Some(path) => AnalysisConfig::from_file(&path)
                    .map_err(|e| format!("Failed to load config: {}", e))?,
                None => AnalysisConfig::default(),
            };
            if no_scan {
                config.scan_array_min_max = false;
            }
            if scan_uniqueness {
                config.scan_array_uniqueness = true;
            }
            if let Some(t) = threshold {
                config.offload_threshold = t;
            }
            if sequential {
                config.concurrent = false;
            }
            analyze_command(input, config, oracle, oracle_args, output, verbose)
        }
        Commands::Cycles { edges } => cycles_command(&edges),
    }
}

fn analyze_command(
    input: PathBuf,
    config: AnalysisConfig,
    oracle: Option<PathBuf>,
    oracle_args: Vec<String>,
    output: Option<PathBuf>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let kernel = KernelFile::from_file(&input)
        .and_then(|file| file.into_kernel())
        .map_err(|e| format!("Failed to import kernel: {}", e))?;
    info!(
        "analyzing {} candidate loop(s) from {}",
        kernel.regions.len(),
        input.display()
    );

    let mut pipeline = AnalysisPipeline::new(config);
    if let Some(program) = oracle {
        let process = oracle_args
            .into_iter()
            .fold(ProcessOracle::new(program), |p, arg| p.arg(arg));
        pipeline = pipeline.with_oracle(Box::new(process));
    }

    let outcomes = pipeline.analyze_kernel(&kernel);
    let report = serde_json::to_string_pretty(&outcomes)?;
    match &output {
        Some(path) => std::fs::write(path, &report)
            .map_err(|e| format!("Failed to write report: {}", e))?,
        None => println!("{}", report),
    }

    if verbose {
        print_summary(&outcomes);
        if let Some(path) = output {
            println!("\nReport: {}", path.display());
        }
    }
    Ok(())
}

fn print_summary(outcomes: &[RegionOutcome]) {
    println!("\n==================================================================");
    println!("                        Analysis Summary                          ");
    println!("==================================================================\n");

    let mut profiles: Vec<NodeProfile> = Vec::new();
    for outcome in outcomes {
        let report = match &outcome.report {
            Some(report) => report,
            None => {
                println!(
                    "Loop {}: sequential ({})",
                    outcome.root,
                    outcome.error.as_deref().unwrap_or("no report")
                );
                continue;
            }
        };

        let checked_accesses = report
            .accesses
            .iter()
            .filter(|c| c.requires_runtime_check)
            .count();
        let checked_ops = report
            .overflow_checks
            .iter()
            .filter(|c| c.requires_runtime_check)
            .count();
        println!("Loop {}:", outcome.root);
        println!(
            "  Array accesses needing checks: {}/{}",
            checked_accesses,
            report.accesses.len()
        );
        println!(
            "  Integer ops needing checks: {}/{}",
            checked_ops,
            report.overflow_checks.len()
        );
        if let Some(deps) = &report.dependences {
            for verdict in &deps.loops {
                println!(
                    "  {}: {}",
                    verdict.label,
                    if verdict.safe_to_parallelize {
                        "parallel"
                    } else {
                        "sequential"
                    }
                );
            }
            if deps.cyclic {
                println!("  ! Flow dependences form a cycle");
            }
        }
        println!("  Parallel depth: {}", report.parallel_depth);
        println!(
            "  Cost estimate: {:.1} (threshold {:.0}) -> {}",
            report.offload.estimate,
            report.offload.threshold,
            if report.offload.offload {
                "offload"
            } else {
                "keep on host"
            }
        );
        if report.retries > 0 {
            println!("  Bound rebuilds: {}", report.retries);
        }
        profiles.push(report.profile.clone());
    }

    let total = summarize(&profiles);
    println!("\nTotals:");
    println!("  Binary ops: {:.1}", total.binary_ops);
    println!("  Math calls: {:.1}", total.math_funcs);
    println!("  Array accesses: {:.1}", total.array_access_count);
    println!("  Branches: {:.1}", total.if_count);
}

fn cycles_command(edges: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut graph = DependencyGraph::new();
    for edge in edges {
        let (from, to) = edge
            .split_once(':')
            .ok_or_else(|| format!("Invalid edge '{}', expected SOURCE:SINK", edge))?;
        graph.add_edge(from.trim(), to.trim());
    }

    match graph.find_cycle() {
        Some(cycle) => println!("cyclic: {}", cycle.join(" -> ")),
        None => println!(
            "acyclic ({} vertices, {} edges)",
            graph.vertex_count(),
            graph.edge_count()
        ),
    }
    Ok(())
}
