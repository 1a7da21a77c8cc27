//! CLI boundary for the build optimizer.

use clap::{Args, Parser, Subcommand, ValueEnum};
use hunter_optim::{
    check_parity, rank, BackendKind, BatchRunner, Build, BuildGenerator, CancelFlag,
    EngineConfig, FitnessMetric, HunterKind, Modifiers, Optimizer, RankedReport, Result,
    SimError,
};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Reference,
    Accelerated,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Reference => BackendKind::Reference,
            BackendArg::Accelerated => BackendKind::Accelerated,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Borge,
    Ozzy,
    Knox,
}

impl From<KindArg> for HunterKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Borge => HunterKind::Borge,
            KindArg::Ozzy => HunterKind::Ozzy,
            KindArg::Knox => HunterKind::Knox,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    AvgStage,
    LootPerHour,
    Survival,
    AvgDamage,
}

impl From<MetricArg> for FitnessMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::AvgStage => FitnessMetric::AvgStage,
            MetricArg::LootPerHour => FitnessMetric::LootPerHour,
            MetricArg::Survival => FitnessMetric::SurvivalRate,
            MetricArg::AvgDamage => FitnessMetric::AvgDamage,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hunter-optim")]
#[command(version)]
#[command(about = "Combat simulator and evolutionary build optimizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate one build file and print aggregate statistics.
    Simulate(SimulateArgs),
    /// Search the allocation space for high-performing builds.
    Optimize(OptimizeArgs),
    /// Compare the two backends over a random validation corpus.
    Parity(ParityArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Build configuration file (YAML or JSON).
    #[arg(short, long)]
    build: PathBuf,

    /// Simulations to run.
    #[arg(short = 'n', long, default_value = "100")]
    sims: usize,

    #[arg(long, value_enum, default_value = "accelerated")]
    backend: BackendArg,

    /// Fixed top-level seed for reproducible batches.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the archetype's stage cap.
    #[arg(long)]
    max_stage: Option<i32>,

    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Show wall-clock timing.
    #[arg(short, long, default_value = "false")]
    timing: bool,
}

#[derive(Args, Debug)]
struct OptimizeArgs {
    /// Archetype to optimize (taken from --build when omitted).
    #[arg(short, long, value_enum)]
    kind: Option<KindArg>,

    /// Character level (taken from --build when omitted).
    #[arg(short, long)]
    level: Option<i32>,

    /// Baseline build file; its gear carries into every candidate and its
    /// simulated stats anchor the deviation columns in the report.
    #[arg(short, long)]
    build: Option<PathBuf>,

    #[arg(short = 'n', long, default_value = "100")]
    sims: usize,

    #[arg(long, default_value = "6")]
    tiers: usize,

    #[arg(long, default_value = "200")]
    builds_per_tier: usize,

    #[arg(short, long, value_enum, default_value = "avg-stage")]
    metric: MetricArg,

    #[arg(long, value_enum, default_value = "accelerated")]
    backend: BackendArg,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    max_stage: Option<i32>,

    /// Wall-clock budget in seconds, checked at tier boundaries.
    #[arg(long)]
    time_budget: Option<u64>,

    /// Candidates to keep in the report.
    #[arg(long, default_value = "10")]
    top: usize,

    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Args, Debug)]
struct ParityArgs {
    #[arg(short, long, value_enum, default_value = "borge")]
    kind: KindArg,

    #[arg(short, long, default_value = "30")]
    level: i32,

    /// Builds in the validation corpus.
    #[arg(long, default_value = "10")]
    corpus: usize,

    #[arg(short = 'n', long, default_value = "200")]
    sims: usize,

    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Simulate(args) => simulate(args),
        Command::Optimize(args) => optimize(args),
        Command::Parity(args) => parity(args),
    };
    if let Err(e) = outcome {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn simulate(args: SimulateArgs) -> Result<()> {
    let build = Build::from_file(&args.build)?;
    let config = EngineConfig {
        sims_per_build: args.sims,
        max_stage: args.max_stage,
        backend: args.backend.into(),
        seed: args.seed,
        ..EngineConfig::default()
    };

    let runner = BatchRunner::new(&config)?;
    let selection = runner.selection();
    let start = Instant::now();
    let stats = runner.run(&build)?;
    let elapsed = start.elapsed();

    match args.output {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "simulations": args.sims,
                "selection": selection,
                "elapsed_seconds": elapsed.as_secs_f64(),
                "stats": stats,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            println!("=== Simulation Results ===");
            println!("Build:       {} level {}", build.kind(), build.level());
            println!(
                "Backend:     {:?}{}",
                selection.selected,
                if selection.gate_override {
                    " (safety gate override)"
                } else {
                    ""
                }
            );
            println!("Simulations: {} completed, {} aborted, {} overflowed",
                stats.completed_runs, stats.aborted_runs, stats.overflow_runs);
            println!();
            println!("Average Stage: {:.2} ± {:.2}", stats.avg_stage, stats.std_stage);
            println!("Stage Range:   {} - {}", stats.min_stage, stats.max_stage);
            println!("Survival Rate: {:.1}%", stats.survival_rate * 100.0);
            println!();
            println!("Avg Loot:      {:.3e} ({:.3e}/h)", stats.avg_loot, stats.avg_loot_per_hour);
            println!("Avg XP:        {:.3e}", stats.avg_xp);
            println!("Avg Damage:    {:.0} dealt, {:.0} taken", stats.avg_damage, stats.avg_damage_taken);
            println!("Avg Kills:     {:.0}", stats.avg_kills);
            if args.timing {
                println!();
                println!("--- Performance ---");
                println!("Total time:      {:.3}s", elapsed.as_secs_f64());
                println!(
                    "Simulations/sec: {:.0}",
                    args.sims as f64 / elapsed.as_secs_f64().max(1e-9)
                );
            }
        }
    }
    Ok(())
}

fn optimize(args: OptimizeArgs) -> Result<()> {
    let baseline_build = match &args.build {
        Some(path) => Some(Build::from_file(path)?),
        None => None,
    };
    let kind: HunterKind = match (args.kind, &baseline_build) {
        (Some(kind), _) => kind.into(),
        (None, Some(build)) => build.kind(),
        (None, None) => {
            return Err(SimError::Parse(
                "either --kind or --build is required".into(),
            ))
        }
    };
    let level = match (args.level, &baseline_build) {
        (Some(level), _) => level,
        (None, Some(build)) => build.level(),
        (None, None) => {
            return Err(SimError::Parse(
                "either --level or --build is required".into(),
            ))
        }
    };
    let modifiers = baseline_build
        .as_ref()
        .map(|b| b.modifiers().clone())
        .unwrap_or_else(Modifiers::default);

    let config = EngineConfig {
        sims_per_build: args.sims,
        max_stage: args.max_stage,
        backend: args.backend.into(),
        seed: args.seed,
        tier_count: args.tiers,
        builds_per_tier: args.builds_per_tier,
        wall_budget: args.time_budget.map(Duration::from_secs),
        ..EngineConfig::default()
    };
    let metric: FitnessMetric = args.metric.into();

    let mut optimizer = Optimizer::new(
        kind,
        level,
        modifiers,
        &config,
        metric,
        CancelFlag::new(),
    )?;
    let selection = optimizer.runner().selection();

    // Score the caller's own build first so the report can show deviations.
    let baseline_stats = match &baseline_build {
        Some(build) => Some(optimizer.runner().run(build)?),
        None => None,
    };

    let outcome = optimizer.run()?;

    // When the accelerated backend ran, spot-check it against the reference
    // on the winning build (and the baseline, if any). Drift beyond
    // tolerance is a warning attached to the report, never a stop.
    let disagreements = if selection.selected == BackendKind::Accelerated {
        let mut corpus = vec![outcome.best.0.clone()];
        if let Some(build) = &baseline_build {
            corpus.push(build.clone());
        }
        check_parity(&corpus, &config)?
    } else {
        Vec::new()
    };

    let mut populations = vec![outcome.population];
    populations.push(vec![outcome.best]);
    let report = rank(
        populations,
        metric,
        baseline_stats.as_ref(),
        selection,
        args.top,
    )
    .with_disagreements(disagreements);

    match args.output {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "tiers_completed": outcome.tiers_completed,
                "builds_tested": outcome.builds_tested,
                "stop_reason": outcome.stop_reason,
                "report": report,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => print_report(&report, outcome.tiers_completed, outcome.builds_tested),
    }
    Ok(())
}

fn print_report(report: &RankedReport, tiers: usize, tested: usize) {
    println!("=== Optimization Report ===");
    println!(
        "Backend:  {:?}{}",
        report.selection.selected,
        if report.selection.gate_override {
            " (safety gate override)"
        } else {
            ""
        }
    );
    println!("Tiers:    {tiers}   Builds tested: {tested}");
    if report.aborted_runs > 0 || report.overflow_runs > 0 {
        println!(
            "Excluded: {} aborted, {} overflowed runs",
            report.aborted_runs, report.overflow_runs
        );
    }
    for d in &report.disagreements {
        println!(
            "Warning:  backends disagree on {} by {:+.1}% (reference {:.4e}, accelerated {:.4e})",
            d.metric,
            d.deviation * 100.0,
            d.reference,
            d.accelerated
        );
    }
    println!();
    for entry in &report.entries {
        println!(
            "#{:<2} score {:>12.2}  stage {:>6.1} ± {:<5.1}  loot/h {:>10.3e}  survival {:>5.1}%",
            entry.rank,
            entry.score,
            entry.stats.avg_stage,
            entry.stats.std_stage,
            entry.stats.avg_loot_per_hour,
            entry.stats.survival_rate * 100.0,
        );
        if let Some(delta) = &entry.baseline_delta {
            println!(
                "    vs baseline: stage {:+.1}%  loot {:+.1}%  xp {:+.1}%",
                delta.stage_pct, delta.loot_pct, delta.xp_pct
            );
        }
        let talents: Vec<String> = entry
            .build
            .talents()
            .iter()
            .map(|(id, lvl)| format!("{id}={lvl}"))
            .collect();
        println!("    talents: {}", talents.join(" "));
        let attributes: Vec<String> = entry
            .build
            .attributes()
            .iter()
            .map(|(id, lvl)| format!("{id}={lvl}"))
            .collect();
        println!("    attributes: {}", attributes.join(" "));
    }
}

fn parity(args: ParityArgs) -> Result<()> {
    let kind: HunterKind = args.kind.into();
    let config = EngineConfig {
        sims_per_build: args.sims,
        seed: args.seed,
        ..EngineConfig::default()
    };

    let generator = BuildGenerator::new(kind, args.level);
    let mut rng = SmallRng::seed_from_u64(config.seed.unwrap_or(0x5eed));
    let mut corpus = Vec::with_capacity(args.corpus + 1);
    corpus.push(Build::minimal(kind, args.level)?);
    for _ in 0..args.corpus {
        corpus.push(generator.random_build(&mut rng)?);
    }

    let disagreements = check_parity(&corpus, &config)?;
    if disagreements.is_empty() {
        println!(
            "parity OK: {} builds x {} sims, all aggregates within tolerance",
            corpus.len(),
            args.sims
        );
    } else {
        println!("{} disagreement(s) beyond tolerance:", disagreements.len());
        for d in &disagreements {
            println!(
                "  {}: reference {:.4e} vs accelerated {:.4e} ({:+.1}%)  [{}]",
                d.metric,
                d.reference,
                d.accelerated,
                d.deviation * 100.0,
                d.build
            );
        }
    }
    Ok(())
}
