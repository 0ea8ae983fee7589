//! Command-line driver: run one comparison scenario and print its report.

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;

use dilconv::{BenchmarkHarness, ConvConfig, Scenario, ScenarioKind, Verdict, DEFAULT_TOLERANCE};

#[derive(Parser)]
#[command(
    name = "dilconv",
    version,
    about = "Benchmark the provider engine against the tiled pipeline and check they agree"
)]
struct Cli {
    /// Seed for the random inputs (entropy-seeded when absent)
    #[arg(long, global = true, env = "DILCONV_SEED")]
    seed: Option<u64>,

    /// Worker threads per engine (default: one per core)
    #[arg(long, global = true, env = "DILCONV_THREADS")]
    threads: Option<usize>,

    /// Absolute tolerance of the equivalence check
    #[arg(long, global = true, default_value_t = DEFAULT_TOLERANCE)]
    tolerance: f32,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plain convolution (dilation 0, best of 10 x 10 runs)
    Conv(Shape),
    /// Dilated convolution (dilation 31, one timed run)
    Dilated(Shape),
    /// Dilated convolution followed by batch normalization
    Fused {
        #[command(flatten)]
        shape: Shape,
        /// Normalization epsilon
        #[arg(long)]
        epsilon: Option<f32>,
    },
}

/// Overrides for the scenario defaults.
#[derive(Args, Clone)]
struct Shape {
    #[arg(long)]
    n: Option<usize>,
    #[arg(long)]
    ci: Option<usize>,
    #[arg(long)]
    co: Option<usize>,
    /// Output width
    #[arg(long)]
    width: Option<usize>,
    /// Output height
    #[arg(long)]
    height: Option<usize>,
    /// Square kernel size
    #[arg(long)]
    kernel: Option<usize>,
    /// Dilation on both spatial axes
    #[arg(long)]
    dilation: Option<usize>,
    #[arg(long)]
    warmup: Option<usize>,
    /// Runs per timed block
    #[arg(long)]
    runs: Option<usize>,
    /// Timed blocks; the best block mean is reported
    #[arg(long)]
    samples: Option<usize>,
}

impl Shape {
    fn apply(&self, config: &mut ConvConfig, harness: &mut BenchmarkHarness) {
        let set = |slot: &mut usize, value: Option<usize>| {
            if let Some(v) = value {
                *slot = v;
            }
        };
        set(&mut config.n, self.n);
        set(&mut config.ci, self.ci);
        set(&mut config.co, self.co);
        set(&mut config.w, self.width);
        set(&mut config.h, self.height);
        set(&mut config.kw, self.kernel);
        set(&mut config.kh, self.kernel);
        set(&mut config.dw, self.dilation);
        set(&mut config.dh, self.dilation);
        set(&mut harness.warmup_runs, self.warmup);
        set(&mut harness.timed_runs, self.runs);
        set(&mut harness.samples, self.samples);
    }
}

fn build(cli: &Cli) -> Result<Scenario> {
    let (kind, shape, epsilon) = match &cli.command {
        Command::Conv(shape) => (ScenarioKind::Conv, shape, None),
        Command::Dilated(shape) => (ScenarioKind::Dilated, shape, None),
        Command::Fused { shape, epsilon } => (ScenarioKind::Fused, shape, *epsilon),
    };
    let mut scenario = Scenario::new(kind);
    shape.apply(&mut scenario.config, &mut scenario.harness);
    scenario.harness = BenchmarkHarness::new(
        scenario.harness.warmup_runs,
        scenario.harness.timed_runs,
        scenario.harness.samples,
    )?;
    if epsilon.is_some() {
        scenario.epsilon = epsilon;
    }
    scenario.tolerance = cli.tolerance;
    scenario.seed = cli.seed;
    scenario.threads = cli.threads;
    Ok(scenario)
}

fn run(cli: &Cli) -> Result<Verdict> {
    let scenario = build(cli).context("invalid scenario options")?;
    log::info!("running {:?} with {:?}", scenario.kind, scenario.config);
    let report = scenario
        .run()
        .with_context(|| format!("{:?} scenario failed", scenario.kind))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        writeln!(out, "{}", report.to_json()?)?;
    } else {
        report.write_text(&mut out)?;
    }
    Ok(report.verdict)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match run(&cli) {
        Ok(verdict) => ExitCode::from(verdict.exit_status()),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
