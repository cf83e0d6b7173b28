//! printloop CLI: drive the closed-loop print pipeline.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use printloop::sim::{serpentine_plan, SerpentineSpec, SimBench, SimConfig};
use printloop::{CorrectionMode, PipelineConfig, PrintDir, PrintPlan};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "printloop")]
#[command(about = "Closed-loop scan/measure/correct/stream pipeline for extrusion printing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the simulated bench and write diagnostics.
    Simulate(CliSimulateArgs),

    /// Print a summary of a plan JSON file.
    PlanInfo {
        /// Path to the plan (JSON).
        #[arg(long)]
        plan: PathBuf,
    },

    /// Print the default pipeline configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Clone, Args)]
struct CliSimulateArgs {
    /// Plan to print (JSON). A serpentine demo plan is built when omitted.
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Pipeline configuration (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for diagnostics.
    #[arg(long)]
    out: PathBuf,

    /// Also write the plan that was printed to this path (JSON).
    #[arg(long)]
    write_plan: Option<PathBuf>,

    /// Number of rods in the demo serpentine.
    #[arg(long, default_value = "8")]
    rods: usize,

    /// Rod length of the demo serpentine (mm).
    #[arg(long, default_value = "20.0")]
    rod_length: f64,

    /// Simulated bead width bias (mm) added to the material model.
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    bias: f64,

    /// Simulated bead width noise amplitude (mm).
    #[arg(long, default_value = "0.0")]
    noise: f64,

    /// Seed for the simulated noise.
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Override the correction mode from the configuration.
    #[arg(long, value_enum)]
    mode: Option<CorrectionModeArg>,

    /// Override the correction lookahead (segments).
    #[arg(long)]
    lookahead: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CorrectionModeArg {
    PassThrough,
    Feedback,
}

impl CorrectionModeArg {
    fn to_core(self) -> CorrectionMode {
        match self {
            Self::PassThrough => CorrectionMode::PassThrough,
            Self::Feedback => CorrectionMode::Feedback,
        }
    }
}

impl CliSimulateArgs {
    fn to_config(&self) -> CliResult<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(mode) = self.mode {
            config.correction.mode = mode.to_core();
        }
        if let Some(lookahead) = self.lookahead {
            config.correction.lookahead = lookahead;
        }
        config.validate()?;
        Ok(config)
    }

    fn to_plan(&self, config: &PipelineConfig) -> CliResult<PrintPlan> {
        let mut plan = match &self.plan {
            Some(path) => {
                tracing::info!("Loading plan: {}", path.display());
                PrintPlan::from_json_file(path)?
            }
            None => {
                let spec = SerpentineSpec {
                    rods: self.rods,
                    rod_length_mm: self.rod_length,
                    ..SerpentineSpec::default()
                };
                let model = config.correction.controller.model().cloned().unwrap_or_default();
                serpentine_plan(&spec, &model)?
            }
        };
        plan.extend_leadout(config.stream.leadout_mm);
        Ok(plan)
    }

    fn to_sim(&self, config: &PipelineConfig) -> SimConfig {
        SimConfig {
            scan: config.scan.clone(),
            model: config.correction.controller.model().cloned().unwrap_or_default(),
            width_bias_mm: self.bias,
            noise_mm: self.noise,
            seed: self.seed,
            ..SimConfig::default()
        }
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => run_simulate(&args),
        Commands::PlanInfo { plan } => run_plan_info(&plan),
        Commands::DefaultConfig => run_default_config(),
    }
}

// ── default-config ────────────────────────────────────────────────────

fn run_default_config() -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
    Ok(())
}

// ── plan-info ─────────────────────────────────────────────────────────

fn dir_name(dir: PrintDir) -> &'static str {
    match dir {
        PrintDir::XPos => "+X",
        PrintDir::XNeg => "-X",
        PrintDir::YPos => "+Y",
        PrintDir::YNeg => "-Y",
    }
}

fn run_plan_info(path: &std::path::Path) -> CliResult<()> {
    let plan = PrintPlan::from_json_file(path)?;
    let raster = plan.raster;
    let measured = plan.segments.iter().filter(|s| s.roi.is_some()).count();

    println!("printloop plan {}", path.display());
    println!("  schema:         {}", plan.schema);
    println!(
        "  raster:         {}x{} px @ {} mm/px, origin ({:.2}, {:.2}) mm",
        raster.width_px, raster.height_px, raster.mm_per_px, raster.origin[0], raster.origin[1]
    );
    println!("  mask width:     {} mm", raster.mask_width_mm);
    println!(
        "  segments:       {} ({} measured)",
        plan.segments.len(),
        measured
    );
    println!("  waypoints:      {}", plan.waypoint_count());

    for (i, seg) in plan.segments.iter().enumerate() {
        let roi = match seg.roi {
            Some(r) => format!("roi {}x{}+{}+{}", r.width, r.height, r.x, r.y),
            None => "no roi".to_string(),
        };
        println!(
            "  [{:3}] layer {} {} {:4} wp  {}  done @ ({:.2}, {:.2})",
            i,
            seg.layer,
            dir_name(seg.direction),
            seg.waypoints.len(),
            roi,
            seg.scan_done_pt[0],
            seg.scan_done_pt[1]
        );
    }

    Ok(())
}

// ── simulate ──────────────────────────────────────────────────────────

fn run_simulate(args: &CliSimulateArgs) -> CliResult<()> {
    let config = args.to_config()?;
    let plan = args.to_plan(&config)?;
    tracing::info!(
        "Plan: {} segments, {} waypoints, raster {}x{}",
        plan.segments.len(),
        plan.waypoint_count(),
        plan.raster.width_px,
        plan.raster.height_px,
    );

    if let Some(path) = &args.write_plan {
        plan.write_json_file(path)?;
        tracing::info!("Plan written to {}", path.display());
    }

    let bench = SimBench::new(plan.raster, args.to_sim(&config));
    let out = printloop::run_pipeline(plan, &config, bench.scanner(), bench.machine())?;

    let stats = bench.stats();
    tracing::info!(
        "Simulated {} print moves, {} scanner acquisitions",
        stats.print_moves,
        stats.acquisitions,
    );
    tracing::info!(
        "Measured {}/{} segments, {} buffer-full retries",
        out.report.measured_segments,
        out.report.segments,
        out.report.stream.buffer_full_retries,
    );

    printloop::diagnostics::write_run_diagnostics(&args.out, &out)?;
    tracing::info!("Diagnostics written to {}", args.out.display());

    Ok(())
}
