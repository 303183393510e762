// Loan Reconciliation - CLI
//
//   loan-recon run   --data-dir data --output-dir reports [--archive-db recon.db]
//   loan-recon check --data-dir data

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use loan_reconciliation::{
    data_quality::DataQualityEngine, Pipeline, PipelineConfig, PortfolioSnapshot, RunPaths,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "loan-recon")]
#[command(about = "Reconcile origination vs accounting loan ledgers and build portfolio reports")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline and publish reports
    Run(RunArgs),
    /// Load the three input tables and validate their columns only
    Check {
        #[arg(long, env = "RECON_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory holding originacion.csv, contabilidad.csv and riesgo.csv
    #[arg(long, env = "RECON_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Report directory (replaced as a whole on success)
    #[arg(long, env = "RECON_OUTPUT_DIR", default_value = "reports")]
    output_dir: PathBuf,

    /// JSON config file; CLI flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Absolute amount tolerance for a mismatch
    #[arg(long, env = "RECON_TOLERANCE")]
    tolerance: Option<f64>,

    /// Quantile of abs_difference above which a row is an anomaly
    #[arg(long, env = "RECON_ANOMALY_QUANTILE")]
    anomaly_quantile: Option<f64>,

    /// Fail when the risk table repeats a LoanID instead of fanning out
    #[arg(long)]
    strict_risk_keys: bool,

    /// Also archive the run into this SQLite database
    #[arg(long, env = "RECON_ARCHIVE_DB")]
    archive_db: Option<PathBuf>,

    /// Run the pipeline and print KPIs as JSON without writing anything
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(quantile) = self.anomaly_quantile {
            config.anomaly_quantile = quantile;
        }
        if self.strict_risk_keys {
            config.strict_risk_keys = true;
        }

        config.validate()?;
        Ok(config)
    }

    fn paths(&self) -> RunPaths {
        let paths = RunPaths::new(&self.data_dir, &self.output_dir);
        match &self.archive_db {
            Some(db) => paths.with_archive(db),
            None => paths,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Check { data_dir } => check(data_dir),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let config = args.pipeline_config()?;
    let pipeline = Pipeline::new(config)?;
    let paths = args.paths();

    println!("⚖️  Loan Reconciliation v{}", loan_reconciliation::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if args.dry_run {
        let snapshot = PortfolioSnapshot::load(&paths.data_dir)
            .with_context(|| format!("Failed to load inputs from {}", paths.data_dir.display()))?;
        let reports = pipeline.run(&snapshot)?;
        println!("{}", serde_json::to_string_pretty(&reports.kpis)?);
        return Ok(());
    }

    let (reports, published) = pipeline
        .run_and_publish(&paths)
        .context("Reconciliation run failed; no reports were published")?;

    println!("\n📊 {}", reports.reconciliation.summary());
    println!("📊 {}", reports.kpis.summary());
    println!("🔍 {}", DataQualityEngine::new().batch_summary(&reports.quality).summary());
    for p in &published {
        println!("✓ {} artifacts -> {}", p.artifacts.len(), p.location);
    }
    println!("\n✅ Run {} complete", reports.run_id);

    Ok(())
}

fn check(data_dir: PathBuf) -> Result<()> {
    let snapshot = PortfolioSnapshot::load(&data_dir)
        .with_context(|| format!("Input check failed for {}", data_dir.display()))?;

    println!("✓ origination: {} rows", snapshot.origination.len());
    println!("✓ accounting:  {} rows", snapshot.accounting.len());
    println!("✓ risk:        {} rows", snapshot.risk.len());
    println!("✅ All required columns present");
    Ok(())
}
