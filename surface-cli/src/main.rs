use anyhow::Result;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use surface_core::{summarise, validate, InputSource, Ldd, Outcome, Report, Status, ValidatorConfig};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Deploy surface validator
#[derive(Parser)]
#[command(
    name = "surface-check",
    about = "Check that a container's deploy binaries and their interpreters and shared libraries are present",
    version,
    author
)]
struct Cli {
    /// Colon-separated binaries to check [default: $DEPLOY_BINS]
    #[arg(long)]
    deploy_bins: Option<String>,

    /// Colon-separated directories whose executables are checked [default: $DEPLOY_PATH]
    #[arg(long)]
    deploy_path: Option<String>,

    /// Files checked per directory, 0 for unlimited [default: $DEPLOY_MAX_FILES]
    #[arg(long)]
    max_files: Option<usize>,

    /// Shared-library inspector to run on native binaries
    #[arg(long, default_value = surface_core::DEFAULT_INSPECTOR)]
    ldd: PathBuf,

    /// Also run each top-level entry once and capture its output
    #[arg(long)]
    capture_output: bool,

    /// Seconds a captured run may take before it is killed
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Flat list of checks with totals
    Json,
    /// One dependency tree per entry point
    Tree,
    /// Human-readable table
    Table,
    /// One line item per declared binary
    Summary,
}

impl Cli {
    fn config(&self) -> ValidatorConfig {
        let mut source = InputSource::from_env();
        if let Some(bins) = &self.deploy_bins {
            source.deploy_bins = Some(bins.clone());
        }
        if let Some(dirs) = &self.deploy_path {
            source.deploy_path = Some(dirs.clone());
        }

        let mut config = ValidatorConfig::from_source(&source);
        if let Some(cap) = self.max_files {
            config.max_files_per_dir = (cap > 0).then_some(cap);
        }
        config.inspector = self.ldd.clone();
        config.capture_output = self.capture_output;
        config.launch_timeout = Duration::from_secs(self.timeout_secs);
        config
    }
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Check")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn paint(status: Status) -> String {
    let text = status.to_string();
    match status {
        Status::Passed => text.green().to_string(),
        Status::Failed => text.red().bold().to_string(),
        Status::Skipped => text.yellow().to_string(),
    }
}

fn print_json<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_table(out: &mut impl Write, report: &Report) -> Result<()> {
    let rows = report.tests.iter().map(|r| Row {
        name: r.name.clone(),
        status: paint(r.status),
        message: r.message.clone(),
    });
    let mut table = Table::new(rows);
    table.with(Style::modern());
    writeln!(out, "{table}")?;
    writeln!(
        out,
        "{} checks: {} passed, {} failed, {} skipped => {}",
        report.total,
        report.passed,
        report.failed,
        report.skipped,
        paint(report.status())
    )?;
    Ok(())
}

fn render(format: Format, outcome: &Outcome) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        Format::Json => print_json(&mut out, &outcome.report),
        Format::Tree => print_json(&mut out, &outcome.tree),
        Format::Summary => print_json(&mut out, &summarise(&outcome.report)),
        Format::Table => print_table(&mut out, &outcome.report),
    }?;
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = cli.config();
    log::debug!(
        "bins {:?}, dirs {:?}, cap {:?}, inspector {}",
        config.deploy_bins,
        config.deploy_dirs,
        config.max_files_per_dir,
        config.inspector.display()
    );
    let ldd = Ldd::new(&config.inspector);
    let outcome = validate(&config, &ldd);

    render(cli.format, &outcome)?;

    let code = outcome.report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
