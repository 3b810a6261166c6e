use anyhow::Context;
use clap::{Parser, ValueEnum};
use cloudeyes::model::Severity;
use cloudeyes::report::{write_json, write_markdown};
use cloudeyes::session::{FixtureSession, HttpSession};
use cloudeyes::{run_diagnostics, Report, SessionSet, Settings};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Report formats written at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
    Both,
}

/// Command-line arguments for the cloud diagnostic agent
#[derive(Parser)]
#[command(
    name = "cloudeyes",
    about = "Cloud diagnostic agent - collects metrics and logs and reports rule findings",
    long_about = "Discovers the resources of a cloud account, collects their recent metrics and \
                  log excerpts in parallel under a run deadline, and evaluates diagnostic rules \
                  over the snapshot to produce a report."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Replay a recorded fleet instead of contacting a gateway
    #[arg(long, value_name = "FILE", conflicts_with = "gateway")]
    fixture: Option<PathBuf>,

    /// Base URL of the provider gateway
    #[arg(long, value_name = "URL", env = "CLOUDEYES_GATEWAY")]
    gateway: Option<String>,

    /// Bearer token for the gateway
    #[arg(long, env = "CLOUDEYES_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Region to diagnose (overrides the configuration)
    #[arg(long)]
    region: Option<String>,

    /// Hours of history to collect (overrides the configuration)
    #[arg(long, value_name = "HOURS")]
    lookback: Option<u32>,

    /// Worker pool size (overrides the configuration)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Timeout for a single gateway request
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    request_timeout: u64,

    /// Directory receiving report files
    #[arg(long, value_name = "DIR", default_value = "reports")]
    reports_dir: PathBuf,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in Settings::load
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        match (&self.fixture, &self.gateway) {
            (Some(fixture), _) if !fixture.is_file() => {
                return Err(format!("Fixture file not found: {}", fixture.display()));
            }
            (None, Some(gateway))
                if !gateway.starts_with("http://") && !gateway.starts_with("https://") =>
            {
                return Err(format!("Gateway URL must use http or https: {}", gateway));
            }
            (None, None) => {
                return Err("Either --fixture or --gateway must be given".to_string());
            }
            _ => {}
        }

        if self.lookback == Some(0) {
            return Err("--lookback must be greater than 0".to_string());
        }
        if self.request_timeout == 0 {
            return Err("--request-timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Apply command-line overrides on top of the loaded settings
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(region) = &self.region {
            settings.region = region.clone();
        }
        if let Some(lookback) = self.lookback {
            settings.lookback_hours = lookback;
        }
        if let Some(threads) = self.threads {
            settings.threads = threads;
        }
    }

    fn build_sessions(&self) -> anyhow::Result<SessionSet> {
        if let Some(fixture) = &self.fixture {
            info!("Replaying fixture {}", fixture.display());
            let session = FixtureSession::from_file(fixture)
                .with_context(|| format!("Failed to load fixture {}", fixture.display()))?;
            return Ok(SessionSet::new(Arc::new(session)));
        }

        let gateway = self
            .gateway
            .as_deref()
            .context("No gateway URL configured")?;
        info!("Using provider gateway {}", gateway);
        let session = HttpSession::new(
            gateway,
            self.token.clone(),
            Duration::from_secs(self.request_timeout),
        )
        .context("Failed to create gateway client")?;
        Ok(SessionSet::new(Arc::new(session)))
    }

    fn write_reports(&self, report: &Report) -> anyhow::Result<()> {
        if matches!(self.format, OutputFormat::Json | OutputFormat::Both) {
            write_json(report, &self.reports_dir).context("Failed to write JSON report")?;
        }
        if matches!(self.format, OutputFormat::Markdown | OutputFormat::Both) {
            write_markdown(report, &self.reports_dir)
                .context("Failed to write Markdown report")?;
        }
        Ok(())
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut settings);
    settings.validate().context("Invalid configuration")?;

    let sessions = cli.build_sessions()?;
    let report = run_diagnostics(&settings, &sessions).await?;

    let summary = report.summary();
    info!(
        "{} resources: {} healthy, {} partial, {} failed; {} types failed discovery",
        summary.resources, summary.healthy, summary.partial, summary.failed, summary.failed_types
    );
    info!(
        "Findings: {} critical, {} warning, {} info",
        summary.critical, summary.warning, summary.info
    );
    for finding in report
        .findings
        .iter()
        .filter(|f| f.severity == Severity::Critical)
    {
        warn!("[{}] {}: {}", finding.rule_id, finding.resource, finding.message);
    }

    cli.write_reports(&report)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting cloudeyes");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&cli).await {
        error!("Diagnostic run failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Diagnostics complete");
}
