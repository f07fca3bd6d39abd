use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use plexfix_core::{RepairOutcome, RunReport, Session, Toolkit};
use plexfix_host::{
    ContainerCli, HostAccounts, HostServiceManager, SqliteCli, DEFAULT_CONTAINER_CLI,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod terminal;

use terminal::TerminalOperator;

#[derive(Debug, Parser)]
#[command(name = "plexfix", version)]
#[command(about = "Offline integrity check and repair of the Plex Media Server library database")]
struct Cli {
    /// Where timestamped backups are written [default: ~/plex-db-backups]
    #[arg(long, env = "PLEXFIX_BACKUP_ROOT")]
    backup_root: Option<PathBuf>,

    /// Docker-compatible CLI used for container installs
    #[arg(long, env = "PLEXFIX_CONTAINER_CLI", default_value = DEFAULT_CONTAINER_CLI)]
    container_cli: String,

    /// Log filter, e.g. `info` or `plexfix_core=debug`
    #[arg(long, env = "PLEXFIX_LOG", default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(&cli) {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .init();
}

fn run(cli: &Cli) -> Result<RunReport> {
    let settings = config::settings(cli.backup_root.clone())?;
    let services = HostServiceManager::new();
    let containers = ContainerCli::new(cli.container_cli.clone());
    let toolkit = Toolkit {
        services: &services,
        containers: &containers,
        shell: &SqliteCli,
        accounts: &HostAccounts,
    };

    let stdin = io::stdin();
    let mut operator = TerminalOperator::new(stdin.lock(), io::stdout());
    Session::new(toolkit, &settings).run(&mut operator)
}

fn print_summary(report: &RunReport) {
    println!();
    println!("profile:   {}", report.profile);
    println!("database:  {}", report.database.display());
    println!("backup:    {}", report.snapshot_dir.display());
    println!("integrity: {}", report.verdict.as_str());
    let outcome = match &report.outcome {
        RepairOutcome::Healthy { maintained: true } => "REINDEX and VACUUM completed".to_string(),
        RepairOutcome::Healthy { maintained: false } => "no maintenance performed".to_string(),
        RepairOutcome::Rebuilt { broken_file, post_verdict } => format!(
            "rebuilt from dump (post-rebuild check {}), corrupt copy at {}",
            post_verdict.as_str(),
            broken_file.display()
        ),
        RepairOutcome::CorruptKept => "rebuild declined, database left as found".to_string(),
    };
    println!("repair:    {outcome}");
    if report.permissions.chown_failures > 0 {
        println!("ownership: {} entries could not be changed", report.permissions.chown_failures);
    }
    if let Some(verdict) = report.post_check {
        println!("post-check: {}", verdict.as_str());
    }
}
