use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::host::{self, HostOptions, StopReason};
use crate::init::{InitBuilder, InitOptions};
use crate::interpreter::{parse_program, Val};
use crate::scheduler::{JobOutcome, Scheduler};

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Tempo - run tag-controlled concurrent programs", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program (JSON syntax tree) until it goes idle
    Run {
        /// Program file
        program: PathBuf,

        /// Use the wall clock instead of simulated time
        #[arg(long)]
        realtime: bool,

        /// Scheduler period in milliseconds
        #[arg(long)]
        period_ms: Option<u64>,

        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<u64>,
    },

    /// Check that a program file is a well-formed syntax tree
    Check {
        /// Program file
        program: PathBuf,
    },

    /// Print the resolved configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            program,
            realtime,
            period_ms,
            max_cycles,
        } => {
            let mut init = InitBuilder::new();
            if let Some(path) = cli.config {
                init = init.config_path(path);
            }
            if let Some(ms) = period_ms {
                init = init.period_ms(ms);
            }
            if realtime {
                init = init.realtime(true);
            }
            let config = init.init()?;

            let ast = parse_program(&read_program(&program)?)?;
            let mut scheduler = Scheduler::new(config.scheduler.clone());
            let main = scheduler.spawn("main", ast)?;

            let (report, mut scheduler) = host::run(scheduler, HostOptions { max_cycles }).await?;

            for line in scheduler.take_output() {
                println!("{}", line);
            }

            if report.reason == StopReason::CycleLimit {
                eprintln!("Stopped after {} cycles", report.cycles);
            }
            match main.outcome() {
                Some(JobOutcome::Failed(exception)) => {
                    anyhow::bail!("uncaught exception: {}", exception)
                }
                Some(JobOutcome::Fault(message)) => anyhow::bail!(message),
                Some(JobOutcome::Value(Val::Void)) => {}
                Some(JobOutcome::Value(value)) => println!("{}", value),
                Some(JobOutcome::Stopped(value)) => eprintln!("main job stopped: {}", value),
                Some(JobOutcome::Terminated) => eprintln!("main job terminated"),
                None => eprintln!("main job did not finish ({})", main.status()),
            }
        }

        Commands::Check { program } => {
            let ast = parse_program(&read_program(&program)?)?;
            println!("✓ {} nodes", ast.nodes.len());
        }

        Commands::Config => {
            let options = InitOptions {
                config_path: cli.config,
                ..Default::default()
            };
            let config = crate::init::load_config(&options)?;
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn read_program(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
