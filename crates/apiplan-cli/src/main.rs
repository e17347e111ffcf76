//! apiplan CLI - plan-driven black-box API testing

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use apiplan_core::{Config, Db, Document};
use apiplan_runner::{HttpTransport, Plan, Session};

#[derive(Parser)]
#[command(name = "apiplan")]
#[command(about = "Run YAML test plans against an API described by a Swagger document")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test plan
    Run {
        /// Swagger document (overrides the config file)
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Test plan (overrides the config file)
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Endpoint override
        #[arg(long)]
        base_url: Option<String>,

        /// PRNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Config file (default: .apiplan.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write an example config file
    Init,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(3)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            spec,
            plan,
            base_url,
            seed,
            config,
        } => {
            let mut cfg = match config {
                Some(path) => Config::load(&path)?,
                None => Config::load_default()?,
            };
            if let Some(spec) = spec {
                cfg.spec = spec;
            }
            if let Some(plan) = plan {
                cfg.plan = plan;
            }
            if base_url.is_some() {
                cfg.base_url = base_url;
            }
            if seed.is_some() {
                cfg.seed = seed;
            }

            let document = Document::load(&cfg.spec).context("loading the API description")?;
            let plan = Plan::load(&cfg.plan).context("loading the test plan")?;
            let transport = HttpTransport::new()?;
            let mut session = Session::new(Db::new(document), Box::new(transport), cfg.seed)
                .with_headers(cfg.headers.into_iter().collect());
            if let Some(base) = cfg.base_url {
                session = session.with_base_url(base);
            }

            let outcomes = plan.run_all(&mut session);
            let mut failed = 0usize;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(_) => println!("ok    {}", outcome.name),
                    Err(e) => {
                        failed += 1;
                        println!("error {}: {e}", outcome.name);
                    }
                }
            }
            println!("{} tests, {} failed", outcomes.len(), failed);
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Commands::Init => {
            let path = Path::new(".apiplan.toml");
            if path.exists() {
                anyhow::bail!(".apiplan.toml already exists");
            }
            std::fs::write(path, Config::example()).context("writing .apiplan.toml")?;
            println!("Wrote .apiplan.toml");
            Ok(ExitCode::SUCCESS)
        }
    }
}
