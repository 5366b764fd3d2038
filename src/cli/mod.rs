//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxentity")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(long, global = true, default_value = "warn", help = "Log filter directive")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "validate", about = "Validate a configuration file")]
    Validate(ValidateArgs),

    #[command(name = "status", about = "Connect to the configured cache backend and ping it")]
    Status(StatusArgs),

    #[command(name = "metrics", about = "Get cache metrics")]
    Metrics(MetricsArgs),
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[arg(short, long, help = "Path to the TOML configuration")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[arg(short, long, help = "Path to the TOML configuration")]
    pub config: PathBuf,

    #[arg(short, long, help = "Show detailed information")]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub struct MetricsArgs {
    #[arg(short, long, help = "Register the namespace from this configuration first")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Namespace to query")]
    pub namespace: Option<String>,

    #[arg(short, long, help = "Output in Prometheus format")]
    pub prometheus: bool,
}

mod metrics;
mod status;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("oxentity", &cli.log_level);

    match &cli.command {
        Commands::Validate(args) => status::validate(args),
        Commands::Status(args) => status::execute(args).await,
        Commands::Metrics(args) => metrics::execute(args).await,
    }
}
