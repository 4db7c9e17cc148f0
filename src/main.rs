use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};

use conductor::{session, ConductorConfig};

/// Execute a multi-agent motion plan on connected robots
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML problem instance (agents with x_init/y_init/x_goal/y_goal)
    #[arg(short, long)]
    instance: Option<PathBuf>,

    /// YAML configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum robot speed
    #[arg(long)]
    max_speed: Option<u8>,

    /// Port edge adapters connect to
    #[arg(short, long)]
    port: Option<u16>,

    /// Upper bound on the number of agents
    #[arg(short = 'k', long)]
    num_agents: Option<usize>,

    /// Extra wait for late edge adapters (ms)
    #[arg(short, long)]
    wait_time: Option<u64>,

    /// Swap starts and goals
    #[arg(short, long)]
    reversed: bool,

    /// Use the robots' current positions as starts
    #[arg(short = 's', long)]
    use_current_starts: bool,

    /// Planning service address
    #[arg(short = 'A', long)]
    planning_address: Option<String>,

    /// Planning service port
    #[arg(short = 'P', long)]
    planning_port: Option<u16>,

    /// Lookahead past the last triggered action when freezing timelines
    #[arg(short = 'c', long)]
    commit_offset: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<Level>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn log_level(&self) -> Level {
        if let Some(level) = self.log_level {
            return level;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn into_config(self) -> Result<ConductorConfig> {
        let mut config = match &self.config {
            Some(path) => ConductorConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ConductorConfig::default(),
        };

        if self.instance.is_some() {
            config.instance = self.instance;
        }
        if let Some(max_speed) = self.max_speed {
            config.max_speed = max_speed;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(num_agents) = self.num_agents {
            config.num_agents = num_agents;
        }
        if let Some(wait_time) = self.wait_time {
            config.wait_time_ms = wait_time;
        }
        config.reversed |= self.reversed;
        config.use_current_starts |= self.use_current_starts;
        if let Some(address) = self.planning_address {
            config.planning_address = address;
        }
        if let Some(port) = self.planning_port {
            config.planning_port = port;
        }
        if let Some(offset) = self.commit_offset {
            config.commit_offset = offset;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .init();

    let config = args.into_config()?;
    let report = session::run(config).await?;

    info!("Run finished: {} agents", report.agents);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
