use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smart_config::{ConfigLoader, SmartConfig};
use smart_server::{logging, run_agent, MasterContext, SignalHandler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "smart.toml")]
    config: PathBuf,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the rule engine, cmdlet scheduler and agent listener
    Master {
        /// Rule to submit and activate at startup, may be repeated
        #[arg(long = "rule")]
        rules: Vec<String>,
    },
    /// Register with a master and execute dispatched cmdlets
    Agent,
}

impl Role {
    fn name(&self) -> &'static str {
        match self {
            Role::Master { .. } => "master",
            Role::Agent => "agent",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new().with_file(&args.config).load()?;

    logging::init_tracing(&config.logging)?;
    info!(config = %args.config.display(), role = args.role.name(), "Starting SmartServer");
    smart_core::init();

    if let Some(listen) = &config.metrics.listen {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("Invalid metrics listen address: {}", listen))?;
        smart_server::metrics::init_metrics(addr, args.role.name())?;
    }

    let signals = Arc::new(SignalHandler::new());
    match args.role {
        Role::Master { rules } => run_master(config, rules, signals).await,
        Role::Agent => {
            let shutdown = signals.watch();
            let waiter = signals.clone();
            tokio::spawn(async move {
                if let Err(e) = waiter.wait_for_system_signal().await {
                    error!(error = %e, "Failed to install signal handlers");
                }
            });
            run_agent(&config, shutdown).await
        }
    }
}

async fn run_master(config: SmartConfig, rules: Vec<String>, signals: Arc<SignalHandler>) -> Result<()> {
    let mut context = MasterContext::build(config).await?;
    context.start().await?;

    for text in rules {
        match context.submit_rule(&text).await {
            Ok(rule_id) => info!(rule_id, "Rule submitted"),
            Err(e) => error!(rule = %text, error = %e, "Failed to submit rule"),
        }
    }

    signals.wait_for_system_signal().await?;
    context.shutdown().await
}
