// CLI module - Runs the bundled demo application under the orchestrator

pub mod output;

use crate::config::ForemanConfig;
use crate::demo::{EchoServer, Heartbeat, SleepJob};
use crate::error::{ForemanError, Result};
use crate::logging::init_logging;
use crate::registry::MemoryRegistry;
use crate::reload::{inherited_listeners, is_forked_child};
use crate::runtime::Foreman;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Foreman - application lifecycle orchestrator
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Started by a reload: reuse the listeners handed down by the parent
    #[arg(short = 'r', long = "reload")]
    reload: bool,

    /// Address the echo server listens on
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    listen: String,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Run a sleep job for this many seconds instead of serving
    #[arg(long, value_name = "SECS")]
    job: Option<u64>,

    /// Seconds between heartbeat log lines
    #[arg(long, value_name = "SECS", default_value = "30")]
    heartbeat: u64,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<()> {
        let config = self.load_config()?;
        let level = self
            .log_level
            .clone()
            .unwrap_or_else(|| config.log_level.clone());
        init_logging(&level);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ForemanError::Other(format!("Failed to start runtime: {}", e)))?;

        runtime.block_on(self.serve(config))
    }

    fn load_config(&self) -> Result<ForemanConfig> {
        match &self.config {
            Some(path) => ForemanConfig::from_file(path),
            None => Ok(ForemanConfig::default()),
        }
    }

    async fn serve(&self, config: ForemanConfig) -> Result<()> {
        if self.heartbeat == 0 {
            return Err(ForemanError::InvalidConfig(
                "--heartbeat must be at least 1 second".to_string(),
            ));
        }

        let mut inherited = if self.reload {
            if !is_forked_child() {
                warn!("--reload given but no listeners were handed down, binding fresh");
            }
            inherited_listeners()?
        } else {
            Vec::new()
        };

        let echo = EchoServer::bind_or_inherit("echo", &self.listen, &mut inherited).await?;
        for unused in inherited {
            warn!("Closing unused inherited listener {}", unused.name);
        }

        let disable_banner = config.disable_banner;
        let mut builder = Foreman::builder()
            .config(config)
            .registry(MemoryRegistry::new())
            .reload_server(echo)
            .cron(Heartbeat::new(Duration::from_secs(self.heartbeat)))
            .after_stop(|| async {
                info!("Demo stopped");
                Ok(())
            });

        if let Some(secs) = self.job {
            builder = builder.job(SleepJob::new("sleep", Duration::from_secs(secs)));
        }

        let foreman = builder.build()?;

        if !disable_banner {
            output::print_banner(env!("CARGO_PKG_VERSION"), std::process::id());
            output::print_components(&foreman.components());
            if self.job.is_some() {
                output::print_info("Job mode: ordered servers are skipped, exiting when jobs finish");
            }
        }

        foreman.run().await
    }
}
