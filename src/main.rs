use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use workervisor::cli::Args;
use workervisor::config::{self, SupervisorConfig};
use workervisor::control::Toolbox;
use workervisor::logging;
use workervisor::manager::{self, Supervisor};
use workervisor::signals::SignalListener;

fn main() {
    let args = Args::parse();

    let mut cfg = match config::load_supervisor_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            std::process::exit(1);
        }
    };
    args.apply(&mut cfg);

    if let Err(e) = logging::init(&cfg.log_file) {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(real_main(cfg)) {
        error!("Fall: {e:#}.");
        std::process::exit(1);
    }
}

async fn real_main(mut cfg: SupervisorConfig) -> Result<()> {
    manager::check_directories(&cfg)?;
    cfg.tools = cfg.tools.resolved();

    let signals = SignalListener::new()
        .context("Failed to install signal handlers")?
        .spawn_dispatcher();
    let tools = Toolbox::system(&cfg);

    info!("workervisor started (pid {})", std::process::id());
    Supervisor::new(cfg, tools).run(signals).await?;
    info!("workervisor exiting");
    Ok(())
}
