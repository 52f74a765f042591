use std::path::PathBuf;

use clap::Parser;

use crate::config::SupervisorConfig;

#[derive(Parser, Debug, Default)]
#[command(version, about = "workervisor: keeps FastCGI-style workers alive")]
pub struct Args {
    /// Path to configuration file (default /etc/workervisor/workervisor.toml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory with the enabled worker definition files
    #[arg(long)]
    pub apps_enabled: Option<PathBuf>,

    /// Log file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Directory for generated pid files
    #[arg(long)]
    pub pid_dir: Option<PathBuf>,
}

impl Args {
    /// Command-line values win over the configuration file.
    pub fn apply(&self, cfg: &mut SupervisorConfig) {
        if let Some(dir) = &self.apps_enabled {
            cfg.apps_enabled_dir = dir.clone();
        }
        if let Some(file) = &self.log_file {
            cfg.log_file = file.clone();
        }
        if let Some(dir) = &self.pid_dir {
            cfg.pid_dir = dir.clone();
        }
    }
}
