use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default location of the daemon settings file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/workervisor/workervisor.toml";

/// Stop timeout used when a worker item does not set `stoppingTimeout`.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Top‑level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Directory holding every known worker-definition file.
    pub apps_available_dir: PathBuf,
    /// Directory holding the definition files that are actually loaded.
    pub apps_enabled_dir: PathBuf,
    pub log_file: PathBuf,
    /// Where generated pid files are placed.
    pub pid_dir: PathBuf,
    pub health_interval_secs: u64,
    pub pid_poll_interval_ms: u64,
    pub pid_wait_timeout_secs: u64,
    /// Extra seconds the daemon tool waits after TERM before it sends KILL.
    pub kill_grace_secs: u64,
    /// How long a cancelled background task may take to wind down before it is aborted.
    pub task_join_grace_ms: u64,
    pub tools: ToolPaths,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            apps_available_dir: "/etc/workervisor/apps-available".into(),
            apps_enabled_dir: "/etc/workervisor/apps-enabled".into(),
            log_file: "/var/log/workervisor/workervisor.log".into(),
            pid_dir: "/tmp".into(),
            health_interval_secs: 5,
            pid_poll_interval_ms: 250,
            pid_wait_timeout_secs: 60,
            kill_grace_secs: 5,
            task_join_grace_ms: 2000,
            tools: ToolPaths::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn pid_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pid_poll_interval_ms.max(1))
    }

    pub fn pid_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.pid_wait_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn task_join_grace(&self) -> Duration {
        Duration::from_millis(self.task_join_grace_ms)
    }
}

/// External programs the supervisor drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Daemonization tool (start-stop-daemon compatible).
    pub daemon: String,
    /// Privilege-switching tool (su compatible).
    pub privileged: String,
    /// Web-fetch tool used for `http(s)://` hooks (wget compatible).
    pub fetch: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            daemon: "start-stop-daemon".into(),
            privileged: "su".into(),
            fetch: "wget".into(),
        }
    }
}

impl ToolPaths {
    /// Resolve every tool to an absolute path, keeping the configured name when lookup fails.
    pub fn resolved(&self) -> Self {
        Self {
            daemon: locate(&self.daemon),
            privileged: locate(&self.privileged),
            fetch: locate(&self.fetch),
        }
    }
}

fn locate(tool: &str) -> String {
    match which::which(tool) {
        Ok(path) => path.display().to_string(),
        Err(_) => {
            log::warn!("{tool} not found in PATH, using it as given");
            tool.to_string()
        }
    }
}

/// Load daemon settings. An explicit path must exist; the default path is optional.
pub fn load_supervisor_config(path: Option<&Path>) -> anyhow::Result<SupervisorConfig> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    if !path.exists() {
        if required {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        return Ok(SupervisorConfig::default());
    }

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Executable, raw argument string and credentials of a command, before placeholder
/// substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    #[serde(default)]
    pub exec: String,
    #[serde(default)]
    pub arguments: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl CommandTemplate {
    /// A command whose executable is the given text, with no arguments or credentials.
    pub fn inline(exec: impl Into<String>) -> Self {
        Self {
            exec: exec.into(),
            ..Self::default()
        }
    }
}

/// How a worker item refers to a command: by name, or inline.
///
/// A name that is not in the file's `[commands]` table is taken to be the command itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandRef {
    Name(String),
    Inline(CommandTemplate),
}

impl CommandRef {
    fn is_empty(&self) -> bool {
        match self {
            Self::Name(name) => name.trim().is_empty(),
            Self::Inline(template) => template.exec.trim().is_empty(),
        }
    }

    pub fn resolve(&self, commands: &BTreeMap<String, CommandTemplate>) -> CommandTemplate {
        match self {
            Self::Name(name) => commands
                .get(name)
                .cloned()
                .unwrap_or_else(|| CommandTemplate::inline(name.clone())),
            Self::Inline(template) => template.clone(),
        }
    }
}

/// One worker item as it appears on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerItem {
    pub address: Option<String>,
    pub command: Option<CommandRef>,
    pub before_starting_command: Option<CommandRef>,
    pub after_starting_command: Option<CommandRef>,
    pub before_stopping_command: Option<CommandRef>,
    pub after_stopping_command: Option<CommandRef>,
    pub stopping_timeout: Option<u64>,
}

/// On‑disk TOML description of a set of workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerFile {
    #[serde(default, rename = "worker", alias = "fastcgi")]
    pub workers: Vec<WorkerItem>,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandTemplate>,
}

/// A validated worker definition with every command reference resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub address: String,
    pub command: CommandTemplate,
    pub before_start: Option<CommandTemplate>,
    pub after_start: Option<CommandTemplate>,
    pub before_stop: Option<CommandTemplate>,
    pub after_stop: Option<CommandTemplate>,
    pub stop_timeout: Duration,
}

impl ProcessSpec {
    /// Path of the unix socket for `unix:` addresses.
    pub fn unix_socket_path(&self) -> Option<&Path> {
        unix_socket_path(&self.address)
    }
}

pub fn unix_socket_path(address: &str) -> Option<&Path> {
    address
        .strip_prefix("unix:")
        .filter(|path| !path.is_empty())
        .map(Path::new)
}

/// Parse a worker-definition file into validated specs.
///
/// Items without an address are skipped and logged; a missing main command is
/// logged and replaced with an empty one. Workers are named `<file stem> #<n>`,
/// counting only the items that were kept.
pub fn load_worker_file(path: &Path) -> Result<Vec<ProcessSpec>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: WorkerFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.into_specs(path))
}

impl WorkerFile {
    pub fn into_specs(self, path: &Path) -> Vec<ProcessSpec> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workers".to_string());

        let mut specs = Vec::with_capacity(self.workers.len());
        for (position, item) in self.workers.iter().enumerate() {
            let address = match item.address.as_deref().map(str::trim) {
                Some(address) if !address.is_empty() => address.to_string(),
                _ => {
                    let err = ConfigError::MissingAddress {
                        path: path.to_path_buf(),
                        index: position + 1,
                    };
                    log::error!("{err}. The item will be skipped.");
                    continue;
                }
            };

            let command = match item.command.as_ref().filter(|c| !c.is_empty()) {
                Some(reference) => reference.resolve(&self.commands),
                None => {
                    log::warn!("Command of worker item '{address}' name is empty.");
                    CommandTemplate::default()
                }
            };

            let hook = |reference: &Option<CommandRef>| {
                reference
                    .as_ref()
                    .filter(|r| !r.is_empty())
                    .map(|r| r.resolve(&self.commands))
            };

            specs.push(ProcessSpec {
                name: format!("{stem} #{}", specs.len() + 1),
                command,
                before_start: hook(&item.before_starting_command),
                after_start: hook(&item.after_starting_command),
                before_stop: hook(&item.before_stopping_command),
                after_stop: hook(&item.after_stopping_command),
                stop_timeout: Duration::from_secs(
                    item.stopping_timeout.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
                ),
                address,
            });
        }
        specs
    }
}
