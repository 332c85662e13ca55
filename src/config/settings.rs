use crate::error::AppResult;
use crate::ssh::KnownHostsPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
///
/// Never holds connection credentials; the active profile lives only in
/// memory (see [`crate::ssh::SessionManager`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub files: FileSettings,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSettings {
    /// Directory browsed and uploaded to when the caller gives no path
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Skip local entries that cannot be stat'ed instead of failing the listing
    #[serde(default)]
    pub skip_unreadable_entries: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("/home")
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            skip_unreadable_entries: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// libssh2 blocking-call timeout; 0 disables it
    #[serde(default)]
    pub operation_timeout_ms: u32,
    /// Keepalive interval in seconds; 0 disables it
    #[serde(default)]
    pub keepalive_interval: u32,
    #[serde(default)]
    pub known_hosts_policy: KnownHostsPolicy,
}

pub fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_ms: 0,
            keepalive_interval: 0,
            known_hosts_policy: KnownHostsPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,
    /// Report probe failures (e.g. missing nvidia-smi) instead of empty data
    #[serde(default)]
    pub surface_probe_errors: bool,
}

fn default_interval() -> u64 {
    2
}

fn default_top_processes() -> usize {
    5
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            top_processes: default_top_processes(),
            surface_probe_errors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "sysdeck=info,warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl AppSettings {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            Self::load_file(&config_path)
        } else {
            let settings = AppSettings::default();
            settings.save(config_dir)?;
            Ok(settings)
        }
    }

    pub fn load_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AppError::file_io(path.display().to_string(), e))?;
        let settings: AppSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, config_dir: &Path) -> AppResult<()> {
        std::fs::create_dir_all(config_dir)?;
        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}
