//! Host metrics: static server info, CPU, disk throughput and GPUs
//!
//! CPU, memory and disk figures always describe the local host. GPU
//! sampling goes through the command executor and works on either target.

pub mod gpu;
pub mod poller;
pub mod system;

pub use gpu::GpuProbe;
pub use poller::{start_poller, MetricsEvent, PollerHandle};
pub use system::SystemProbe;

use crate::config::MonitoringSettings;
use crate::error::AppResult;
use crate::exec::CommandExecutor;
use crate::target::OperationTarget;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub os: OsInfo,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub gpus: Vec<GpuInfo>,
    pub disks: Vec<DiskInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub kernel: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuInfo {
    pub model: String,
    pub cores: usize,
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub total_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuInfo {
    pub model: String,
    /// MiB; `None` when the driver does not report it
    pub vram: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    pub mount: String,
    pub total_gb: u64,
    pub available_gb: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUsage {
    pub name: String,
    pub memory_mb: u64,
    pub pid: u32,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuSnapshot {
    /// Percent, rounded
    pub usage: f32,
    pub processes: Vec<ProcessUsage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskSnapshot {
    pub mount: String,
    pub read_bytes_per_sec: u64,
    pub write_bytes_per_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    pub id: usize,
    pub utilization: u32,
    /// MiB
    pub memory_used: u64,
    pub memory_total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuProcess {
    pub pid: u32,
    pub name: String,
    /// MiB
    pub memory: u64,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GpuSnapshot {
    pub gpus: Vec<GpuDevice>,
    pub processes: Vec<GpuProcess>,
}

/// One poller tick
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSample {
    pub cpu: CpuSnapshot,
    pub disk: Vec<DiskSnapshot>,
    pub gpu: GpuSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl Default for MetricsSample {
    fn default() -> Self {
        Self {
            cpu: CpuSnapshot::default(),
            disk: Vec::new(),
            gpu: GpuSnapshot::default(),
            timestamp: Utc::now(),
        }
    }
}

pub struct Monitor {
    system: Arc<SystemProbe>,
    gpu: GpuProbe,
    interval: Duration,
}

impl Monitor {
    pub fn new(executor: CommandExecutor, settings: &MonitoringSettings) -> Self {
        Self {
            system: Arc::new(SystemProbe::new(settings.top_processes)),
            gpu: GpuProbe::new(executor, settings.top_processes, settings.surface_probe_errors),
            interval: Duration::from_secs(settings.interval_secs.max(1)),
        }
    }

    pub async fn server_info(&self) -> AppResult<ServerInfo> {
        let system = Arc::clone(&self.system);
        let (info, gpus) = tokio::join!(
            tokio::task::spawn_blocking(move || system.server_info()),
            self.gpu.inventory(OperationTarget::Local)
        );
        let mut info = info?;
        info.gpus = gpus?;
        Ok(info)
    }

    pub async fn cpu(&self) -> AppResult<CpuSnapshot> {
        let system = Arc::clone(&self.system);
        Ok(tokio::task::spawn_blocking(move || system.cpu()).await?)
    }

    pub async fn disk(&self) -> AppResult<Vec<DiskSnapshot>> {
        let system = Arc::clone(&self.system);
        Ok(tokio::task::spawn_blocking(move || system.disk()).await?)
    }

    pub async fn gpu(&self, target: OperationTarget) -> AppResult<GpuSnapshot> {
        self.gpu.sample(target).await
    }

    pub async fn sample(&self, gpu_target: OperationTarget) -> AppResult<MetricsSample> {
        let (cpu, disk, gpu) = tokio::join!(self.cpu(), self.disk(), self.gpu(gpu_target));
        Ok(MetricsSample {
            cpu: cpu?,
            disk: disk?,
            gpu: gpu?,
            timestamp: Utc::now(),
        })
    }

    /// Poll [`Monitor::sample`] at the configured interval.
    pub fn watch(
        self: &Arc<Self>,
        gpu_target: OperationTarget,
    ) -> (PollerHandle, mpsc::Receiver<MetricsEvent>) {
        let monitor = Arc::clone(self);
        start_poller(self.interval, move || {
            let monitor = Arc::clone(&monitor);
            async move { monitor.sample(gpu_target).await }
        })
    }
}
