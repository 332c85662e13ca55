//! NVIDIA GPU sampling through `nvidia-smi`

use super::{GpuDevice, GpuInfo, GpuProcess, GpuSnapshot};
use crate::error::AppResult;
use crate::exec::CommandExecutor;
use crate::target::OperationTarget;

pub const GPU_QUERY: &str =
    "nvidia-smi --query-gpu=utilization.gpu,memory.used,memory.total --format=csv,noheader,nounits";
pub const GPU_INVENTORY_QUERY: &str =
    "nvidia-smi --query-gpu=name,memory.total --format=csv,noheader,nounits";
pub const GPU_PROCESS_QUERY: &str =
    "nvidia-smi --query-compute-apps=pid,name,used_memory --format=csv,noheader,nounits";

/// Runs the GPU queries on either target
#[derive(Clone)]
pub struct GpuProbe {
    executor: CommandExecutor,
    top_processes: usize,
    surface_errors: bool,
}

impl GpuProbe {
    pub fn new(executor: CommandExecutor, top_processes: usize, surface_errors: bool) -> Self {
        Self {
            executor,
            top_processes,
            surface_errors,
        }
    }

    /// Sample GPUs on `target`.
    ///
    /// Hosts without `nvidia-smi` yield an empty snapshot unless probe errors
    /// are surfaced.
    pub async fn sample(&self, target: OperationTarget) -> AppResult<GpuSnapshot> {
        match self.query(target).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if !self.surface_errors => {
                tracing::debug!("GPU probe on {:?} failed, reporting none: {}", target, e);
                Ok(GpuSnapshot::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Installed GPU models and their memory, for server info. Same
    /// empty-result policy as [`GpuProbe::sample`].
    pub async fn inventory(&self, target: OperationTarget) -> AppResult<Vec<GpuInfo>> {
        match self.executor.run(target, GPU_INVENTORY_QUERY).await {
            Ok(output) => Ok(parse_gpu_inventory(&output.stdout)),
            Err(e) if !self.surface_errors => {
                tracing::debug!("GPU inventory on {:?} failed, reporting none: {}", target, e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn query(&self, target: OperationTarget) -> AppResult<GpuSnapshot> {
        let devices = self.executor.run(target, GPU_QUERY).await?;
        let processes = self.executor.run(target, GPU_PROCESS_QUERY).await?;
        Ok(GpuSnapshot {
            gpus: parse_gpus(&devices.stdout),
            processes: parse_gpu_processes(&processes.stdout, self.top_processes),
        })
    }
}

fn csv_fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// One device per non-empty line: `utilization, memory.used, memory.total`
pub fn parse_gpus(csv: &str) -> Vec<GpuDevice> {
    csv.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .filter_map(|(id, line)| {
            let fields = csv_fields(line);
            if fields.len() < 3 {
                return None;
            }
            Some(GpuDevice {
                id,
                utilization: fields[0].parse().unwrap_or(0),
                memory_used: fields[1].parse().unwrap_or(0),
                memory_total: fields[2].parse().unwrap_or(0),
            })
        })
        .collect()
}

/// `name, memory.total` lines. Model names may contain commas, so the
/// memory column is taken from the end.
pub fn parse_gpu_inventory(csv: &str) -> Vec<GpuInfo> {
    csv.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (model, vram) = line.rsplit_once(',')?;
            Some(GpuInfo {
                model: model.trim().to_string(),
                vram: vram.trim().parse().ok(),
            })
        })
        .collect()
}

/// `pid, name, used_memory` lines, largest memory first, at most `limit`
pub fn parse_gpu_processes(csv: &str, limit: usize) -> Vec<GpuProcess> {
    let mut processes: Vec<GpuProcess> = csv
        .lines()
        .filter_map(|line| {
            let fields = csv_fields(line);
            if fields.len() < 3 {
                return None;
            }
            let pid: u32 = fields[0].parse().ok()?;
            Some(GpuProcess {
                pid,
                name: fields[1].to_string(),
                memory: fields[2].parse().unwrap_or(0),
                path: format!("/proc/{}/exe", pid),
            })
        })
        .collect();

    processes.sort_by(|a, b| b.memory.cmp(&a.memory));
    processes.truncate(limit);
    processes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::{profile_for, FakeRemote};
    use crate::ssh::SessionManager;
    use std::sync::Arc;

    #[test]
    fn test_parse_gpus() {
        let gpus = parse_gpus("35, 2048, 8192\n0, 1, 24576\n\n");
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].id, 0);
        assert_eq!(gpus[0].utilization, 35);
        assert_eq!(gpus[0].memory_used, 2048);
        assert_eq!(gpus[1].id, 1);
        assert_eq!(gpus[1].memory_total, 24576);
    }

    #[test]
    fn test_parse_gpus_not_supported_fields() {
        let gpus = parse_gpus("[N/A], 512, 4096\n");
        assert_eq!(gpus[0].utilization, 0);
        assert_eq!(gpus[0].memory_used, 512);
    }

    #[test]
    fn test_parse_gpu_inventory() {
        let gpus = parse_gpu_inventory("NVIDIA GeForce RTX 4090, 24564\nTesla T4, [N/A]\n\nbroken\n");
        assert_eq!(
            gpus,
            vec![
                GpuInfo {
                    model: "NVIDIA GeForce RTX 4090".into(),
                    vram: Some(24564),
                },
                GpuInfo {
                    model: "Tesla T4".into(),
                    vram: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_inventory_missing_tool() {
        let remote = FakeRemote::new();
        remote.respond("nvidia-smi", "", 127);

        let gpus = probe(&remote, false).inventory(OperationTarget::Remote).await.unwrap();
        assert!(gpus.is_empty());
        assert!(probe(&remote, true)
            .inventory(OperationTarget::Remote)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_inventory_runs_name_query() {
        let remote = FakeRemote::new();
        remote.respond("nvidia-smi --query-gpu=name,memory.total", "A100-SXM4-40GB, 40960\n", 0);

        let gpus = probe(&remote, false).inventory(OperationTarget::Remote).await.unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].model, "A100-SXM4-40GB");
        assert_eq!(gpus[0].vram, Some(40960));
    }

    #[test]
    fn test_parse_gpu_processes_top_by_memory() {
        let csv = "101, python, 300\n\
                   102, trainer, 9000\n\
                   103, xorg, 20\n\
                   104, infer, 1200\n\
                   105, a, 5\n\
                   106, b, 7\n\
                   garbage line\n";
        let processes = parse_gpu_processes(csv, 5);
        let pids: Vec<_> = processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, [102, 104, 101, 103, 106]);
        assert_eq!(processes[0].name, "trainer");
        assert_eq!(processes[0].path, "/proc/102/exe");
    }

    fn probe(remote: &Arc<FakeRemote>, surface_errors: bool) -> GpuProbe {
        let sessions = Arc::new(SessionManager::new(remote.connector()));
        sessions.set_profile(profile_for("gpu-box"));
        GpuProbe::new(CommandExecutor::new(sessions), 5, surface_errors)
    }

    #[tokio::test]
    async fn test_remote_sample() {
        let remote = FakeRemote::new();
        remote.respond("nvidia-smi --query-gpu", "50, 1000, 16000\n", 0);
        remote.respond("nvidia-smi --query-compute-apps", "42, llama, 900\n", 0);

        let snapshot = probe(&remote, false).sample(OperationTarget::Remote).await.unwrap();
        assert_eq!(snapshot.gpus.len(), 1);
        assert_eq!(snapshot.gpus[0].utilization, 50);
        assert_eq!(snapshot.processes[0].pid, 42);
        assert_eq!(remote.closed(), 2);
    }

    #[tokio::test]
    async fn test_missing_tool_yields_empty_snapshot() {
        let remote = FakeRemote::new();
        remote.respond("nvidia-smi", "", 127);

        let snapshot = probe(&remote, false).sample(OperationTarget::Remote).await.unwrap();
        assert!(snapshot.gpus.is_empty());
        assert!(snapshot.processes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_surfaced_when_configured() {
        let remote = FakeRemote::new();
        remote.respond("nvidia-smi", "", 127);

        let err = probe(&remote, true)
            .sample(OperationTarget::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Execution(_)));
    }
}
