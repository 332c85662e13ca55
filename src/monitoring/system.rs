//! Local host metrics via `sysinfo`
//!
//! All methods block; callers run them on the blocking pool.

use super::{CpuInfo, CpuSnapshot, DiskInfo, DiskSnapshot, MemoryInfo, OsInfo, ProcessUsage, ServerInfo};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::time::Instant;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};

const GB: u64 = 1024 * 1024 * 1024;
const MB: u64 = 1024 * 1024;

struct Sampler {
    system: System,
    refreshed_at: Instant,
    last_io: Option<IoTotals>,
}

/// Lifetime I/O byte counts summed over all processes
#[derive(Debug, Clone, Copy)]
struct IoTotals {
    at: Instant,
    read: u64,
    written: u64,
}

impl IoTotals {
    /// Bytes per second since `previous`. Exited processes can shrink the
    /// totals; that interval counts as zero.
    fn rates_since(&self, previous: &IoTotals) -> (u64, u64) {
        let elapsed = self.at.duration_since(previous.at).as_secs_f64();
        if elapsed <= 0.0 {
            return (0, 0);
        }
        let per_sec = |now: u64, before: u64| (now.saturating_sub(before) as f64 / elapsed) as u64;
        (
            per_sec(self.read, previous.read),
            per_sec(self.written, previous.written),
        )
    }
}

pub struct SystemProbe {
    sampler: OnceCell<Mutex<Sampler>>,
    top_processes: usize,
}

impl SystemProbe {
    pub fn new(top_processes: usize) -> Self {
        Self {
            sampler: OnceCell::new(),
            top_processes,
        }
    }

    fn sampler(&self) -> &Mutex<Sampler> {
        self.sampler.get_or_init(|| {
            Mutex::new(Sampler {
                system: System::new_all(),
                refreshed_at: Instant::now(),
                last_io: None,
            })
        })
    }

    pub fn server_info(&self) -> ServerInfo {
        let sampler = self.sampler().lock();
        let cpus = sampler.system.cpus();
        let logical = cpus.len();

        ServerInfo {
            os: OsInfo {
                name: System::name().unwrap_or_else(|| "unknown".to_string()),
                version: System::os_version().unwrap_or_default(),
                kernel: System::kernel_version().unwrap_or_default(),
            },
            cpu: CpuInfo {
                model: cpus
                    .first()
                    .map(|cpu| cpu.brand().trim().to_string())
                    .unwrap_or_default(),
                cores: sampler.system.physical_core_count().unwrap_or(logical),
                threads: logical,
            },
            memory: MemoryInfo {
                total_gb: round_div(sampler.system.total_memory(), GB),
            },
            // Filled in from the GPU probe
            gpus: Vec::new(),
            disks: Disks::new_with_refreshed_list()
                .list()
                .iter()
                .map(|disk| DiskInfo {
                    mount: disk.mount_point().display().to_string(),
                    total_gb: round_div(disk.total_space(), GB),
                    available_gb: round_div(disk.available_space(), GB),
                })
                .collect(),
        }
    }

    /// Overall CPU usage and the busiest processes.
    ///
    /// Usage is a delta between refreshes, so the first call waits out the
    /// minimum update interval.
    pub fn cpu(&self) -> CpuSnapshot {
        let mut sampler = self.sampler().lock();
        let since = sampler.refreshed_at.elapsed();
        if since < MINIMUM_CPU_UPDATE_INTERVAL {
            std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL - since);
        }
        sampler.system.refresh_cpu();
        sampler.system.refresh_processes();
        sampler.refreshed_at = Instant::now();

        let mut processes: Vec<_> = sampler.system.processes().values().collect();
        processes.sort_by(|a, b| b.cpu_usage().total_cmp(&a.cpu_usage()));

        CpuSnapshot {
            usage: sampler.system.global_cpu_info().cpu_usage().round(),
            processes: processes
                .into_iter()
                .take(self.top_processes)
                .map(|process| {
                    let command = process.cmd().join(" ");
                    ProcessUsage {
                        name: process.name().to_string(),
                        memory_mb: round_div(process.memory(), MB),
                        pid: process.pid().as_u32(),
                        path: if command.is_empty() {
                            process.name().to_string()
                        } else {
                            command
                        },
                    }
                })
                .collect(),
        }
    }

    /// Read/write throughput per mount.
    ///
    /// Throughput comes from lifetime per-process I/O counters, which are
    /// host-wide, so every mount reports the same rates. The first call
    /// reports zero.
    pub fn disk(&self) -> Vec<DiskSnapshot> {
        let mut sampler = self.sampler().lock();
        sampler.system.refresh_processes();
        let now = Instant::now();

        let (read, written) = sampler
            .system
            .processes()
            .values()
            .map(|process| process.disk_usage())
            .fold((0u64, 0u64), |(r, w), usage| {
                (
                    r.saturating_add(usage.total_read_bytes),
                    w.saturating_add(usage.total_written_bytes),
                )
            });
        let totals = IoTotals {
            at: now,
            read,
            written,
        };

        let (read_per_sec, write_per_sec) = sampler
            .last_io
            .map(|previous| totals.rates_since(&previous))
            .unwrap_or((0, 0));
        sampler.last_io = Some(totals);
        sampler.refreshed_at = now;

        Disks::new_with_refreshed_list()
            .list()
            .iter()
            .map(|disk| DiskSnapshot {
                mount: disk.mount_point().display().to_string(),
                read_bytes_per_sec: read_per_sec,
                write_bytes_per_sec: write_per_sec,
            })
            .collect()
    }
}

/// Integer division rounded to nearest
fn round_div(value: u64, unit: u64) -> u64 {
    (value + unit / 2) / unit
}
