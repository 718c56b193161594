//! Metrics, process and network collaborators backed by `sysinfo`.
//!
//! `sysinfo` calls block, so every operation runs on the blocking pool.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Disks, Networks, Pid, ProcessesToUpdate, Signal, System, Users};
use tars_settings::HostSettings;
use tracing::{debug, warn};

use crate::errors::{HostError, Result};
use crate::traits::{MetricsSource, NetworkSource, ProcessControl};
use crate::types::{
    NetworkStats, ProcessInfo, ProcessNetwork, SystemInfo, SystemMetrics, Usage,
};

/// Hard cap on how many processes are examined per listing.
pub const MAX_SCANNED_PROCESSES: usize = 2000;
/// Command lines longer than this are truncated.
pub const MAX_CMD_CHARS: usize = 100;
/// Listings up to this size mix the top CPU and top memory consumers.
pub const BALANCED_LIMIT: usize = 20;
const BALANCED_SHARE: usize = 10;

const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Host collaborator reading the local machine through `sysinfo`.
pub struct SysinfoHost {
    system: Arc<Mutex<System>>,
    kill_grace: Duration,
}

impl SysinfoHost {
    /// Build from host settings.
    pub fn new(settings: &HostSettings) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new_all())),
            kill_grace: Duration::from_secs(settings.kill_grace_secs),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut System) -> Result<T> + Send + 'static,
    {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || f(&mut system.lock()))
            .await
            .map_err(|e| HostError::Other(format!("host query panicked: {e}")))?
    }
}

#[async_trait]
impl MetricsSource for SysinfoHost {
    async fn system_info(&self) -> Result<SystemInfo> {
        self.blocking(|sys| {
            sys.refresh_memory();
            let name = System::name().unwrap_or_else(|| "unknown".into());
            let kernel = System::kernel_version().unwrap_or_else(|| "unknown".into());
            Ok(SystemInfo {
                hostname: System::host_name().unwrap_or_else(|| "unknown".into()),
                os: format!("{name} {kernel}"),
                uptime_seconds: System::uptime(),
                cpu_count: sys.cpus().len(),
                total_memory_bytes: sys.total_memory(),
                kernel,
            })
        })
        .await
    }

    async fn metrics(&self) -> Result<SystemMetrics> {
        self.blocking(|sys| {
            sys.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let total = sys.total_memory();
            let memory = Usage {
                total,
                used: total.saturating_sub(sys.available_memory()),
            };
            Ok(SystemMetrics {
                cpu_percent: sys.global_cpu_usage(),
                memory,
                disk: root_disk_usage(),
            })
        })
        .await
    }
}

fn root_disk_usage() -> Usage {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first())
        .map(|d| Usage {
            total: d.total_space(),
            used: d.total_space().saturating_sub(d.available_space()),
        })
        .unwrap_or_default()
}

#[async_trait]
impl ProcessControl for SysinfoHost {
    async fn list_processes(&self, limit: usize) -> Vec<ProcessInfo> {
        let scanned = self
            .blocking(|sys| {
                let _ = sys.refresh_processes(ProcessesToUpdate::All, true);
                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
                let _ = sys.refresh_processes(ProcessesToUpdate::All, true);
                Ok(scan_processes(sys))
            })
            .await;
        match scanned {
            Ok(all) => select_processes(all, limit),
            Err(e) => {
                warn!(error = %e, "process listing failed");
                Vec::new()
            }
        }
    }

    async fn kill_process(&self, pid: u32) -> Result<bool> {
        let target = Pid::from_u32(pid);
        self.blocking(move |sys| {
            let _ = sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
            let process = sys
                .process(target)
                .ok_or_else(|| HostError::NotFound("Process not found".into()))?;
            let delivered = match process.kill_with(Signal::Term) {
                Some(sent) => sent,
                // SIGTERM unsupported on this platform
                None => process.kill(),
            };
            if delivered {
                Ok(())
            } else {
                Err(HostError::PermissionDenied(
                    "Permission denied to kill process".into(),
                ))
            }
        })
        .await?;
        debug!(pid, "sent SIGTERM");

        let deadline = tokio::time::Instant::now() + self.kill_grace;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(KILL_POLL_INTERVAL).await;
            let alive = self
                .blocking(move |sys| {
                    let _ = sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
                    Ok(sys.process(target).is_some())
                })
                .await?;
            if !alive {
                return Ok(true);
            }
        }

        warn!(pid, grace_secs = self.kill_grace.as_secs(), "process ignored SIGTERM, killing");
        self.blocking(move |sys| {
            let _ = sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
            Ok(sys.process(target).is_none_or(sysinfo::Process::kill))
        })
        .await
    }
}

fn scan_processes(sys: &System) -> Vec<ProcessInfo> {
    let users = Users::new_with_refreshed_list();
    sys.processes()
        .values()
        .take(MAX_SCANNED_PROCESSES)
        .map(|p| {
            let argv: Vec<String> = p
                .cmd()
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            let cmd = if argv.is_empty() {
                p.name().to_string_lossy().into_owned()
            } else {
                argv.join(" ")
            };
            let user = p
                .user_id()
                .and_then(|uid| users.get_user_by_id(uid))
                .map_or_else(|| "unknown".to_string(), |u| u.name().to_string());
            ProcessInfo {
                pid: p.pid().as_u32(),
                user,
                cmd: truncate_cmd(&cmd),
                cpu_percent: p.cpu_usage(),
                mem_bytes: p.memory(),
            }
        })
        .collect()
}

/// Truncate a command line to [`MAX_CMD_CHARS`] characters.
pub fn truncate_cmd(cmd: &str) -> String {
    if cmd.is_empty() {
        return "unknown".into();
    }
    cmd.chars().take(MAX_CMD_CHARS).collect()
}

/// Pick the processes to report.
///
/// Up to [`BALANCED_LIMIT`], the result interleaves the top CPU consumers
/// with the top memory consumers (CPU first, duplicates dropped). Above it,
/// the result is simply the top `limit` by CPU.
pub fn select_processes(mut all: Vec<ProcessInfo>, limit: usize) -> Vec<ProcessInfo> {
    all.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    if limit > BALANCED_LIMIT {
        all.truncate(limit);
        return all;
    }

    let mut by_mem: Vec<&ProcessInfo> = all.iter().collect();
    by_mem.sort_by(|a, b| b.mem_bytes.cmp(&a.mem_bytes));

    let mut seen = HashSet::new();
    let mut picked = Vec::with_capacity(limit);
    for p in all
        .iter()
        .take(BALANCED_SHARE)
        .chain(by_mem.into_iter().take(BALANCED_SHARE))
    {
        if picked.len() >= limit {
            break;
        }
        if seen.insert(p.pid) {
            picked.push(p.clone());
        }
    }
    picked
}

#[async_trait]
impl NetworkSource for SysinfoHost {
    async fn network_stats(&self) -> Result<NetworkStats> {
        self.blocking(|_| {
            let networks = Networks::new_with_refreshed_list();
            let (sent, recv) = networks
                .list()
                .values()
                .fold((0u64, 0u64), |(s, r), data| {
                    (s + data.total_transmitted(), r + data.total_received())
                });
            Ok(NetworkStats {
                total_bytes_sent: sent,
                total_bytes_recv: recv,
                process_network: process_sockets(),
            })
        })
        .await
    }
}

/// Open sockets per pid, from `/proc/<pid>/fd`.
#[cfg(target_os = "linux")]
fn process_sockets() -> BTreeMap<u32, ProcessNetwork> {
    let mut map = BTreeMap::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return map;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // unreadable for other users' processes without privileges
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let connections = fds
            .flatten()
            .filter(|fd| {
                std::fs::read_link(fd.path())
                    .is_ok_and(|target| target.to_string_lossy().starts_with("socket:"))
            })
            .count();
        if connections > 0 {
            let _ = map.insert(
                pid,
                ProcessNetwork {
                    connections,
                    ..ProcessNetwork::default()
                },
            );
        }
    }
    map
}

#[cfg(not(target_os = "linux"))]
fn process_sockets() -> BTreeMap<u32, ProcessNetwork> {
    BTreeMap::new()
}
