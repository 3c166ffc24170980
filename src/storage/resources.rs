//! Memory and disk pressure monitoring for the buffered writer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sysinfo::{Disks, Pid, System};

use crate::models::ResourceConfig;

/// Source of process memory and free disk measurements.
pub trait ResourceProbe: Send {
    /// Resident memory of the current process in bytes.
    fn process_memory_bytes(&mut self) -> Option<u64>;

    /// Free bytes on the filesystem holding `path`.
    fn available_disk_bytes(&mut self, path: &Path) -> Option<u64>;
}

/// Probe backed by the operating system.
pub struct SystemProbe {
    system: System,
    disks: Disks,
    pid: Option<Pid>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("Memory monitoring unavailable: {}", e);
                None
            }
        };
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            pid,
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn process_memory_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_process(pid);
        self.system.process(pid).map(|p| p.memory())
    }

    fn available_disk_bytes(&mut self, path: &Path) -> Option<u64> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.disks.refresh();
        self.disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// A threshold that has been crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePressure {
    Memory { used: u64, ceiling: u64 },
    Disk { available: u64, floor: u64 },
}

impl fmt::Display for ResourcePressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: u64 = 1024 * 1024;
        match self {
            Self::Memory { used, ceiling } => write!(
                f,
                "memory {} MB above ceiling {} MB",
                used / MB,
                ceiling / MB
            ),
            Self::Disk { available, floor } => write!(
                f,
                "free disk {} MB below floor {} MB",
                available / MB,
                floor / MB
            ),
        }
    }
}

/// Periodic threshold checks against a [`ResourceProbe`].
pub struct ResourceMonitor {
    probe: Box<dyn ResourceProbe>,
    memory_ceiling: u64,
    disk_floor: u64,
    interval: Duration,
    data_dir: PathBuf,
    last_check: Option<Instant>,
}

impl ResourceMonitor {
    pub fn new(config: &ResourceConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self::with_probe(config, data_dir, Box::new(SystemProbe::new()))
    }

    pub fn with_probe(
        config: &ResourceConfig,
        data_dir: impl Into<PathBuf>,
        probe: Box<dyn ResourceProbe>,
    ) -> Self {
        Self {
            probe,
            memory_ceiling: config.memory_ceiling_bytes(),
            disk_floor: config.disk_floor_bytes(),
            interval: config.check_interval(),
            data_dir: data_dir.into(),
            last_check: None,
        }
    }

    /// Check thresholds if the check interval has elapsed since the last one.
    pub fn poll(&mut self) -> Option<ResourcePressure> {
        if self.last_check.is_some_and(|last| last.elapsed() < self.interval) {
            return None;
        }
        self.check()
    }

    /// Check thresholds now. Disk pressure is reported before memory.
    pub fn check(&mut self) -> Option<ResourcePressure> {
        self.last_check = Some(Instant::now());
        if let Some(pressure) = self.disk_pressure() {
            return Some(pressure);
        }
        match self.probe.process_memory_bytes() {
            Some(used) if used > self.memory_ceiling => Some(ResourcePressure::Memory {
                used,
                ceiling: self.memory_ceiling,
            }),
            _ => None,
        }
    }

    /// Free disk is below the floor right now.
    pub fn disk_pressure(&mut self) -> Option<ResourcePressure> {
        match self.probe.available_disk_bytes(&self.data_dir) {
            Some(available) if available < self.disk_floor => Some(ResourcePressure::Disk {
                available,
                floor: self.disk_floor,
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("memory_ceiling", &self.memory_ceiling)
            .field("disk_floor", &self.disk_floor)
            .field("interval", &self.interval)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

/// Probe returning fixed readings, shared with the writer tests.
#[cfg(test)]
pub(crate) mod fixed {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    pub struct Readings {
        pub memory: Option<u64>,
        pub disk: Option<u64>,
        pub calls: usize,
    }

    #[derive(Clone, Default)]
    pub struct FixedProbe(pub Arc<Mutex<Readings>>);

    impl FixedProbe {
        pub fn new(memory: Option<u64>, disk: Option<u64>) -> Self {
            Self(Arc::new(Mutex::new(Readings {
                memory,
                disk,
                calls: 0,
            })))
        }

        pub fn set(&self, memory: Option<u64>, disk: Option<u64>) {
            let mut r = self.0.lock().unwrap();
            r.memory = memory;
            r.disk = disk;
        }

        pub fn calls(&self) -> usize {
            self.0.lock().unwrap().calls
        }
    }

    impl ResourceProbe for FixedProbe {
        fn process_memory_bytes(&mut self) -> Option<u64> {
            let mut r = self.0.lock().unwrap();
            r.calls += 1;
            r.memory
        }

        fn available_disk_bytes(&mut self, _path: &Path) -> Option<u64> {
            let mut r = self.0.lock().unwrap();
            r.calls += 1;
            r.disk
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixed::FixedProbe;
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn config(interval: u64) -> ResourceConfig {
        ResourceConfig {
            memory_ceiling_mb: 100,
            disk_floor_mb: 50,
            check_interval_secs: interval,
        }
    }

    #[test]
    fn test_no_pressure_within_limits() {
        let probe = FixedProbe::new(Some(10 * MB), Some(500 * MB));
        let mut monitor = ResourceMonitor::with_probe(&config(0), "data", Box::new(probe));
        assert_eq!(monitor.check(), None);
    }

    #[test]
    fn test_memory_pressure() {
        let probe = FixedProbe::new(Some(200 * MB), Some(500 * MB));
        let mut monitor = ResourceMonitor::with_probe(&config(0), "data", Box::new(probe));
        assert_eq!(
            monitor.check(),
            Some(ResourcePressure::Memory {
                used: 200 * MB,
                ceiling: 100 * MB
            })
        );
    }

    #[test]
    fn test_disk_pressure_takes_precedence() {
        let probe = FixedProbe::new(Some(200 * MB), Some(10 * MB));
        let mut monitor = ResourceMonitor::with_probe(&config(0), "data", Box::new(probe));
        let pressure = monitor.check().unwrap();
        assert!(matches!(pressure, ResourcePressure::Disk { .. }));
        assert!(pressure.to_string().contains("below floor 50 MB"));
    }

    #[test]
    fn test_unknown_readings_are_not_pressure() {
        let probe = FixedProbe::new(None, None);
        let mut monitor = ResourceMonitor::with_probe(&config(0), "data", Box::new(probe));
        assert_eq!(monitor.check(), None);
    }

    #[test]
    fn test_poll_respects_interval() {
        let probe = FixedProbe::new(Some(10 * MB), Some(500 * MB));
        let mut monitor =
            ResourceMonitor::with_probe(&config(3600), "data", Box::new(probe.clone()));

        monitor.poll();
        let after_first = probe.calls();
        assert!(after_first > 0);

        probe.set(Some(500 * MB), Some(500 * MB));
        assert_eq!(monitor.poll(), None);
        assert_eq!(probe.calls(), after_first);
    }
}
