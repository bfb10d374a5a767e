use serde::Serialize;
use sysinfo::System;

/// Host CPU/RAM statistics broadcast to fan-out subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStats {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub ram_used_mb: u64,
    pub ram_total_mb: u64,
    pub connected_clients: usize,
}

/// Samples host statistics via sysinfo. CPU usage needs two refreshes with
/// real elapsed time between them, so the constructor primes the first and
/// callers must let wall time pass before `sample()` reads a meaningful
/// number.
pub struct SystemSampler {
    sys: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }

    pub fn sample(&mut self) -> SystemStats {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let cpu = if self.sys.cpus().is_empty() {
            0.0
        } else {
            self.sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>()
                / self.sys.cpus().len() as f32
        };

        let used = self.sys.used_memory();
        let total = self.sys.total_memory();
        let ram_percent = if total == 0 {
            0.0
        } else {
            used as f32 / total as f32 * 100.0
        };

        SystemStats {
            cpu_percent: round1(cpu),
            ram_percent: round1(ram_percent),
            ram_used_mb: used / 1024 / 1024,
            ram_total_mb: total / 1024 / 1024,
            connected_clients: 0,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}
