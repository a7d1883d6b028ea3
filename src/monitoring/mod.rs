use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

const MB: u64 = 1024 * 1024;

/// Memory and CPU readings taken around a load
pub struct ResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub taken_at: Instant,
    pub system_total_mb: u64,
    pub system_used_mb: u64,
    /// Resident memory of this process; 0 when the process is not visible.
    pub process_mb: u64,
    pub process_cpu_percent: f32,
}

impl ResourceSnapshot {
    /// Used share of system memory, 0.0 when the total is unknown
    pub fn memory_pressure(&self) -> f64 {
        if self.system_total_mb == 0 {
            0.0
        } else {
            self.system_used_mb as f64 / self.system_total_mb as f64
        }
    }
}

/// A measured span: readings at start and, once finished, at end.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub label: String,
    pub before: ResourceSnapshot,
    pub after: Option<ResourceSnapshot>,
}

impl OperationMetrics {
    pub fn duration(&self) -> Option<Duration> {
        self.after
            .map(|after| after.taken_at.duration_since(self.before.taken_at))
    }

    /// Process memory growth over the span, in MB
    pub fn memory_delta_mb(&self) -> Option<i64> {
        self.after
            .map(|after| after.process_mb as i64 - self.before.process_mb as i64)
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!("Process metrics unavailable: {}", e))
            .ok();
        Self {
            system: Mutex::new(System::new_all()),
            pid,
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();
        if let Some(pid) = self.pid {
            system.refresh_process(pid);
        }

        let process = self.pid.and_then(|pid| system.process(pid));
        ResourceSnapshot {
            taken_at: Instant::now(),
            system_total_mb: system.total_memory() / MB,
            system_used_mb: system.used_memory() / MB,
            process_mb: process.map_or(0, |p| p.memory() / MB),
            process_cpu_percent: process.map_or(0.0, |p| p.cpu_usage()),
        }
    }

    pub fn start_operation(&self, label: impl Into<String>) -> OperationMetrics {
        let before = self.snapshot();
        let label = label.into();
        debug!(operation = %label, process_mb = before.process_mb, "[PERF] started");
        OperationMetrics {
            label,
            before,
            after: None,
        }
    }

    pub fn finish_operation(&self, mut metrics: OperationMetrics) -> OperationMetrics {
        let after = self.snapshot();
        metrics.after = Some(after);
        info!(
            operation = %metrics.label,
            duration_ms = metrics.duration().unwrap_or_default().as_millis() as u64,
            mem_delta_mb = metrics.memory_delta_mb().unwrap_or(0),
            process_mb = after.process_mb,
            cpu = after.process_cpu_percent,
            "[PERF] finished"
        );
        metrics
    }

    pub fn log_system_summary(&self, context: &str) {
        let snapshot = self.snapshot();
        info!(
            context,
            total_mb = snapshot.system_total_mb,
            used_mb = snapshot.system_used_mb,
            process_mb = snapshot.process_mb,
            cores = num_cpus::get(),
            "[PERF] system"
        );
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs the time from creation to drop
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(timer = %self.name, elapsed_ms = self.start.elapsed().as_millis() as u64, "[PERF] timer");
    }
}
