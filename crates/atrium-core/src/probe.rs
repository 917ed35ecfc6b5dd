use std::sync::Mutex;

use serde::Serialize;
use sysinfo::System;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemorySnapshot {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub percent: f64,
}

/// Source of process-host memory readings. Injected so the model manager can
/// be driven deterministically in tests.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySnapshot;
}

/// Live readings from the host via `sysinfo`.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> MemorySnapshot {
        let mut system = self.system.lock().expect("memory probe lock poisoned");
        system.refresh_memory();
        let total = system.total_memory() as f64 / BYTES_PER_GB;
        let used = system.used_memory() as f64 / BYTES_PER_GB;
        let available = system.available_memory() as f64 / BYTES_PER_GB;
        MemorySnapshot {
            total_gb: total,
            used_gb: used,
            available_gb: available,
            percent: if total > 0.0 { used / total * 100.0 } else { 0.0 },
        }
    }
}

/// Fixed readings for tests; `set_used_gb` moves the reported usage.
pub struct FixedMemoryProbe {
    snapshot: Mutex<MemorySnapshot>,
}

impl FixedMemoryProbe {
    pub fn new(total_gb: f64, used_gb: f64) -> Self {
        Self {
            snapshot: Mutex::new(MemorySnapshot {
                total_gb,
                used_gb,
                available_gb: (total_gb - used_gb).max(0.0),
                percent: if total_gb > 0.0 { used_gb / total_gb * 100.0 } else { 0.0 },
            }),
        }
    }

    pub fn set_used_gb(&self, used_gb: f64) {
        let mut snapshot = self.snapshot.lock().expect("probe lock poisoned");
        snapshot.used_gb = used_gb;
        snapshot.available_gb = (snapshot.total_gb - used_gb).max(0.0);
        snapshot.percent = if snapshot.total_gb > 0.0 {
            used_gb / snapshot.total_gb * 100.0
        } else {
            0.0
        };
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn sample(&self) -> MemorySnapshot {
        *self.snapshot.lock().expect("probe lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_probe_reports_configured_values() {
        let probe = FixedMemoryProbe::new(8.0, 6.0);
        let snapshot = probe.sample();
        assert_eq!(snapshot.total_gb, 8.0);
        assert_eq!(snapshot.used_gb, 6.0);
        assert_eq!(snapshot.available_gb, 2.0);
        assert_eq!(snapshot.percent, 75.0);
    }

    #[test]
    fn fixed_probe_usage_can_move() {
        let probe = FixedMemoryProbe::new(8.0, 2.0);
        probe.set_used_gb(7.5);
        let snapshot = probe.sample();
        assert_eq!(snapshot.used_gb, 7.5);
        assert!(snapshot.available_gb < 1.0);
    }

    #[test]
    fn system_probe_reports_positive_totals() {
        let probe = SystemMemoryProbe::new();
        let snapshot = probe.sample();
        assert!(snapshot.total_gb > 0.0);
        assert!(snapshot.percent >= 0.0 && snapshot.percent <= 100.0);
    }
}
