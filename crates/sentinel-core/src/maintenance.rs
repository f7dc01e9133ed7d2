//! When an idle-triggered caller may act.

use crate::config::MaintenanceConfig;
use crate::types::SystemHealth;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct MaintenanceGate {
    idle_cpu_percent: f32,
    idle_windows: Vec<(u32, u32)>,
    sweep_interval: Duration,
}

impl MaintenanceGate {
    pub fn new(cfg: &MaintenanceConfig, sweep_interval_hours: i64) -> Self {
        Self {
            idle_cpu_percent: cfg.idle_cpu_percent,
            idle_windows: cfg.idle_windows.clone(),
            sweep_interval: Duration::hours(sweep_interval_hours.max(1)),
        }
    }

    /// Whether `hour` (local, `0..24`) falls in a quiet window. Windows are
    /// `[start, end)` and may wrap past midnight.
    pub fn in_idle_window(&self, hour: u32) -> bool {
        self.idle_windows.iter().any(|&(start, end)| {
            if start <= end {
                (start..end).contains(&hour)
            } else {
                hour >= start || hour < end
            }
        })
    }

    /// Idle signal set, CPU below the ceiling and inside a quiet window.
    pub fn may_run(&self, health: &SystemHealth, local_hour: u32) -> bool {
        health.idle && health.cpu_percent < self.idle_cpu_percent && self.in_idle_window(local_hour)
    }

    pub fn sweep_due(&self, last_sweep: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        last_sweep.map_or(true, |last| now - last >= self.sweep_interval)
    }
}
