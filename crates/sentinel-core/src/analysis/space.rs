use crate::types::SystemHealth;
use serde::Serialize;

const PRESSURE_PERCENT: f64 = 80.0;
/// Assumed growth when no usage history is available: 1 GiB per week.
const WEEKLY_GROWTH_BYTES: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    None,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceForecast {
    pub used_percent: f64,
    pub free_bytes: u64,
    /// Only estimated once the disk is above the pressure threshold.
    pub days_until_full: Option<i64>,
    pub urgency: Urgency,
}

impl SpaceForecast {
    pub fn from_health(health: &SystemHealth) -> Self {
        let used_percent = health.used_percent();
        if used_percent <= PRESSURE_PERCENT {
            return Self {
                used_percent,
                free_bytes: health.free_bytes,
                days_until_full: None,
                urgency: Urgency::None,
            };
        }

        let days = (health.free_bytes as f64 / WEEKLY_GROWTH_BYTES * 7.0).floor() as i64;
        let urgency = match days {
            d if d < 30 => Urgency::High,
            d if d < 90 => Urgency::Medium,
            _ => Urgency::None,
        };
        Self {
            used_percent,
            free_bytes: health.free_bytes,
            days_until_full: Some(days),
            urgency,
        }
    }

    /// Sub-score for the disk-pressure factor, if there is pressure.
    pub fn pressure_score(&self) -> Option<u8> {
        match self.urgency {
            Urgency::High => Some(90),
            Urgency::Medium => Some(70),
            Urgency::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn health(free_gib: u64, total_gib: u64) -> SystemHealth {
        SystemHealth {
            free_bytes: free_gib * GIB,
            total_bytes: total_gib * GIB,
            idle: false,
            cpu_percent: 0.0,
        }
    }

    #[test]
    fn test_no_pressure_below_threshold() {
        let f = SpaceForecast::from_health(&health(500, 1000));
        assert_eq!(f.urgency, Urgency::None);
        assert_eq!(f.days_until_full, None);
        assert_eq!(f.pressure_score(), None);
    }

    #[test]
    fn test_urgency_bands() {
        assert_eq!(SpaceForecast::from_health(&health(2, 100)).urgency, Urgency::High);
        let medium = SpaceForecast::from_health(&health(10, 100));
        assert_eq!(medium.days_until_full, Some(70));
        assert_eq!(medium.urgency, Urgency::Medium);
        assert_eq!(SpaceForecast::from_health(&health(19, 100)).urgency, Urgency::None);
    }
}
