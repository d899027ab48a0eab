//! Memory pressure classification shared by the scheduler, cache, and rate limiter.

use std::time::Duration;

/// Coarse discretization of memory utilization driving backpressure decisions.
///
/// Ordered `Low < Medium < High < Critical`; derive the ordering from the
/// discriminant rather than hand-rolled comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PressureLevel {
    /// Classifies a utilization ratio `p = max(heapUsed/heapTotal, (sysTotal-sysFree)/sysTotal)`.
    ///
    /// `Low < 0.50 ≤ Medium < 0.70 ≤ High < 0.85 ≤ Critical`.
    pub fn classify(p: f64) -> Self {
        if p >= 0.85 {
            PressureLevel::Critical
        } else if p >= 0.70 {
            PressureLevel::High
        } else if p >= 0.50 {
            PressureLevel::Medium
        } else {
            PressureLevel::Low
        }
    }

    /// Adaptive sampling interval: 10s at Low, 5s at Medium, 2s at High, 1s at Critical.
    pub fn sampling_interval(self) -> Duration {
        match self {
            PressureLevel::Low => Duration::from_secs(10),
            PressureLevel::Medium => Duration::from_secs(5),
            PressureLevel::High => Duration::from_secs(2),
            PressureLevel::Critical => Duration::from_secs(1),
        }
    }

    /// Fraction of the configured queue limit `Q` admitted at this level.
    pub fn queue_fraction(self) -> f64 {
        match self {
            PressureLevel::Low => 1.0,
            PressureLevel::Medium => 0.7,
            PressureLevel::High => 0.4,
            PressureLevel::Critical => 0.2,
        }
    }
}

impl Default for PressureLevel {
    fn default() -> Self {
        // Monitor failures pin pressure at Medium (spec §4.F failure semantics).
        PressureLevel::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_boundaries() {
        assert_eq!(PressureLevel::classify(0.0), PressureLevel::Low);
        assert_eq!(PressureLevel::classify(0.49), PressureLevel::Low);
        assert_eq!(PressureLevel::classify(0.50), PressureLevel::Medium);
        assert_eq!(PressureLevel::classify(0.69), PressureLevel::Medium);
        assert_eq!(PressureLevel::classify(0.70), PressureLevel::High);
        assert_eq!(PressureLevel::classify(0.84), PressureLevel::High);
        assert_eq!(PressureLevel::classify(0.85), PressureLevel::Critical);
        assert_eq!(PressureLevel::classify(1.0), PressureLevel::Critical);
    }

    #[test]
    fn ordering_is_total() {
        assert!(PressureLevel::Low < PressureLevel::Medium);
        assert!(PressureLevel::Medium < PressureLevel::High);
        assert!(PressureLevel::High < PressureLevel::Critical);
    }
}
