//! Health monitoring for resource pools

#[cfg(feature = "serde")]
use serde::Serialize;

/// Health status of a resource pool
///
/// # Examples
///
/// ```
/// use esox_resourcepool::HealthStatus;
///
/// let health = HealthStatus::new(3, 1, 0, 10, false);
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_resources, 3);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Checked-out managed resources relative to capacity (0.0 to 1.0)
    pub utilization: f64,

    pub idle_resources: usize,
    pub outstanding_resources: usize,
    pub overflow_resources: usize,

    /// Maximum number of managed resources
    pub total_capacity: usize,

    pub is_closed: bool,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(idle: usize, outstanding: usize, overflow: usize, capacity: usize, closed: bool) -> Self {
        let utilization = if capacity > 0 {
            outstanding as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if closed {
            warnings.push("Pool is closed".to_string());
            is_healthy = false;
        }

        // Check for high utilization
        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if overflow > 0 {
            warnings.push(format!("{overflow} overflow resources checked out"));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_resources: idle,
            outstanding_resources: outstanding,
            overflow_resources: overflow,
            total_capacity: capacity,
            is_closed: closed,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturated_pool_is_unhealthy() {
        let health = HealthStatus::new(0, 10, 2, 10, false);
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
    }

    #[test]
    fn test_closed_pool_is_unhealthy() {
        let health = HealthStatus::new(0, 0, 0, 4, true);
        assert!(!health.is_healthy());
        assert_eq!(health.warnings, vec!["Pool is closed".to_string()]);
    }
}
