//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{HookError, ObjectPool, PooledResource};
///
/// struct Slot;
///
/// impl PooledResource for Slot {
///     fn on_reset_state(&mut self) -> Result<(), HookError> { Ok(()) }
///     fn on_release_resources(&mut self) -> Result<(), HookError> { Ok(()) }
/// }
///
/// let pool = ObjectPool::new(3, || Slot).unwrap();
///
/// {
///     let _slot = pool.checkout().unwrap();
///     let metrics = pool.get_metrics();
///     assert_eq!(metrics.total_checkouts, 1);
///     assert_eq!(metrics.outstanding_resources, 1);
/// }
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Total successful checkouts
    pub total_checkouts: usize,

    /// Total accepted returns
    pub total_returns: usize,

    /// Resources built by the factory, overflow included
    pub created: usize,

    /// Resources whose release hook has run
    pub destroyed: usize,

    /// Resources destroyed by idle eviction
    pub evicted: usize,

    /// Background eviction sweeps completed
    pub sweeps: usize,

    /// Overflow resources built beyond the maximum size
    pub overflow_created: usize,

    /// Checkouts that found every managed slot in use
    pub saturated_events: usize,

    /// Blocking or async checkouts that timed out
    pub checkout_timeouts: usize,

    pub validation_failures: usize,
    pub reset_failures: usize,
    pub release_failures: usize,
    pub factory_failures: usize,

    /// Current idle resources
    pub idle_resources: usize,

    /// Current checked-out managed resources
    pub outstanding_resources: usize,

    /// Current checked-out overflow resources
    pub overflow_resources: usize,

    /// Checked-out managed resources relative to the maximum size (0.0 to 1.0)
    pub utilization: f64,

    pub maximum_size: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        for (name, value) in self.counters().into_iter().chain(self.gauges()) {
            metrics.insert(name.to_string(), value.to_string());
        }
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }

    fn counters(&self) -> [(&'static str, usize); 13] {
        [
            ("total_checkouts", self.total_checkouts),
            ("total_returns", self.total_returns),
            ("created", self.created),
            ("destroyed", self.destroyed),
            ("evicted", self.evicted),
            ("sweeps", self.sweeps),
            ("overflow_created", self.overflow_created),
            ("saturated_events", self.saturated_events),
            ("checkout_timeouts", self.checkout_timeouts),
            ("validation_failures", self.validation_failures),
            ("reset_failures", self.reset_failures),
            ("release_failures", self.release_failures),
            ("factory_failures", self.factory_failures),
        ]
    }

    fn gauges(&self) -> [(&'static str, usize); 4] {
        [
            ("idle_resources", self.idle_resources),
            ("outstanding_resources", self.outstanding_resources),
            ("overflow_resources", self.overflow_resources),
            ("maximum_size", self.maximum_size),
        ]
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::{HookError, ObjectPool, PooledResource};
    /// use std::collections::HashMap;
    ///
    /// struct Slot;
    ///
    /// impl PooledResource for Slot {
    ///     fn on_reset_state(&mut self) -> Result<(), HookError> { Ok(()) }
    ///     fn on_release_resources(&mut self) -> Result<(), HookError> { Ok(()) }
    /// }
    ///
    /// let pool = ObjectPool::new(3, || Slot).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("my_pool", Some(&tags)).unwrap();
    /// assert!(output.contains("resourcepool_resources_idle"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let registry = Registry::new();
        let labels = Self::labels(pool_name, tags);
        let opts = |name: &str, help: &str| {
            Opts::new(format!("resourcepool_{name}"), help.to_string()).const_labels(labels.clone())
        };

        for (name, value) in metrics.counters() {
            let name = name.strip_prefix("total_").unwrap_or(name);
            let counter = IntCounter::with_opts(opts(&format!("{name}_total"), &name.replace('_', " ")))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        for (name, value) in [
            ("resources_idle", metrics.idle_resources),
            ("resources_outstanding", metrics.outstanding_resources),
            ("resources_overflow", metrics.overflow_resources),
            ("maximum_size", metrics.maximum_size),
        ] {
            let gauge = IntGauge::with_opts(opts(name, &name.replace('_', " ")))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.insert(key.clone(), value.clone());
            }
        }

        labels
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_checkouts: AtomicUsize,
    pub total_returns: AtomicUsize,
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub evicted: AtomicUsize,
    pub sweeps: AtomicUsize,
    pub overflow_created: AtomicUsize,
    pub saturated_events: AtomicUsize,
    pub checkout_timeouts: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub reset_failures: AtomicUsize,
    pub release_failures: AtomicUsize,
    pub factory_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_metrics(&self, idle: usize, outstanding: usize, overflow: usize, maximum_size: usize) -> PoolMetrics {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        let utilization = if maximum_size > 0 {
            outstanding as f64 / maximum_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_checkouts: load(&self.total_checkouts),
            total_returns: load(&self.total_returns),
            created: load(&self.created),
            destroyed: load(&self.destroyed),
            evicted: load(&self.evicted),
            sweeps: load(&self.sweeps),
            overflow_created: load(&self.overflow_created),
            saturated_events: load(&self.saturated_events),
            checkout_timeouts: load(&self.checkout_timeouts),
            validation_failures: load(&self.validation_failures),
            reset_failures: load(&self.reset_failures),
            release_failures: load(&self.release_failures),
            factory_failures: load(&self.factory_failures),
            idle_resources: idle,
            outstanding_resources: outstanding,
            overflow_resources: overflow,
            utilization,
            maximum_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_every_metric() {
        let tracker = MetricsTracker::new();
        tracker.created.fetch_add(3, Ordering::Relaxed);
        let metrics = tracker.get_metrics(1, 2, 0, 4);

        let exported = metrics.export();
        assert_eq!(exported["created"], "3");
        assert_eq!(exported["idle_resources"], "1");
        assert_eq!(exported["utilization"], "0.50");
        assert_eq!(exported.len(), 18);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsTracker::new().get_metrics(2, 1, 0, 4);
        let output = MetricsExporter::export_prometheus(&metrics, "db", None).unwrap();

        assert!(output.contains("resourcepool_resources_idle{pool=\"db\"} 2"));
        assert!(output.contains("# TYPE resourcepool_created_total counter"));
        assert!(output.contains("# TYPE resourcepool_checkouts_total counter"));
        assert!(output.contains("# TYPE resourcepool_returns_total counter"));
        assert!(!output.contains("total_checkouts_total"));
    }
}
