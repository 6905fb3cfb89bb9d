//! Resource pool with timed eviction of idle resources

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::PoolConfiguration;
use crate::errors::{HookError, PoolError, PoolResult, ReturnError};
use crate::eviction::Sweeper;
use crate::handle::PooledResourceHandle;
use crate::health::HealthStatus;
use crate::metrics::PoolMetrics;
use crate::pool::{ObjectPool, PooledObject};
use crate::resource::PooledResource;

struct Schedule {
    timeout: Duration,
    sweeper: Sweeper,
}

/// Object pool whose idle resources are destroyed once they have been idle
/// longer than `timeout`.
///
/// A background sweep runs every `timeout`, so a resource returned at `T`
/// is destroyed after `T + timeout` and before `T + 2 * timeout`.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{HookError, PooledResource, TimedObjectPool};
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct Session;
///
/// impl PooledResource for Session {
///     fn on_reset_state(&mut self) -> Result<(), HookError> { Ok(()) }
///     fn on_release_resources(&mut self) -> Result<(), HookError> { Ok(()) }
/// }
///
/// let pool = TimedObjectPool::<Session>::with_default_factory(Duration::from_secs(60)).unwrap();
/// drop(pool.checkout().unwrap());
/// assert_eq!(pool.idle_count(), 1);
///
/// pool.set_timeout(Duration::from_secs(5)).unwrap();
/// assert_eq!(pool.timeout(), Duration::from_secs(5));
/// ```
pub struct TimedObjectPool<T: PooledResource> {
    // Declared first so the sweeper stops before the pool is released.
    schedule: Mutex<Schedule>,
    pool: ObjectPool<T>,
}

impl<T: PooledResource> TimedObjectPool<T> {
    pub fn new<F>(maximum_size: usize, factory: F, timeout: Duration) -> PoolResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_config(
            factory,
            PoolConfiguration::new()
                .with_maximum_size(maximum_size)
                .with_idle_timeout(timeout),
        )
    }

    /// Create a timed pool with the default maximum size
    pub fn with_factory<F>(factory: F, timeout: Duration) -> PoolResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_config(factory, PoolConfiguration::new().with_idle_timeout(timeout))
    }

    pub fn try_new<F, E>(maximum_size: usize, factory: F, timeout: Duration) -> PoolResult<Self>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<HookError>,
    {
        let config = PoolConfiguration::new()
            .with_maximum_size(maximum_size)
            .with_idle_timeout(timeout);
        let timeout = Self::required_timeout(&config)?;
        Self::start(ObjectPool::try_with_config(factory, config)?, timeout)
    }

    /// Create a timed pool from a configuration; `idle_timeout` is required
    pub fn with_config<F>(factory: F, config: PoolConfiguration<T>) -> PoolResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let timeout = Self::required_timeout(&config)?;
        Self::start(ObjectPool::with_config(factory, config)?, timeout)
    }

    fn required_timeout(config: &PoolConfiguration<T>) -> PoolResult<Duration> {
        config
            .idle_timeout
            .ok_or_else(|| PoolError::configuration("a timed pool requires an idle_timeout"))
    }

    fn start(pool: ObjectPool<T>, timeout: Duration) -> PoolResult<Self> {
        let sweeper = Sweeper::spawn(pool.downgrade(), timeout)
            .map_err(|e| PoolError::Configuration(format!("failed to start sweeper thread: {e}")))?;

        Ok(Self {
            schedule: Mutex::new(Schedule { timeout, sweeper }),
            pool,
        })
    }

    /// Current idle timeout and sweep period
    pub fn timeout(&self) -> Duration {
        self.schedule.lock().timeout
    }

    /// Change the idle timeout; the sweep is rescheduled to the new period.
    ///
    /// Fails with [`PoolError::PoolClosed`] after [`clear`](Self::clear), and
    /// with [`PoolError::SweeperStopped`] if the sweeper thread has exited.
    pub fn set_timeout(&self, timeout: Duration) -> PoolResult<()> {
        if timeout.is_zero() {
            return Err(PoolError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        let mut schedule = self.schedule.lock();
        if self.pool.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        if schedule.timeout != timeout {
            debug!(old = ?schedule.timeout, new = ?timeout, "changing idle timeout");
            schedule.sweeper.reschedule(timeout)?;
            schedule.timeout = timeout;
        }
        Ok(())
    }

    /// Run one sweep now with the current timeout; returns how many were evicted
    pub fn evict_expired(&self) -> usize {
        let timeout = self.timeout();
        self.pool.evict_idle(timeout)
    }

    /// The underlying pool.
    ///
    /// Eviction belongs to this `TimedObjectPool`: a clone of the returned
    /// pool that outlives it keeps working but is no longer swept.
    pub fn pool(&self) -> &ObjectPool<T> {
        &self.pool
    }

    pub fn checkout(&self) -> PoolResult<PooledObject<T>> {
        self.pool.checkout()
    }

    pub fn try_checkout(&self) -> Option<PooledObject<T>> {
        self.pool.try_checkout()
    }

    pub fn checkout_timeout(&self, timeout: Duration) -> PoolResult<PooledObject<T>> {
        self.pool.checkout_timeout(timeout)
    }

    pub async fn checkout_async(&self) -> PoolResult<PooledObject<T>> {
        self.pool.checkout_async().await
    }

    pub fn with_resource<F, R>(&self, f: F) -> PoolResult<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        self.pool.with_resource(f)
    }

    pub fn return_object(&self, object: PooledObject<T>) -> PoolResult<()> {
        self.pool.return_object(object)
    }

    pub fn return_parts(&self, value: T, handle: &PooledResourceHandle<T>) -> Result<(), ReturnError<T>> {
        self.pool.return_parts(value, handle)
    }

    /// Stop the sweeper, destroy idle resources and reject further checkouts
    pub fn clear(&self) {
        self.schedule.lock().sweeper.stop();
        self.pool.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn idle_count(&self) -> usize {
        self.pool.idle_count()
    }

    pub fn outstanding_count(&self) -> usize {
        self.pool.outstanding_count()
    }

    pub fn overflow_count(&self) -> usize {
        self.pool.overflow_count()
    }

    pub fn maximum_size(&self) -> usize {
        self.pool.maximum_size()
    }

    // Delegate methods to inner pool
    pub fn get_health_status(&self) -> HealthStatus {
        self.pool.get_health_status()
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        self.pool.get_metrics()
    }

    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.pool.export_metrics()
    }

    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        self.pool.export_metrics_prometheus(pool_name, tags)
    }
}

impl<T: PooledResource + Default> TimedObjectPool<T> {
    /// Timed pool building resources with `T::default()` and the default maximum size
    pub fn with_default_factory(timeout: Duration) -> PoolResult<Self> {
        Self::with_factory(T::default, timeout)
    }

    pub fn with_default_factory_and_size(maximum_size: usize, timeout: Duration) -> PoolResult<Self> {
        Self::new(maximum_size, T::default, timeout)
    }
}
