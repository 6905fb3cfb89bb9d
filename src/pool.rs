//! Core resource pool implementation

use crate::config::{OverflowPolicy, PoolConfiguration};
use crate::errors::{HookError, InvalidReturnReason, PoolError, PoolResult, ReturnError};
use crate::handle::{PooledResourceHandle, ResourceId, ResourceState};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::resource::PooledResource;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);
const ASYNC_POLL_INTERVAL: Duration = Duration::from_millis(10);

type Factory<T> = dyn Fn() -> Result<T, HookError> + Send + Sync;

/// A checked-out resource that returns to its pool when dropped
pub struct PooledObject<T: PooledResource> {
    value: Option<T>,
    handle: PooledResourceHandle<T>,
}

impl<T: PooledResource> PooledObject<T> {
    fn new(value: T, handle: PooledResourceHandle<T>) -> Self {
        Self {
            value: Some(value),
            handle,
        }
    }

    /// Metadata of the checked-out resource
    pub fn handle(&self) -> &PooledResourceHandle<T> {
        &self.handle
    }

    pub fn id(&self) -> ResourceId {
        self.handle.id()
    }

    /// Detach the value from the guard.
    ///
    /// The resource stays checked out until it is handed back with
    /// [`ObjectPool::return_parts`].
    pub fn into_parts(mut self) -> (T, PooledResourceHandle<T>) {
        let value = self.value.take().expect("Value already taken");
        (value, self.handle.clone())
    }

    /// Destroy the resource instead of returning it
    pub fn discard(mut self) {
        if let Some(value) = self.value.take() {
            match self.handle.pool() {
                Some(pool) => pool.discard_checked_out(value, &self.handle),
                None => release_orphan(value, &self.handle),
            }
        }
    }
}

impl<T: PooledResource> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<T: PooledResource> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<T: PooledResource> Drop for PooledObject<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            return_to_owner(value, &self.handle);
        }
    }
}

impl<T: PooledResource + fmt::Debug> fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("value", &self.value)
            .field("handle", &self.handle)
            .finish()
    }
}

fn return_to_owner<T: PooledResource>(value: T, handle: &PooledResourceHandle<T>) {
    match handle.pool() {
        Some(pool) => {
            if let Err(rejected) = pool.release(value, handle) {
                warn!(resource = handle.id(), error = %rejected, "owning pool rejected a guard return");
                release_orphan(rejected.into_inner(), handle);
            }
        }
        None => release_orphan(value, handle),
    }
}

/// Release a resource whose pool is gone.
fn release_orphan<T: PooledResource>(mut value: T, handle: &PooledResourceHandle<T>) {
    if handle.dispose()
        && let Err(error) = value.on_release_resources()
    {
        warn!(resource = handle.id(), %error, "releasing orphaned resource failed");
    }
}

struct IdleEntry<T: PooledResource> {
    value: T,
    handle: PooledResourceHandle<T>,
}

/// State shared by a pool, its guards and its sweeper
pub(crate) struct PoolInner<T: PooledResource> {
    id: u64,
    self_ref: Weak<PoolInner<T>>,
    config: PoolConfiguration<T>,
    factory: Box<Factory<T>>,
    idle: Mutex<Vec<IdleEntry<T>>>,
    slot_freed: Condvar,
    checked_out: DashMap<ResourceId, ()>,
    managed: AtomicUsize,
    overflow: AtomicUsize,
    closed: AtomicBool,
    next_id: AtomicU64,
    metrics: MetricsTracker,
}

impl<T: PooledResource> PoolInner<T> {
    fn new(factory: Box<Factory<T>>, config: PoolConfiguration<T>) -> Arc<Self> {
        let maximum_size = config.maximum_size;
        Arc::new_cyclic(|self_ref| Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            self_ref: self_ref.clone(),
            config,
            factory,
            idle: Mutex::new(Vec::with_capacity(maximum_size)),
            slot_freed: Condvar::new(),
            checked_out: DashMap::new(),
            managed: AtomicUsize::new(0),
            overflow: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            metrics: MetricsTracker::new(),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> PoolResult<()> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        Ok(())
    }

    fn passes_validation(&self, value: &T) -> bool {
        value.is_valid() && self.config.validation_function.is_none_or(|validate| validate(value))
    }

    /// Claim one managed slot if the pool is below its maximum size.
    fn reserve_slot(&self) -> bool {
        let maximum_size = self.config.maximum_size;
        self.managed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < maximum_size).then_some(n + 1))
            .is_ok()
    }

    fn release_slot(&self) {
        self.managed.fetch_sub(1, Ordering::AcqRel);
        // Notify under the lock so a waiter between its check and its wait
        // cannot miss the wakeup.
        let _idle = self.idle.lock();
        self.slot_freed.notify_one();
    }

    /// Build a new checked-out resource. Managed creations must already hold a slot.
    fn create(&self, overflow: bool) -> PoolResult<PooledObject<T>> {
        let value = match (self.factory)() {
            Ok(value) => value,
            Err(error) => {
                if !overflow {
                    self.release_slot();
                }
                self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
                warn!(pool = self.id, %error, "resource factory failed");
                return Err(PoolError::factory(error));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = PooledResourceHandle::new(id, self.id, self.self_ref.clone(), overflow);
        if overflow {
            self.overflow.fetch_add(1, Ordering::AcqRel);
            self.metrics.overflow_created.fetch_add(1, Ordering::Relaxed);
        }
        self.checked_out.insert(id, ());
        self.metrics.created.fetch_add(1, Ordering::Relaxed);
        self.metrics.total_checkouts.fetch_add(1, Ordering::Relaxed);
        debug!(pool = self.id, resource = id, overflow, "created pooled resource");

        Ok(PooledObject::new(value, handle))
    }

    /// Hand an entry popped from the idle set to a caller, or destroy it if
    /// it no longer validates.
    fn admit(&self, entry: IdleEntry<T>) -> Option<PooledObject<T>> {
        if !self.passes_validation(&entry.value) {
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            debug!(pool = self.id, resource = entry.handle.id(), "idle resource failed validation");
            self.discard_managed(entry.value, &entry.handle);
            return None;
        }
        if let Err(state) = entry.handle.transition(ResourceState::Idle, ResourceState::CheckedOut) {
            warn!(pool = self.id, resource = entry.handle.id(), ?state, "idle entry in unexpected state");
            self.discard_managed(entry.value, &entry.handle);
            return None;
        }

        self.checked_out.insert(entry.handle.id(), ());
        self.metrics.total_checkouts.fetch_add(1, Ordering::Relaxed);
        trace!(pool = self.id, resource = entry.handle.id(), "checked out idle resource");
        Some(PooledObject::new(entry.value, entry.handle))
    }

    fn take_idle(&self) -> Option<PooledObject<T>> {
        loop {
            let entry = self.idle.lock().pop()?;
            if let Some(object) = self.admit(entry) {
                return Some(object);
            }
        }
    }

    /// Idle resource or new managed resource; `None` when saturated.
    fn try_acquire(&self) -> PoolResult<Option<PooledObject<T>>> {
        self.ensure_open()?;
        if let Some(object) = self.take_idle() {
            return Ok(Some(object));
        }
        if self.reserve_slot() {
            return self.create(false).map(Some);
        }
        self.metrics.saturated_events.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn exhausted(&self) -> PoolError {
        PoolError::Exhausted {
            maximum_size: self.config.maximum_size,
        }
    }

    fn checkout_now(&self) -> PoolResult<PooledObject<T>> {
        if let Some(object) = self.try_acquire()? {
            return Ok(object);
        }
        match self.config.overflow_policy {
            OverflowPolicy::Allow => self.create(true),
            OverflowPolicy::FailFast => Err(self.exhausted()),
            OverflowPolicy::Block => self.wait_for_resource(self.checkout_timeout()),
        }
    }

    fn checkout_timeout(&self) -> Duration {
        self.config.checkout_timeout.unwrap_or(DEFAULT_CHECKOUT_TIMEOUT)
    }

    fn wait_for_resource(&self, timeout: Duration) -> PoolResult<PooledObject<T>> {
        // Too far in the future to represent: wait without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let mut idle = self.idle.lock();
            let entry = loop {
                if self.is_closed() {
                    return Err(PoolError::PoolClosed);
                }
                if let Some(entry) = idle.pop() {
                    break Some(entry);
                }
                if self.reserve_slot() {
                    break None;
                }
                let Some(deadline) = deadline else {
                    self.slot_freed.wait(&mut idle);
                    continue;
                };
                if self.slot_freed.wait_until(&mut idle, deadline).timed_out() {
                    self.metrics.checkout_timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::CheckoutTimeout(timeout));
                }
            };
            drop(idle);

            match entry {
                Some(entry) => {
                    if let Some(object) = self.admit(entry) {
                        return Ok(object);
                    }
                }
                None => return self.create(false),
            }
        }
    }

    /// Take a checked-out resource back. Exactly one caller can claim a
    /// given checkout; everyone else gets `InvalidReturn`.
    pub(crate) fn release(&self, mut value: T, handle: &PooledResourceHandle<T>) -> Result<(), ReturnError<T>> {
        if handle.pool_id() != self.id {
            return Err(ReturnError::new(
                PoolError::InvalidReturn(InvalidReturnReason::ForeignPool),
                value,
            ));
        }
        if self.checked_out.remove(&handle.id()).is_none() {
            let reason = InvalidReturnReason::NotCheckedOut(handle.state());
            return Err(ReturnError::new(PoolError::InvalidReturn(reason), value));
        }
        self.metrics.total_returns.fetch_add(1, Ordering::Relaxed);

        if handle.is_overflow() {
            self.overflow.fetch_sub(1, Ordering::AcqRel);
            self.destroy(value, handle);
            return Ok(());
        }
        if !self.passes_validation(&value) {
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            debug!(pool = self.id, resource = handle.id(), "returned resource failed validation");
            self.discard_managed(value, handle);
            return Ok(());
        }
        if let Err(error) = value.on_reset_state() {
            self.metrics.reset_failures.fetch_add(1, Ordering::Relaxed);
            warn!(pool = self.id, resource = handle.id(), %error, "resetting resource failed");
            self.discard_managed(value, handle);
            return Ok(());
        }

        let mut idle = self.idle.lock();
        let over_capacity = self.managed.load(Ordering::Acquire) > self.config.maximum_size;
        if self.is_closed()
            || over_capacity
            || handle.transition(ResourceState::CheckedOut, ResourceState::Idle).is_err()
        {
            drop(idle);
            self.discard_managed(value, handle);
            return Ok(());
        }
        handle.stamp(Instant::now());
        idle.push(IdleEntry {
            value,
            handle: handle.clone(),
        });
        self.slot_freed.notify_one();
        trace!(pool = self.id, resource = handle.id(), "resource returned to idle set");
        Ok(())
    }

    fn discard_checked_out(&self, value: T, handle: &PooledResourceHandle<T>) {
        if self.checked_out.remove(&handle.id()).is_none() {
            release_orphan(value, handle);
            return;
        }
        if handle.is_overflow() {
            self.overflow.fetch_sub(1, Ordering::AcqRel);
            self.destroy(value, handle);
        } else {
            self.discard_managed(value, handle);
        }
    }

    fn discard_managed(&self, value: T, handle: &PooledResourceHandle<T>) {
        self.destroy(value, handle);
        self.release_slot();
    }

    /// Run the release hook once and drop the value.
    fn destroy(&self, mut value: T, handle: &PooledResourceHandle<T>) {
        if !handle.dispose() {
            return;
        }
        if let Err(error) = value.on_release_resources() {
            self.metrics.release_failures.fetch_add(1, Ordering::Relaxed);
            warn!(pool = self.id, resource = handle.id(), %error, "releasing resource failed");
            if let Some(observer) = self.config.release_error_handler {
                observer(handle.id(), &error);
            }
        }
        self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(pool = self.id, resource = handle.id(), "destroyed pooled resource");
    }

    /// Destroy idle resources that went idle more than `older_than` ago.
    pub(crate) fn evict_idle(&self, older_than: Duration) -> usize {
        let snapshot: Vec<(ResourceId, Option<Instant>)> = self
            .idle
            .lock()
            .iter()
            .map(|entry| (entry.handle.id(), entry.handle.last_used_at()))
            .collect();
        let Some(cutoff) = Instant::now().checked_sub(older_than) else {
            return 0;
        };

        let mut evicted = 0;
        for (id, last_used_at) in snapshot {
            let Some(last_used_at) = last_used_at else {
                continue;
            };
            if last_used_at >= cutoff {
                continue;
            }

            // The entry may have been checked out (and maybe returned again)
            // since the snapshot; only the same idle period may be evicted.
            let entry = {
                let mut idle = self.idle.lock();
                idle.iter()
                    .position(|entry| entry.handle.id() == id && entry.handle.last_used_at() == Some(last_used_at))
                    .map(|index| idle.remove(index))
            };
            if let Some(entry) = entry {
                self.metrics.evicted.fetch_add(1, Ordering::Relaxed);
                self.discard_managed(entry.value, &entry.handle);
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(pool = self.id, evicted, "evicted idle resources");
        }
        evicted
    }

    /// One background sweep: evict resources idle for longer than `timeout`.
    pub(crate) fn sweep(&self, timeout: Duration) -> usize {
        let evicted = self.evict_idle(timeout);
        self.metrics.sweeps.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    fn warmup(&self, count: usize) -> PoolResult<usize> {
        let mut created = 0;
        for _ in 0..count {
            self.ensure_open()?;
            if !self.reserve_slot() {
                break;
            }
            let value = match (self.factory)() {
                Ok(value) => value,
                Err(error) => {
                    self.release_slot();
                    self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::factory(error));
                }
            };

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let handle = PooledResourceHandle::with_state(id, self.id, self.self_ref.clone(), false, ResourceState::Idle);
            self.metrics.created.fetch_add(1, Ordering::Relaxed);

            let mut idle = self.idle.lock();
            if self.is_closed() {
                drop(idle);
                self.discard_managed(value, &handle);
                return Err(PoolError::PoolClosed);
            }
            handle.stamp(Instant::now());
            idle.push(IdleEntry { value, handle });
            self.slot_freed.notify_one();
            created += 1;
        }
        debug!(pool = self.id, created, "warmed up pool");
        Ok(created)
    }

    fn clear(&self) {
        self.closed.store(true, Ordering::Release);
        let drained = {
            let mut idle = self.idle.lock();
            let drained = std::mem::take(&mut *idle);
            self.slot_freed.notify_all();
            drained
        };

        let count = drained.len();
        for entry in drained {
            self.discard_managed(entry.value, &entry.handle);
        }
        debug!(pool = self.id, destroyed = count, "pool cleared");
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn outstanding_count(&self) -> usize {
        self.checked_out.len().saturating_sub(self.overflow.load(Ordering::Acquire))
    }
}

impl<T: PooledResource> Drop for PoolInner<T> {
    fn drop(&mut self) {
        let drained = std::mem::take(self.idle.get_mut());
        for entry in drained {
            self.destroy(entry.value, &entry.handle);
        }
    }
}

/// Thread-safe pool of reusable resources built on demand by a factory.
///
/// Cloning the pool clones a reference to the same shared state.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{HookError, ObjectPool, PooledResource};
///
/// struct Scratch(Vec<u8>);
///
/// impl PooledResource for Scratch {
///     fn on_reset_state(&mut self) -> Result<(), HookError> {
///         self.0.clear();
///         Ok(())
///     }
///
///     fn on_release_resources(&mut self) -> Result<(), HookError> {
///         Ok(())
///     }
/// }
///
/// let pool = ObjectPool::new(2, || Scratch(Vec::new())).unwrap();
/// {
///     let mut scratch = pool.checkout().unwrap();
///     scratch.0.push(1);
///     // Returned when `scratch` goes out of scope
/// }
/// assert_eq!(pool.idle_count(), 1);
/// assert!(pool.checkout().unwrap().0.is_empty());
/// ```
pub struct ObjectPool<T: PooledResource> {
    inner: Arc<PoolInner<T>>,
}

impl<T: PooledResource> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PooledResource> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("id", &self.inner.id)
            .field("maximum_size", &self.inner.config.maximum_size)
            .field("idle", &self.idle_count())
            .field("outstanding", &self.outstanding_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: PooledResource> ObjectPool<T> {
    /// Create a pool holding at most `maximum_size` managed resources
    pub fn new<F>(maximum_size: usize, factory: F) -> PoolResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_config(factory, PoolConfiguration::new().with_maximum_size(maximum_size))
    }

    /// Create a pool with the default maximum size
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::from_parts(Box::new(move || Ok::<T, HookError>(factory())), PoolConfiguration::default())
    }

    /// Create a pool whose factory may fail; failures surface as [`PoolError::Factory`]
    pub fn try_new<F, E>(maximum_size: usize, factory: F) -> PoolResult<Self>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<HookError>,
    {
        Self::try_with_config(factory, PoolConfiguration::new().with_maximum_size(maximum_size))
    }

    pub fn with_config<F>(factory: F, config: PoolConfiguration<T>) -> PoolResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Box::new(move || Ok::<T, HookError>(factory())), config)
    }

    pub fn try_with_config<F, E>(factory: F, config: PoolConfiguration<T>) -> PoolResult<Self>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<HookError>,
    {
        Self::build(Box::new(move || factory().map_err(Into::<HookError>::into)), config)
    }

    fn build(factory: Box<Factory<T>>, config: PoolConfiguration<T>) -> PoolResult<Self> {
        config.validate()?;
        let warmup = config.warmup_size;
        let pool = Self::from_parts(factory, config);
        if let Some(count) = warmup {
            pool.inner.warmup(count)?;
        }
        Ok(pool)
    }

    fn from_parts(factory: Box<Factory<T>>, config: PoolConfiguration<T>) -> Self {
        let inner = PoolInner::new(factory, config);
        debug!(
            pool = inner.id,
            maximum_size = inner.config.maximum_size,
            policy = ?inner.config.overflow_policy,
            "created object pool"
        );
        Self { inner }
    }

    /// Check out a resource.
    ///
    /// Reuses the most recently returned idle resource, otherwise builds a
    /// new one. When every managed slot is in use the configured
    /// [`OverflowPolicy`](crate::OverflowPolicy) decides.
    pub fn checkout(&self) -> PoolResult<PooledObject<T>> {
        self.inner.checkout_now()
    }

    /// Check out an idle or newly built managed resource without blocking or overflowing
    pub fn try_checkout(&self) -> Option<PooledObject<T>> {
        self.inner.try_acquire().ok().flatten()
    }

    /// Check out a resource, waiting up to `timeout` for one to free up
    pub fn checkout_timeout(&self, timeout: Duration) -> PoolResult<PooledObject<T>> {
        if let Some(object) = self.inner.try_acquire()? {
            return Ok(object);
        }
        self.inner.wait_for_resource(timeout)
    }

    /// Check out a resource asynchronously, bounded by the configured checkout timeout
    pub async fn checkout_async(&self) -> PoolResult<PooledObject<T>> {
        let timeout = self.inner.checkout_timeout();

        tokio::time::timeout(timeout, async {
            loop {
                match self.inner.try_acquire() {
                    Ok(Some(object)) => return Ok(object),
                    Ok(None) => {}
                    Err(error) => return Err(error),
                }
                match self.inner.config.overflow_policy {
                    OverflowPolicy::Allow => return self.inner.create(true),
                    OverflowPolicy::FailFast => return Err(self.inner.exhausted()),
                    OverflowPolicy::Block => tokio::time::sleep(ASYNC_POLL_INTERVAL).await,
                }
            }
        })
        .await
        .map_err(|_| {
            self.inner.metrics.checkout_timeouts.fetch_add(1, Ordering::Relaxed);
            PoolError::CheckoutTimeout(timeout)
        })?
    }

    /// Run `f` with a checked-out resource, returning it on every exit path
    pub fn with_resource<F, R>(&self, f: F) -> PoolResult<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut object = self.checkout()?;
        Ok(f(&mut object))
    }

    /// Return a resource explicitly.
    ///
    /// A resource owned by another pool is rejected with
    /// [`PoolError::InvalidReturn`] and the guard goes back to its own pool.
    pub fn return_object(&self, object: PooledObject<T>) -> PoolResult<()> {
        if !self.owns(object.handle()) {
            return Err(PoolError::InvalidReturn(InvalidReturnReason::ForeignPool));
        }
        let (value, handle) = object.into_parts();
        self.inner.release(value, &handle).map_err(|rejected| {
            let error = rejected.error().clone();
            release_orphan(rejected.into_inner(), &handle);
            error
        })
    }

    /// Return a value detached with [`PooledObject::into_parts`].
    ///
    /// Foreign-pool and repeated returns are rejected and the value is handed back.
    pub fn return_parts(&self, value: T, handle: &PooledResourceHandle<T>) -> Result<(), ReturnError<T>> {
        self.inner.release(value, handle)
    }

    /// Whether `handle` belongs to this pool
    pub fn owns(&self, handle: &PooledResourceHandle<T>) -> bool {
        handle.pool_id() == self.inner.id
    }

    /// Pre-build up to `count` idle resources; returns how many were built
    pub fn warmup(&self, count: usize) -> PoolResult<usize> {
        self.inner.warmup(count)
    }

    /// Destroy idle resources that have not been used for longer than `older_than`
    pub fn evict_idle(&self, older_than: Duration) -> usize {
        self.inner.evict_idle(older_than)
    }

    /// Destroy every idle resource and stop accepting checkouts.
    ///
    /// Resources still checked out are destroyed when they come back.
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle_count()
    }

    /// Managed resources currently checked out
    pub fn outstanding_count(&self) -> usize {
        self.inner.outstanding_count()
    }

    /// Overflow resources currently checked out
    pub fn overflow_count(&self) -> usize {
        self.inner.overflow.load(Ordering::Acquire)
    }

    pub fn maximum_size(&self) -> usize {
        self.inner.config.maximum_size
    }

    /// Idle timeout the pool was configured with, if any
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.inner.config.idle_timeout
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::new(
            self.idle_count(),
            self.outstanding_count(),
            self.overflow_count(),
            self.maximum_size(),
            self.is_closed(),
        )
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(
            self.idle_count(),
            self.outstanding_count(),
            self.overflow_count(),
            self.maximum_size(),
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    pub(crate) fn downgrade(&self) -> Weak<PoolInner<T>> {
        Arc::downgrade(&self.inner)
    }
}

impl<T: PooledResource + Default> ObjectPool<T> {
    /// Create a pool that builds resources with `T::default()`
    pub fn with_default(maximum_size: usize) -> PoolResult<Self> {
        Self::new(maximum_size, T::default)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Default, Debug)]
    pub(crate) struct Counters {
        pub resets: AtomicUsize,
        pub releases: AtomicUsize,
    }

    #[derive(Debug)]
    pub(crate) struct Connection {
        pub counters: Arc<Counters>,
        pub dirty: bool,
        pub healthy: bool,
        pub fail_reset: bool,
        pub fail_release: bool,
    }

    impl Connection {
        pub fn new(counters: &Arc<Counters>) -> Self {
            Self {
                counters: Arc::clone(counters),
                dirty: false,
                healthy: true,
                fail_reset: false,
                fail_release: false,
            }
        }
    }

    impl PooledResource for Connection {
        fn on_reset_state(&mut self) -> Result<(), HookError> {
            self.counters.resets.fetch_add(1, Ordering::SeqCst);
            if self.fail_reset {
                return Err("reset failed".into());
            }
            self.dirty = false;
            Ok(())
        }

        fn on_release_resources(&mut self) -> Result<(), HookError> {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                return Err("release failed".into());
            }
            Ok(())
        }

        fn is_valid(&self) -> bool {
            self.healthy
        }
    }

    pub(crate) fn pool_of(maximum_size: usize) -> (ObjectPool<Connection>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let shared = Arc::clone(&counters);
        let pool = ObjectPool::new(maximum_size, move || Connection::new(&shared)).unwrap();
        (pool, counters)
    }

    fn releases(counters: &Counters) -> usize {
        counters.releases.load(Ordering::SeqCst)
    }

    #[test]
    fn test_checkout_reuses_returned_resource() {
        let (pool, counters) = pool_of(4);

        let first_id = {
            let mut conn = pool.checkout().unwrap();
            conn.dirty = true;
            conn.id()
        };
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(counters.resets.load(Ordering::SeqCst), 1);

        let conn = pool.checkout().unwrap();
        assert_eq!(conn.id(), first_id);
        assert!(!conn.dirty);
        assert_eq!(conn.handle().state(), ResourceState::CheckedOut);
        assert_eq!(pool.get_metrics().created, 1);
    }

    #[test]
    fn test_zero_maximum_size_is_rejected() {
        let counters = Arc::new(Counters::default());
        let result = ObjectPool::new(0, move || Connection::new(&counters));
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[test]
    fn test_allow_policy_overflows_and_destroys_on_return() {
        let (pool, counters) = pool_of(2);

        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        let c = pool.checkout().unwrap();
        assert!(c.handle().is_overflow());
        assert_eq!(pool.outstanding_count(), 2);
        assert_eq!(pool.overflow_count(), 1);

        drop(c);
        assert_eq!(releases(&counters), 1);
        assert_eq!(pool.overflow_count(), 0);

        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(releases(&counters), 1);
    }

    #[test]
    fn test_fail_fast_policy() {
        let counters = Arc::new(Counters::default());
        let config = PoolConfiguration::new()
            .with_maximum_size(1)
            .with_overflow_policy(OverflowPolicy::FailFast);
        let pool = ObjectPool::with_config(move || Connection::new(&counters), config).unwrap();

        let _held = pool.checkout().unwrap();
        assert!(matches!(pool.checkout(), Err(PoolError::Exhausted { maximum_size: 1 })));
        assert!(pool.try_checkout().is_none());
    }

    #[test]
    fn test_block_policy_times_out() {
        let counters = Arc::new(Counters::default());
        let config = PoolConfiguration::new()
            .with_maximum_size(1)
            .with_overflow_policy(OverflowPolicy::Block)
            .with_checkout_timeout(Duration::from_millis(50));
        let pool = ObjectPool::with_config(move || Connection::new(&counters), config).unwrap();

        let _held = pool.checkout().unwrap();
        let started = Instant::now();
        assert!(matches!(pool.checkout(), Err(PoolError::CheckoutTimeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.get_metrics().checkout_timeouts, 1);
    }

    #[test]
    fn test_block_policy_wakes_on_return() {
        let counters = Arc::new(Counters::default());
        let config = PoolConfiguration::new()
            .with_maximum_size(1)
            .with_overflow_policy(OverflowPolicy::Block)
            .with_checkout_timeout(Duration::from_secs(5));
        let pool = ObjectPool::with_config(move || Connection::new(&counters), config).unwrap();

        let held = pool.checkout().unwrap();
        let held_id = held.id();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(held);
        });

        let conn = pool.checkout().unwrap();
        assert_eq!(conn.id(), held_id);
        releaser.join().unwrap();
    }

    #[test]
    fn test_unrepresentable_checkout_timeout_waits_without_deadline() {
        let counters = Arc::new(Counters::default());
        let config = PoolConfiguration::new()
            .with_maximum_size(1)
            .with_overflow_policy(OverflowPolicy::Block)
            .with_checkout_timeout(Duration::MAX);
        let pool = ObjectPool::with_config(move || Connection::new(&counters), config).unwrap();

        let held = pool.checkout().unwrap();
        let held_id = held.id();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.checkout().map(|conn| conn.id()))
        };
        let explicit = {
            let pool = pool.clone();
            thread::spawn(move || pool.checkout_timeout(Duration::MAX).map(|conn| conn.id()))
        };

        thread::sleep(Duration::from_millis(30));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
        assert_eq!(explicit.join().unwrap().unwrap(), held_id);
    }

    #[test]
    fn test_foreign_return_is_rejected() {
        let (pool_a, _) = pool_of(2);
        let (pool_b, _) = pool_of(2);

        let conn = pool_a.checkout().unwrap();
        let err = pool_b.return_object(conn).unwrap_err();
        assert!(matches!(err, PoolError::InvalidReturn(InvalidReturnReason::ForeignPool)));

        assert_eq!(pool_b.idle_count(), 0);
        assert_eq!(pool_a.idle_count(), 1);
        assert_eq!(pool_a.outstanding_count(), 0);
    }

    #[test]
    fn test_double_return_is_rejected() {
        let (pool, counters) = pool_of(2);

        let (value, handle) = pool.checkout().unwrap().into_parts();
        pool.return_parts(value, &handle).unwrap();
        assert_eq!(pool.idle_count(), 1);

        let rejected = pool.return_parts(Connection::new(&counters), &handle).unwrap_err();
        assert!(matches!(
            rejected.error(),
            PoolError::InvalidReturn(InvalidReturnReason::NotCheckedOut(ResourceState::Idle))
        ));
        let _ = rejected.into_inner();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.get_metrics().total_returns, 1);
    }

    #[test]
    fn test_invalid_resource_is_destroyed_on_return() {
        let (pool, counters) = pool_of(2);

        {
            let mut conn = pool.checkout().unwrap();
            conn.healthy = false;
        }
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(releases(&counters), 1);
        assert_eq!(pool.get_metrics().validation_failures, 1);
    }

    #[test]
    fn test_reset_failure_destroys_resource() {
        let (pool, counters) = pool_of(2);

        let mut conn = pool.checkout().unwrap();
        conn.fail_reset = true;
        let handle = conn.handle().clone();
        assert!(pool.return_object(conn).is_ok());

        assert_eq!(handle.state(), ResourceState::Disposed);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(releases(&counters), 1);
        assert_eq!(pool.get_metrics().reset_failures, 1);
    }

    static OBSERVED_RELEASE_FAILURES: AtomicUsize = AtomicUsize::new(0);

    fn observe_release_failure(_id: ResourceId, _error: &HookError) {
        OBSERVED_RELEASE_FAILURES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_release_failure_still_disposes() {
        let counters = Arc::new(Counters::default());
        let shared = Arc::clone(&counters);
        let config = PoolConfiguration::new()
            .with_maximum_size(1)
            .with_release_error_handler(observe_release_failure);
        let pool = ObjectPool::with_config(move || Connection::new(&shared), config).unwrap();

        let mut conn = pool.checkout().unwrap();
        conn.fail_release = true;
        conn.discard();

        assert_eq!(OBSERVED_RELEASE_FAILURES.load(Ordering::SeqCst), 1);
        assert_eq!(releases(&counters), 1);
        assert_eq!(pool.get_metrics().release_failures, 1);
        assert_eq!(pool.outstanding_count(), 0);
        assert!(pool.checkout().is_ok());
    }

    #[test]
    fn test_factory_error_propagates_and_frees_slot() {
        let pool = ObjectPool::<Connection>::try_new(1, || Err::<Connection, _>("connect refused")).unwrap();

        let err = pool.checkout().unwrap_err();
        assert!(matches!(err, PoolError::Factory(_)));
        assert_eq!(err.to_string(), "Resource factory failed: connect refused");
        assert_eq!(pool.outstanding_count(), 0);
        assert!(matches!(pool.checkout(), Err(PoolError::Factory(_))));
    }

    #[test]
    fn test_clear_closes_pool_and_destroys_late_returns() {
        let (pool, counters) = pool_of(3);

        let held = pool.checkout().unwrap();
        drop(pool.checkout().unwrap());
        assert_eq!(pool.idle_count(), 1);

        pool.clear();
        assert!(pool.is_closed());
        assert_eq!(releases(&counters), 1);
        assert!(matches!(pool.checkout(), Err(PoolError::PoolClosed)));

        drop(held);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(releases(&counters), 2);
    }

    #[test]
    fn test_with_resource_returns_on_panic() {
        let (pool, _) = pool_of(1);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.with_resource(|conn: &mut Connection| {
                conn.dirty = true;
                if conn.dirty {
                    panic!("caller failed");
                }
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.outstanding_count(), 0);

        let dirty = pool.with_resource(|conn| conn.dirty).unwrap();
        assert!(!dirty);
    }

    #[test]
    fn test_guard_outliving_pool_releases_itself() {
        let (pool, counters) = pool_of(2);

        let held = pool.checkout().unwrap();
        drop(pool.checkout().unwrap());
        drop(pool);
        assert_eq!(releases(&counters), 1);

        drop(held);
        assert_eq!(releases(&counters), 2);
    }

    #[test]
    fn test_warmup_fills_idle_set() {
        let counters = Arc::new(Counters::default());
        let shared = Arc::clone(&counters);
        let config = PoolConfiguration::new().with_maximum_size(3).with_warmup(2);
        let pool = ObjectPool::with_config(move || Connection::new(&shared), config).unwrap();
        assert_eq!(pool.idle_count(), 2);

        assert_eq!(pool.warmup(5).unwrap(), 1);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.get_metrics().created, 3);
    }

    #[test]
    fn test_evict_idle_respects_age() {
        let (pool, counters) = pool_of(2);
        drop(pool.checkout().unwrap());

        assert_eq!(pool.evict_idle(Duration::from_secs(60)), 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.evict_idle(Duration::from_millis(10)), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(releases(&counters), 1);
    }

    #[tokio::test]
    async fn test_async_checkout() {
        let (pool, _) = pool_of(2);

        let conn = pool.checkout_async().await.unwrap();
        assert_eq!(pool.outstanding_count(), 1);
        drop(conn);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_async_checkout_times_out_when_blocked() {
        let counters = Arc::new(Counters::default());
        let config = PoolConfiguration::new()
            .with_maximum_size(1)
            .with_overflow_policy(OverflowPolicy::Block)
            .with_checkout_timeout(Duration::from_millis(40));
        let pool = ObjectPool::with_config(move || Connection::new(&counters), config).unwrap();

        let _held = pool.checkout_async().await.unwrap();
        assert!(matches!(pool.checkout_async().await, Err(PoolError::CheckoutTimeout(_))));
    }

    #[test]
    fn test_idle_entry_in_wrong_state_is_released_not_leaked() {
        let (pool, counters) = pool_of(1);
        assert!(pool.inner.reserve_slot());
        let handle = PooledResourceHandle::with_state(
            u64::MAX,
            pool.inner.id,
            pool.downgrade(),
            false,
            ResourceState::CheckedOut,
        );
        let entry = IdleEntry {
            value: Connection::new(&counters),
            handle: handle.clone(),
        };

        assert!(pool.inner.admit(entry).is_none());
        assert_eq!(releases(&counters), 1);
        assert_eq!(handle.state(), ResourceState::Disposed);
        // The reserved slot is free again.
        assert!(pool.try_checkout().is_some());
    }
}
