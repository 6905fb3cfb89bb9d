//! Pool configuration options

use std::time::Duration;

use crate::errors::{HookError, PoolError, PoolResult};
use crate::handle::ResourceId;

/// Default maximum number of managed resources
pub const DEFAULT_MAXIMUM_SIZE: usize = 100;

/// What a checkout does when every managed slot is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Build an unmanaged overflow resource that is destroyed on return
    #[default]
    Allow,

    /// Fail immediately with [`PoolError::Exhausted`]
    FailFast,

    /// Wait for a resource or a free slot, bounded by the checkout timeout
    Block,
}

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{OverflowPolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::<String>::new()
///     .with_maximum_size(8)
///     .with_overflow_policy(OverflowPolicy::Block)
///     .with_checkout_timeout(Duration::from_millis(500));
///
/// assert_eq!(config.maximum_size, 8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration<T> {
    /// Maximum number of managed resources (idle + checked out)
    pub maximum_size: usize,

    /// Behavior of a checkout when the pool is saturated
    pub overflow_policy: OverflowPolicy,

    /// Extra validation applied on checkout and return, on top of `is_valid`
    pub validation_function: Option<fn(&T) -> bool>,

    /// Upper bound for blocking and async checkouts
    pub checkout_timeout: Option<Duration>,

    /// Idle time after which the timed pool evicts a resource
    pub idle_timeout: Option<Duration>,

    /// Number of resources to build when the pool is created
    pub warmup_size: Option<usize>,

    /// Observer for failing release hooks
    pub release_error_handler: Option<fn(ResourceId, &HookError)>,
}

impl<T> Default for PoolConfiguration<T> {
    fn default() -> Self {
        Self {
            maximum_size: DEFAULT_MAXIMUM_SIZE,
            overflow_policy: OverflowPolicy::default(),
            validation_function: None,
            checkout_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            warmup_size: None,
            release_error_handler: None,
        }
    }
}

impl<T> PoolConfiguration<T> {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::<i32>::new()
    ///     .with_maximum_size(50);
    ///
    /// assert_eq!(config.maximum_size, 50);
    /// ```
    pub fn with_maximum_size(mut self, size: usize) -> Self {
        self.maximum_size = size;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Reject resources for which `func` returns false
    pub fn with_validation(mut self, func: fn(&T) -> bool) -> Self {
        self.validation_function = Some(func);
        self
    }

    /// Set the timeout for blocking and async checkouts
    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = Some(timeout);
        self
    }

    /// Set the idle timeout used by the timed pool
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Pre-build `size` resources at construction
    pub fn with_warmup(mut self, size: usize) -> Self {
        self.warmup_size = Some(size);
        self
    }

    pub fn with_release_error_handler(mut self, handler: fn(ResourceId, &HookError)) -> Self {
        self.release_error_handler = Some(handler);
        self
    }

    /// Check the configuration, rejecting values that would otherwise be clamped.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::{PoolConfiguration, PoolError};
    ///
    /// let config = PoolConfiguration::<i32>::new().with_maximum_size(0);
    /// assert!(matches!(config.validate(), Err(PoolError::Configuration(_))));
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.maximum_size == 0 {
            return Err(PoolError::configuration("maximum_size must be greater than 0"));
        }
        if let Some(timeout) = self.checkout_timeout
            && timeout.is_zero()
        {
            return Err(PoolError::configuration(
                "checkout_timeout must be greater than zero",
            ));
        }
        if self.overflow_policy == OverflowPolicy::Block && self.checkout_timeout.is_none() {
            return Err(PoolError::configuration(
                "the blocking overflow policy requires a checkout_timeout",
            ));
        }
        if let Some(timeout) = self.idle_timeout
            && timeout.is_zero()
        {
            return Err(PoolError::configuration("idle_timeout must be greater than zero"));
        }
        if let Some(warmup) = self.warmup_size
            && warmup > self.maximum_size
        {
            return Err(PoolError::configuration(format!(
                "warmup_size ({warmup}) must not exceed maximum_size ({})",
                self.maximum_size
            )));
        }
        Ok(())
    }
}
