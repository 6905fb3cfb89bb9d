//! Error types for the resource pool

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::handle::ResourceState;

/// Error produced by a lifecycle hook or a fallible factory.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a return was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReturnReason {
    /// The resource belongs to a different pool.
    ForeignPool,

    /// The resource is not checked out (double return, or already disposed).
    NotCheckedOut(ResourceState),
}

impl fmt::Display for InvalidReturnReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignPool => f.write_str("resource is owned by another pool"),
            Self::NotCheckedOut(state) => write!(f, "resource is not checked out (state: {state:?})"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Configuration(String),

    #[error("Invalid return: {0}")]
    InvalidReturn(InvalidReturnReason),

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Resource factory failed: {0}")]
    Factory(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Checkout timed out after {0:?}")]
    CheckoutTimeout(Duration),

    #[error("Pool is exhausted - all {maximum_size} resources are in use")]
    Exhausted { maximum_size: usize },

    #[error("Eviction sweeper is not running")]
    SweeperStopped,
}

impl PoolError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn factory(error: HookError) -> Self {
        Self::Factory(Arc::from(error))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// A rejected return, handing the value back to the caller.
#[derive(Error)]
#[error("{error}")]
pub struct ReturnError<T> {
    error: PoolError,
    value: T,
}

impl<T> ReturnError<T> {
    pub(crate) fn new(error: PoolError, value: T) -> Self {
        Self { error, value }
    }

    /// The reason the return was rejected
    pub fn error(&self) -> &PoolError {
        &self.error
    }

    /// Take back ownership of the rejected value
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for ReturnError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
