//! Per-resource bookkeeping shared between a pool and its guards

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::pool::PoolInner;
use crate::resource::PooledResource;

/// Identifier of a pooled resource, unique within its pool
pub type ResourceId = u64;

/// Lifecycle state of a pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Held by the pool and available for checkout
    Idle,

    /// Handed out to a caller
    CheckedOut,

    /// Released and discarded; terminal
    Disposed,
}

impl ResourceState {
    const IDLE: u8 = 0;
    const CHECKED_OUT: u8 = 1;
    const DISPOSED: u8 = 2;

    fn from_u8(raw: u8) -> Self {
        match raw {
            Self::IDLE => Self::Idle,
            Self::CHECKED_OUT => Self::CheckedOut,
            _ => Self::Disposed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => Self::IDLE,
            Self::CheckedOut => Self::CHECKED_OUT,
            Self::Disposed => Self::DISPOSED,
        }
    }
}

struct HandleInner<T: PooledResource> {
    id: ResourceId,
    pool_id: u64,
    overflow: bool,
    state: AtomicU8,
    last_used_at: Mutex<Option<Instant>>,
    pool: Weak<PoolInner<T>>,
}

/// Metadata attached to a single pooled resource.
///
/// Cloning a handle clones a reference to the same metadata. The owning pool
/// is held weakly and never changes.
pub struct PooledResourceHandle<T: PooledResource> {
    inner: Arc<HandleInner<T>>,
}

impl<T: PooledResource> Clone for PooledResourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PooledResource> fmt::Debug for PooledResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResourceHandle")
            .field("id", &self.inner.id)
            .field("pool_id", &self.inner.pool_id)
            .field("state", &self.state())
            .field("overflow", &self.inner.overflow)
            .finish()
    }
}

impl<T: PooledResource> PooledResourceHandle<T> {
    /// New handles start checked out: they are created for a caller.
    pub(crate) fn new(id: ResourceId, pool_id: u64, pool: Weak<PoolInner<T>>, overflow: bool) -> Self {
        Self::with_state(id, pool_id, pool, overflow, ResourceState::CheckedOut)
    }

    pub(crate) fn with_state(
        id: ResourceId,
        pool_id: u64,
        pool: Weak<PoolInner<T>>,
        overflow: bool,
        state: ResourceState,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                pool_id,
                overflow,
                state: AtomicU8::new(state.as_u8()),
                last_used_at: Mutex::new(None),
                pool,
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn state(&self) -> ResourceState {
        ResourceState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether this resource was built beyond the maximum size
    pub fn is_overflow(&self) -> bool {
        self.inner.overflow
    }

    /// When the resource last went idle; `None` until its first return
    pub fn last_used_at(&self) -> Option<Instant> {
        *self.inner.last_used_at.lock()
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.inner.pool_id
    }

    pub(crate) fn pool(&self) -> Option<Arc<PoolInner<T>>> {
        self.inner.pool.upgrade()
    }

    pub(crate) fn stamp(&self, at: Instant) {
        *self.inner.last_used_at.lock() = Some(at);
    }

    /// Atomically move from `from` to `to`; fails with the observed state.
    pub(crate) fn transition(&self, from: ResourceState, to: ResourceState) -> Result<(), ResourceState> {
        self.inner
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ResourceState::from_u8)
    }

    /// Mark the resource disposed. Returns true only for the first caller.
    pub(crate) fn dispose(&self) -> bool {
        self.inner
            .state
            .swap(ResourceState::DISPOSED, Ordering::AcqRel)
            != ResourceState::DISPOSED
    }
}
