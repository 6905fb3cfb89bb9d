//! # EsoxSolutions.ResourcePool
//!
//! Thread-safe pool of expensive, reusable resources with explicit lifecycle
//! hooks and optional timed eviction of idle resources.
//!
//! ## Features
//!
//! - Resources built on demand by a factory, bounded by a maximum size
//! - Lifecycle hooks through the [`PooledResource`] trait, or closures via
//!   [`ResourceWrapper`] for types you do not own
//! - Automatic return of resources via RAII (Drop trait)
//! - Explicit returns that reject double and foreign-pool returns
//! - Overflow policies: allow, fail fast, or block with a timeout
//! - Async checkout with timeout and cancellation
//! - Background eviction of idle resources ([`TimedObjectPool`])
//! - Health monitoring, metrics and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resourcepool::{ObjectPool, ResourceWrapper};
//!
//! let factory = ResourceWrapper::factory(
//!     || Vec::<u8>::with_capacity(4096),
//!     |buf: &mut Vec<u8>| {
//!         buf.clear();
//!         Ok(())
//!     },
//!     |_buf: &mut Vec<u8>| Ok(()),
//! );
//! let pool = ObjectPool::new(8, factory).unwrap();
//! {
//!     let mut buf = pool.checkout().unwrap();
//!     buf.extend_from_slice(b"hello");
//!     // Resource automatically returned when `buf` goes out of scope
//! }
//! assert_eq!(pool.idle_count(), 1);
//! ```

mod config;
mod errors;
mod eviction;
mod handle;
mod health;
mod metrics;
mod pool;
mod resource;
mod timed;

pub use config::{DEFAULT_MAXIMUM_SIZE, OverflowPolicy, PoolConfiguration};
pub use errors::{HookError, InvalidReturnReason, PoolError, PoolResult, ReturnError};
pub use handle::{PooledResourceHandle, ResourceId, ResourceState};
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{ObjectPool, PooledObject};
pub use resource::{PooledResource, ResourceWrapper};
pub use timed::TimedObjectPool;
