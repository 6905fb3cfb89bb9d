//! The lifecycle contract of pool-managed resources

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::errors::HookError;

/// Lifecycle hooks a type implements to be managed by a pool.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{HookError, ObjectPool, PooledResource};
///
/// struct Buffer(Vec<u8>);
///
/// impl PooledResource for Buffer {
///     fn on_reset_state(&mut self) -> Result<(), HookError> {
///         self.0.clear();
///         Ok(())
///     }
///
///     fn on_release_resources(&mut self) -> Result<(), HookError> {
///         self.0 = Vec::new();
///         Ok(())
///     }
/// }
///
/// let pool = ObjectPool::new(4, || Buffer(Vec::with_capacity(1024))).unwrap();
/// let mut buffer = pool.checkout().unwrap();
/// buffer.0.extend_from_slice(b"payload");
/// ```
pub trait PooledResource: Send + 'static {
    /// Bring the resource back to a freshly-constructed state.
    ///
    /// Called on return, before the resource goes idle. An error destroys the
    /// resource instead of re-admitting it.
    fn on_reset_state(&mut self) -> Result<(), HookError>;

    /// Free whatever the resource holds. Called at most once, when the
    /// resource leaves the pool for good.
    fn on_release_resources(&mut self) -> Result<(), HookError>;

    /// Cheap liveness check; invalid resources are destroyed, not pooled.
    fn is_valid(&self) -> bool {
        true
    }
}

type ResetFn<T> = dyn Fn(&mut T) -> Result<(), HookError> + Send + Sync;
type ReleaseFn<T> = dyn Fn(&mut T) -> Result<(), HookError> + Send + Sync;
type ValidFn<T> = dyn Fn(&T) -> bool + Send + Sync;

/// Makes a foreign type pool-managed by delegating its hooks to closures.
///
/// The delegates are shared, so a single set of hooks can serve every
/// wrapper built by one factory (see [`ResourceWrapper::factory`]).
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{ObjectPool, ResourceWrapper};
///
/// let factory = ResourceWrapper::factory(
///     || String::with_capacity(64),
///     |s: &mut String| {
///         s.clear();
///         Ok(())
///     },
///     |_s: &mut String| Ok(()),
/// );
/// let pool = ObjectPool::new(2, factory).unwrap();
///
/// let mut text = pool.checkout().unwrap();
/// text.push_str("hello");
/// assert_eq!(text.as_str(), "hello");
/// ```
pub struct ResourceWrapper<T> {
    value: T,
    on_reset: Arc<ResetFn<T>>,
    on_release: Arc<ReleaseFn<T>>,
    is_valid: Option<Arc<ValidFn<T>>>,
}

impl<T> ResourceWrapper<T> {
    pub fn new<R, L>(value: T, on_reset: R, on_release: L) -> Self
    where
        R: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
        L: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self {
            value,
            on_reset: Arc::new(on_reset),
            on_release: Arc::new(on_release),
            is_valid: None,
        }
    }

    /// Delegate the validity check as well
    pub fn with_validity<V>(mut self, is_valid: V) -> Self
    where
        V: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.is_valid = Some(Arc::new(is_valid));
        self
    }

    /// Build a factory producing wrappers that share one set of hooks
    pub fn factory<F, R, L>(make: F, on_reset: R, on_release: L) -> impl Fn() -> Self + Send + Sync + 'static
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
        L: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
        T: 'static,
    {
        let on_reset: Arc<ResetFn<T>> = Arc::new(on_reset);
        let on_release: Arc<ReleaseFn<T>> = Arc::new(on_release);
        move || Self {
            value: make(),
            on_reset: Arc::clone(&on_reset),
            on_release: Arc::clone(&on_release),
            is_valid: None,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Unwrap the foreign value, dropping the delegates
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Send + 'static> PooledResource for ResourceWrapper<T> {
    fn on_reset_state(&mut self) -> Result<(), HookError> {
        (self.on_reset)(&mut self.value)
    }

    fn on_release_resources(&mut self) -> Result<(), HookError> {
        (self.on_release)(&mut self.value)
    }

    fn is_valid(&self) -> bool {
        self.is_valid.as_ref().is_none_or(|check| check(&self.value))
    }
}

impl<T> Deref for ResourceWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for ResourceWrapper<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ResourceWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceWrapper")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_wrapper_delegates_hooks() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);

        let mut wrapper = ResourceWrapper::new(
            vec![1, 2, 3],
            |v: &mut Vec<i32>| {
                v.clear();
                Ok(())
            },
            move |_v: &mut Vec<i32>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        wrapper.on_reset_state().unwrap();
        assert!(wrapper.is_empty());

        wrapper.on_release_resources().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(wrapper.is_valid());
    }

    #[test]
    fn test_wrapper_propagates_delegate_errors() {
        let mut wrapper = ResourceWrapper::new(0u32, |_v: &mut u32| Err("reset failed".into()), |_v: &mut u32| Ok(()));

        let err = wrapper.on_reset_state().unwrap_err();
        assert_eq!(err.to_string(), "reset failed");
    }

    #[test]
    fn test_wrapper_validity_delegate() {
        let wrapper = ResourceWrapper::new(5u32, |_v: &mut u32| Ok(()), |_v: &mut u32| Ok(()))
            .with_validity(|v| *v < 3);
        assert!(!wrapper.is_valid());
        assert_eq!(wrapper.into_inner(), 5);
    }

    #[test]
    fn test_factory_shares_hooks() {
        let factory = ResourceWrapper::factory(|| 1u8, |_v: &mut u8| Ok(()), |_v: &mut u8| Ok(()));
        let a = factory();
        let b = factory();
        assert!(Arc::ptr_eq(&a.on_reset, &b.on_reset));
        assert_eq!(*a.get() + *b.get(), 2);
    }
}
