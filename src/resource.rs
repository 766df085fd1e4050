use crate::PoolError;
use core::fmt;

/// The lifecycle capability of a pooled resource.
///
/// Both hooks default to doing nothing. Implement them on the resource itself
/// and hand the pool a [`Recycler`] to have it call them at every transition.
pub trait Poolable {
    /// Called after the instance is lent out and before any client code sees
    /// it. Must leave the instance ready for use.
    fn activate(&mut self) {}

    /// Called when the instance is returned, before the pool retains or
    /// destroys it. Must clear any client-visible state from the prior use.
    fn deactivate(&mut self) {}
}

/// A trait defining the callbacks a resource pool drives.
///
/// This trait provides methods for fabricating new objects and for running
/// the activation, deactivation and destruction hooks on them.
pub trait ResourceManager<T> {
    /// Creates a new, fully constructed object of type T. It is not activated
    /// yet.
    fn create(&self) -> T;

    /// Prepares an object for a client.
    ///
    /// By default, this method does nothing.
    #[inline(always)]
    fn activate(&self, _obj: &mut T) {}

    /// Clears an object that a client handed back.
    ///
    /// By default, this method does nothing.
    #[inline(always)]
    fn deactivate(&self, _obj: &mut T) {}

    /// Disposes of an object the pool is not going to keep, either because the
    /// idle set is full or because the pool is being disposed.
    ///
    /// By default, the object is dropped.
    #[inline(always)]
    fn destroy(&self, obj: T) {
        drop(obj);
    }
}

/// A [`ResourceManager`] that fabricates objects with a closure and delegates
/// activation and deactivation to the object's [`Poolable`] implementation.
pub struct Recycler<F> {
    factory: F,
}

impl<F> Recycler<F> {
    /// Wraps a factory closure.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F> fmt::Debug for Recycler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recycler")
            .field("factory", &core::any::type_name::<F>())
            .finish()
    }
}

impl<T: Poolable, F: Fn() -> T> ResourceManager<T> for Recycler<F> {
    #[inline(always)]
    fn create(&self) -> T {
        (self.factory)()
    }

    #[inline(always)]
    fn activate(&self, obj: &mut T) {
        obj.activate();
    }

    #[inline(always)]
    fn deactivate(&self, obj: &mut T) {
        obj.deactivate();
    }
}

type Hook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// A [`ResourceManager`] assembled from closures.
///
/// Only the factory is mandatory; hooks that are not set behave like the
/// trait defaults.
///
/// ```
/// use rpool::{Callbacks, PoolConfig, ResourcePool};
///
/// let manager = Callbacks::new(Vec::<u8>::new).on_deactivate(|buf| buf.clear());
/// let pool = ResourcePool::new(PoolConfig::new(2, 4), manager).unwrap();
/// let lease = pool.acquire().unwrap();
/// lease.lock().unwrap().push(1);
/// lease.request_return().unwrap();
/// assert_eq!(pool.len(), 2);
/// ```
pub struct Callbacks<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    on_activate: Option<Hook<T>>,
    on_deactivate: Option<Hook<T>>,
    on_destroy: Option<Box<dyn Fn(T) + Send + Sync>>,
}

impl<T> Callbacks<T> {
    /// Creates a manager around a factory closure.
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            on_activate: None,
            on_deactivate: None,
            on_destroy: None,
        }
    }

    /// Sets the hook run every time an object is lent out.
    #[must_use]
    pub fn on_activate(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_activate = Some(Box::new(hook));
        self
    }

    /// Sets the hook run every time an object is returned.
    #[must_use]
    pub fn on_deactivate(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_deactivate = Some(Box::new(hook));
        self
    }

    /// Sets the hook that receives objects the pool discards.
    #[must_use]
    pub fn on_destroy(mut self, hook: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Box::new(hook));
        self
    }
}

impl<T> fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("item_type", &core::any::type_name::<T>())
            .field("on_activate", &self.on_activate.is_some())
            .field("on_deactivate", &self.on_deactivate.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish()
    }
}

impl<T> ResourceManager<T> for Callbacks<T> {
    fn create(&self) -> T {
        (self.factory)()
    }

    fn activate(&self, obj: &mut T) {
        if let Some(hook) = &self.on_activate {
            hook(obj);
        }
    }

    fn deactivate(&self, obj: &mut T) {
        if let Some(hook) = &self.on_deactivate {
            hook(obj);
        }
    }

    fn destroy(&self, obj: T) {
        match &self.on_destroy {
            Some(hook) => hook(obj),
            None => drop(obj),
        }
    }
}

/// Identity of a pooled instance, unique within the pool that fabricated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    /// The identity carried by leases that were not produced by a pool.
    pub const DETACHED: ResourceId = ResourceId(0);

    /// Returns the raw identity value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical state of a pooled instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Owned by the pool and waiting in the idle set.
    Idle,
    /// Lent out to a client.
    Active,
    /// Returned by its client; the deactivation hook is running.
    Releasing,
    /// Handed to the destruction hook. Terminal.
    Destroyed,
}

/// A borrowed instance, as seen by code that does not care which pool flavour
/// produced it.
pub trait Lease {
    /// The pooled type.
    type Target;

    /// Identity of the leased instance.
    fn id(&self) -> ResourceId;

    /// Whether this lease still owns the instance it was handed.
    fn is_active(&self) -> bool;

    /// Fires the instance's return channel, handing it back to its pool.
    fn request_return(&self) -> Result<(), PoolError>;

    /// Runs `f` against the leased instance.
    fn inspect<R>(&self, f: impl FnOnce(&Self::Target) -> R) -> Result<R, PoolError>;
}

/// State plus activation epoch of one pool slot.
///
/// The epoch increases every time the slot is lent out, so a lease can tell
/// whether the activation it was created for is still the current one.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lifecycle {
    state: ResourceState,
    epoch: u64,
}

impl Lifecycle {
    pub(crate) fn idle() -> Self {
        Self {
            state: ResourceState::Idle,
            epoch: 0,
        }
    }

    pub(crate) fn state(&self) -> ResourceState {
        self.state
    }

    pub(crate) fn is_held_by(&self, epoch: u64) -> bool {
        self.state == ResourceState::Active && self.epoch == epoch
    }

    /// Marks the slot active and returns the epoch of the new activation.
    pub(crate) fn lend(&mut self) -> u64 {
        debug_assert_eq!(self.state, ResourceState::Idle);
        self.state = ResourceState::Active;
        self.epoch += 1;
        self.epoch
    }

    /// Moves an active slot to `Releasing` if `epoch` is its current
    /// activation. Returns false for stale or repeated returns.
    pub(crate) fn begin_release(&mut self, epoch: u64) -> bool {
        if !self.is_held_by(epoch) {
            return false;
        }
        self.state = ResourceState::Releasing;
        true
    }

    pub(crate) fn settle(&mut self, state: ResourceState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_rejects_stale_epoch() {
        let mut lifecycle = Lifecycle::idle();
        let first = lifecycle.lend();
        assert!(lifecycle.begin_release(first));
        assert!(!lifecycle.begin_release(first));
        lifecycle.settle(ResourceState::Idle);

        let second = lifecycle.lend();
        assert_ne!(first, second);
        assert!(!lifecycle.begin_release(first));
        assert!(lifecycle.begin_release(second));
    }

    #[test]
    fn callbacks_default_to_noops() {
        let manager = Callbacks::new(|| 7u32);
        let mut value = manager.create();
        manager.activate(&mut value);
        manager.deactivate(&mut value);
        assert_eq!(value, 7);
        manager.destroy(value);
    }

    struct Counter(u32);

    impl Poolable for Counter {
        fn activate(&mut self) {
            self.0 += 1;
        }

        fn deactivate(&mut self) {
            self.0 += 10;
        }
    }

    #[test]
    fn recycler_delegates_to_poolable() {
        let manager = Recycler::new(|| Counter(0));
        let mut counter = manager.create();
        manager.activate(&mut counter);
        manager.deactivate(&mut counter);
        assert_eq!(counter.0, 11);
    }
}
