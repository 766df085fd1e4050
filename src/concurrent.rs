use crate::{
    Lease, Lifecycle, PoolConfig, PoolError, PoolStats, ResourceId, ResourceManager,
    ResourceState,
};
use crossbeam_queue::ArrayQueue;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use tracing::{debug, trace, warn};

type Return<T> = Arc<dyn Fn(&Arc<Slot<T>>, u64) -> Result<(), PoolError> + Send + Sync>;

struct Slot<T> {
    id: ResourceId,
    lifecycle: Mutex<Lifecycle>,
    value: Mutex<Option<T>>,
    channel: Option<Return<T>>,
}

struct Shared<M: ResourceManager<T>, T> {
    manager: M,
    config: PoolConfig,
    // Bounded by max_size, so a failed push is what tells us to destroy.
    idle: ArrayQueue<Arc<Slot<T>>>,
    channel: Return<T>,
    disposed: AtomicBool,
    next_id: AtomicU64,
    active: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl<M: ResourceManager<T>, T> Shared<M, T> {
    fn fabricate(&self) -> Arc<Slot<T>> {
        let value = self.manager.create();
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.created.fetch_add(1, Ordering::Relaxed);
        trace!(%id, "fabricated resource");
        Arc::new(Slot {
            id,
            lifecycle: Mutex::new(Lifecycle::idle()),
            value: Mutex::new(Some(value)),
            channel: Some(Arc::clone(&self.channel)),
        })
    }

    fn release(&self, slot: &Arc<Slot<T>>, epoch: u64) -> Result<(), PoolError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        if !slot.lifecycle.lock().is_held_by(epoch) {
            return Err(PoolError::NotActive { id: slot.id });
        }
        // Never wait on the value lock: the caller may be holding it through
        // this very lease.
        let Some(mut value) = slot.value.try_lock() else {
            return Err(PoolError::Busy { id: slot.id });
        };
        if !slot.lifecycle.lock().begin_release(epoch) {
            return Err(PoolError::NotActive { id: slot.id });
        }

        if let Some(value) = value.as_mut() {
            self.manager.deactivate(value);
        }
        drop(value);
        self.active.fetch_sub(1, Ordering::Relaxed);

        // Nobody else can reach the slot until it is pushed, so it is safe to
        // mark it idle first.
        slot.lifecycle.lock().settle(ResourceState::Idle);
        match self.idle.push(Arc::clone(slot)) {
            Ok(()) => {
                trace!(id = %slot.id, idle = self.idle.len(), "retained resource");
                // A dispose that ran while we were deactivating has already
                // drained the queue; do not leave this one behind.
                if self.disposed.load(Ordering::Acquire) {
                    self.drain();
                }
            }
            Err(slot) => {
                trace!(id = %slot.id, max_size = self.config.max_size, "idle set full");
                self.destroy(&slot);
            }
        }
        Ok(())
    }

    fn destroy(&self, slot: &Slot<T>) {
        slot.lifecycle.lock().settle(ResourceState::Destroyed);
        let value = slot.value.lock().take();
        if let Some(value) = value {
            self.manager.destroy(value);
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            trace!(id = %slot.id, "destroyed resource");
        }
    }

    fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(slot) = self.idle.pop() {
            self.destroy(&slot);
            count += 1;
        }
        count
    }

    fn dispose(&self) -> Result<usize, PoolError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(PoolError::Disposed);
        }
        let count = self.drain();
        debug!(destroyed = count, "disposed pool");
        Ok(count)
    }
}

impl<M: ResourceManager<T>, T> Drop for Shared<M, T> {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            let _ = self.dispose();
        }
    }
}

/// A struct representing a resource pool that can be shared between threads.
///
/// Idle instances live in a bounded lock-free queue whose capacity is the
/// configured `max_size`; they are reused oldest first. Each instance carries
/// its own lock, so leases on different instances never contend.
pub struct ResourcePool<M: ResourceManager<T>, T> {
    shared: Arc<Shared<M, T>>,
}

impl<M, T> ResourcePool<M, T>
where
    M: ResourceManager<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Creates a new ResourcePool with a given configuration and manager.
    ///
    /// This method immediately fills the pool with `initial_size` new objects
    /// created by the manager. The idle queue cannot be empty-sized, so
    /// `max_size` must be at least 1.
    pub fn new(config: PoolConfig, manager: M) -> Result<Self, PoolError> {
        config.validate()?;
        if config.max_size == 0 {
            return Err(PoolError::InvalidConfig(
                "max_size must be greater than 0 for a concurrent pool".into(),
            ));
        }
        Ok(Self::from_parts(config, manager))
    }

    /// Creates a pool with the default configuration.
    pub fn with_manager(manager: M) -> Self {
        Self::from_parts(PoolConfig::default(), manager)
    }

    fn from_parts(config: PoolConfig, manager: M) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<M, T>>| {
            let pool = weak.clone();
            let channel: Return<T> =
                Arc::new(move |slot: &Arc<Slot<T>>, epoch: u64| match pool.upgrade() {
                    Some(shared) => shared.release(slot, epoch),
                    None => Err(PoolError::Disposed),
                });
            Shared {
                manager,
                config,
                idle: ArrayQueue::new(config.max_size),
                channel,
                disposed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                active: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            }
        });
        for _ in 0..config.initial_size {
            let slot = shared.fabricate();
            if let Err(slot) = shared.idle.push(slot) {
                shared.destroy(&slot);
            }
        }
        debug!(
            initial_size = config.initial_size,
            max_size = config.max_size,
            "created pool"
        );
        ResourcePool { shared }
    }
}

impl<M: ResourceManager<T>, T> ResourcePool<M, T> {
    /// Gets an object from the pool.
    ///
    /// If the pool is empty, a new object is created using the manager. The
    /// activation hook has run by the time the lease is returned.
    pub fn acquire(&self) -> Result<Pooled<T>, PoolError> {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        let slot = match shared.idle.pop() {
            Some(slot) => slot,
            None => shared.fabricate(),
        };

        let epoch = slot.lifecycle.lock().lend();
        shared.active.fetch_add(1, Ordering::Relaxed);
        trace!(id = %slot.id, epoch, "lent resource");

        if let Some(value) = slot.value.lock().as_mut() {
            shared.manager.activate(value);
        }
        Ok(Pooled { slot, epoch })
    }

    /// Destroys every idle object and shuts the pool down.
    ///
    /// Returns the number of objects handed to the destruction hook. Any
    /// further acquisition or return fails with [`PoolError::Disposed`].
    pub fn dispose(&self) -> Result<usize, PoolError> {
        self.shared.dispose()
    }

    /// Gets the number of objects currently in the pool.
    ///
    /// Returns the length of the idle set, indicating the number of objects
    /// that are ready to be recycled from the pool.
    pub fn len(&self) -> usize {
        self.shared.idle.len()
    }

    /// Checks if the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.idle.is_empty()
    }

    /// Gets the capacity of the pool.
    ///
    /// Returns the maximum number of objects that the pool can hold. This does
    /// not indicate the maximum number of objects that can be leased,
    /// but maximum objects that can be stored and recycled from the pool.
    pub fn cap(&self) -> usize {
        self.shared.idle.capacity()
    }

    /// Number of objects currently leased out.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Whether [`Self::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// The configuration the pool was created with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Takes a snapshot of the pool's counters. Under concurrent use the
    /// fields are read one after another and may not add up exactly.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.len(),
            active: self.active(),
            created: self.shared.created.load(Ordering::Relaxed),
            destroyed: self.shared.destroyed.load(Ordering::Relaxed),
        }
    }
}

impl<M: ResourceManager<T>, T> fmt::Debug for ResourcePool<M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A lease over an object borrowed from a [`ResourcePool`].
///
/// The object goes back to the pool when [`Self::request_return`] is called
/// or, failing that, when the lease is dropped.
pub struct Pooled<T> {
    slot: Arc<Slot<T>>,
    epoch: u64,
}

impl<T> Pooled<T> {
    /// Wraps an object that does not belong to any pool.
    ///
    /// The lease is active, but it has no return channel: returning it does
    /// nothing.
    pub fn detached(value: T) -> Self {
        let mut lifecycle = Lifecycle::idle();
        let epoch = lifecycle.lend();
        Self {
            slot: Arc::new(Slot {
                id: ResourceId::DETACHED,
                lifecycle: Mutex::new(lifecycle),
                value: Mutex::new(Some(value)),
                channel: None,
            }),
            epoch,
        }
    }

    /// Identity of the leased object.
    pub fn id(&self) -> ResourceId {
        self.slot.id
    }

    /// Current state of the underlying slot, which may already belong to a
    /// newer lease.
    pub fn state(&self) -> ResourceState {
        self.slot.lifecycle.lock().state()
    }

    /// Whether this lease still owns the object.
    pub fn is_active(&self) -> bool {
        self.slot.lifecycle.lock().is_held_by(self.epoch)
    }

    /// Locks the object for use.
    pub fn lock(&self) -> Result<MappedMutexGuard<'_, T>, PoolError> {
        if !self.is_active() {
            return Err(self.not_active());
        }
        MutexGuard::try_map(self.slot.value.lock(), |value| value.as_mut())
            .map_err(|_| self.not_active())
    }

    /// Hands the object back to its pool.
    ///
    /// A second call for the same lease fails with [`PoolError::NotActive`];
    /// while the object is still borrowed through this lease it fails with
    /// [`PoolError::Busy`] and the lease stays active. On a detached lease
    /// this is a no-op.
    pub fn request_return(&self) -> Result<(), PoolError> {
        match &self.slot.channel {
            Some(channel) => channel(&self.slot, self.epoch),
            None => Ok(()),
        }
    }

    fn not_active(&self) -> PoolError {
        PoolError::NotActive { id: self.slot.id }
    }
}

impl<T> Lease for Pooled<T> {
    type Target = T;

    fn id(&self) -> ResourceId {
        Pooled::id(self)
    }

    fn is_active(&self) -> bool {
        Pooled::is_active(self)
    }

    fn request_return(&self) -> Result<(), PoolError> {
        Pooled::request_return(self)
    }

    fn inspect<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, PoolError> {
        self.lock().map(|value| f(&*value))
    }
}

/// Implementation of the Drop trait for Pooled.
///
/// This ensures that the object is returned to the pool when the lease is
/// dropped, unless it was returned already.
impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if self.slot.channel.is_none() || !self.is_active() {
            return;
        }
        match self.request_return() {
            Ok(()) => {}
            // Expected for leases that outlive their pool.
            Err(PoolError::Disposed) => {
                trace!(id = %self.slot.id, "pool gone, dropping leased resource");
            }
            Err(error) => {
                warn!(id = %self.slot.id, %error, "failed to return resource on drop");
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Pooled");
        debug.field("id", &self.slot.id).field("state", &self.state());
        match self.slot.value.try_lock() {
            Some(value) if self.is_active() => debug.field("value", &*value),
            _ => debug.field("value", &format_args!("<unavailable>")),
        };
        debug.finish()
    }
}
