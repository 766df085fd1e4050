use crate::{
    Lease, Lifecycle, PoolConfig, PoolError, PoolStats, ResourceId, ResourceManager,
    ResourceState,
};
use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
};
use tracing::{debug, trace, warn};

/// Release routine installed on every slot. Captures only a weak reference to
/// the pool, so slots never keep their pool alive.
type LocalReturn<T> = Rc<dyn Fn(&Rc<LocalSlot<T>>, u64) -> Result<(), PoolError>>;

struct LocalSlot<T> {
    id: ResourceId,
    lifecycle: Cell<Lifecycle>,
    // None once the value was handed to the destruction hook.
    value: RefCell<Option<T>>,
    channel: Option<LocalReturn<T>>,
}

impl<T> LocalSlot<T> {
    fn update(&self, f: impl FnOnce(&mut Lifecycle)) {
        let mut lifecycle = self.lifecycle.get();
        f(&mut lifecycle);
        self.lifecycle.set(lifecycle);
    }
}

struct LocalShared<M: ResourceManager<T>, T> {
    manager: M,
    config: PoolConfig,
    idle: RefCell<VecDeque<Rc<LocalSlot<T>>>>,
    channel: LocalReturn<T>,
    disposed: Cell<bool>,
    next_id: Cell<u64>,
    active: Cell<usize>,
    created: Cell<usize>,
    destroyed: Cell<usize>,
}

impl<M: ResourceManager<T>, T> LocalShared<M, T> {
    fn fabricate(&self) -> Rc<LocalSlot<T>> {
        let value = self.manager.create();
        let id = ResourceId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.created.set(self.created.get() + 1);
        trace!(%id, "fabricated resource");
        Rc::new(LocalSlot {
            id,
            lifecycle: Cell::new(Lifecycle::idle()),
            value: RefCell::new(Some(value)),
            channel: Some(Rc::clone(&self.channel)),
        })
    }

    fn release(&self, slot: &Rc<LocalSlot<T>>, epoch: u64) -> Result<(), PoolError> {
        if self.disposed.get() {
            return Err(PoolError::Disposed);
        }
        let mut lifecycle = slot.lifecycle.get();
        if !lifecycle.is_held_by(epoch) {
            return Err(PoolError::NotActive { id: slot.id });
        }
        // The lifecycle is only touched once the value is ours, so a refused
        // return leaves the lease active.
        let Ok(mut value) = slot.value.try_borrow_mut() else {
            return Err(PoolError::Busy { id: slot.id });
        };
        let released = lifecycle.begin_release(epoch);
        debug_assert!(released);
        slot.lifecycle.set(lifecycle);

        if let Some(value) = value.as_mut() {
            self.manager.deactivate(value);
        }
        drop(value);
        self.active.set(self.active.get() - 1);

        let mut idle = self.idle.borrow_mut();
        if idle.len() < self.config.max_size {
            slot.update(|lifecycle| lifecycle.settle(ResourceState::Idle));
            idle.push_back(Rc::clone(slot));
            trace!(id = %slot.id, idle = idle.len(), "retained resource");
            return Ok(());
        }
        drop(idle);

        trace!(id = %slot.id, max_size = self.config.max_size, "idle set full");
        self.destroy(slot);
        Ok(())
    }

    fn destroy(&self, slot: &LocalSlot<T>) {
        slot.update(|lifecycle| lifecycle.settle(ResourceState::Destroyed));
        let value = slot.value.borrow_mut().take();
        if let Some(value) = value {
            self.manager.destroy(value);
            self.destroyed.set(self.destroyed.get() + 1);
            trace!(id = %slot.id, "destroyed resource");
        }
    }

    fn dispose(&self) -> Result<usize, PoolError> {
        if self.disposed.replace(true) {
            return Err(PoolError::Disposed);
        }
        let drained: Vec<_> = self.idle.borrow_mut().drain(..).collect();
        for slot in &drained {
            self.destroy(slot);
        }
        debug!(destroyed = drained.len(), "disposed local pool");
        Ok(drained.len())
    }
}

impl<M: ResourceManager<T>, T> Drop for LocalShared<M, T> {
    fn drop(&mut self) {
        if !self.disposed.get() {
            let _ = self.dispose();
        }
    }
}

/// A resource pool for the local thread, it cannot be moved between threads.
///
/// Idle instances are kept in a queue and reused oldest first. The pool never
/// refuses an acquisition: when the queue is empty it fabricates a new
/// instance. `max_size` only bounds how many returned instances are kept.
pub struct LocalResourcePool<M: ResourceManager<T>, T> {
    shared: Rc<LocalShared<M, T>>,
}

impl<M: ResourceManager<T> + 'static, T: 'static> LocalResourcePool<M, T> {
    /// Creates a new LocalResourcePool with a given configuration and manager.
    ///
    /// This method immediately fills the pool with `initial_size` new objects
    /// created by the manager.
    pub fn new(config: PoolConfig, manager: M) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self::from_parts(config, manager))
    }

    /// Creates a pool with the default configuration.
    pub fn with_manager(manager: M) -> Self {
        Self::from_parts(PoolConfig::default(), manager)
    }

    fn from_parts(config: PoolConfig, manager: M) -> Self {
        let shared = Rc::new_cyclic(|weak: &Weak<LocalShared<M, T>>| {
            let pool = weak.clone();
            let channel: LocalReturn<T> =
                Rc::new(move |slot: &Rc<LocalSlot<T>>, epoch: u64| match pool.upgrade() {
                    Some(shared) => shared.release(slot, epoch),
                    None => Err(PoolError::Disposed),
                });
            LocalShared {
                manager,
                config,
                idle: RefCell::new(VecDeque::with_capacity(config.initial_size)),
                channel,
                disposed: Cell::new(false),
                next_id: Cell::new(1),
                active: Cell::new(0),
                created: Cell::new(0),
                destroyed: Cell::new(0),
            }
        });
        for _ in 0..config.initial_size {
            let slot = shared.fabricate();
            shared.idle.borrow_mut().push_back(slot);
        }
        debug!(
            initial_size = config.initial_size,
            max_size = config.max_size,
            "created local pool"
        );
        LocalResourcePool { shared }
    }
}

impl<M: ResourceManager<T>, T> LocalResourcePool<M, T> {
    /// Gets an object from the pool.
    ///
    /// If the pool is empty, a new object is created using the manager. The
    /// activation hook has run by the time the lease is returned.
    pub fn acquire(&self) -> Result<LocalPooled<T>, PoolError> {
        let shared = &self.shared;
        if shared.disposed.get() {
            return Err(PoolError::Disposed);
        }
        let reused = shared.idle.borrow_mut().pop_front();
        let slot = match reused {
            Some(slot) => slot,
            None => shared.fabricate(),
        };

        let mut lifecycle = slot.lifecycle.get();
        let epoch = lifecycle.lend();
        slot.lifecycle.set(lifecycle);
        shared.active.set(shared.active.get() + 1);
        trace!(id = %slot.id, epoch, "lent resource");

        if let Some(value) = slot.value.borrow_mut().as_mut() {
            shared.manager.activate(value);
        }
        Ok(LocalPooled { slot, epoch })
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
        self.shared.idle.borrow().len()
    }

    /// Checks if the pool is empty.
    ///
    /// Returns `true` if there are no objects currently in the pool that are
    /// ready to be recycled.
    pub fn is_empty(&self) -> bool {
        self.shared.idle.borrow().is_empty()
    }

    /// Gets the capacity of the pool.
    ///
    /// Returns the maximum number of objects that the pool can hold. This does
    /// not indicate the maximum number of objects that can be leased,
    /// but maximum objects that can be stored and recycled from the pool.
    pub fn cap(&self) -> usize {
        self.shared.config.max_size
    }

    /// Number of objects currently leased out.
    pub fn active(&self) -> usize {
        self.shared.active.get()
    }

    /// Whether [`Self::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.get()
    }

    /// The configuration the pool was created with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Takes a snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.len(),
            active: self.shared.active.get(),
            created: self.shared.created.get(),
            destroyed: self.shared.destroyed.get(),
        }
    }
}

impl<M: ResourceManager<T>, T> fmt::Debug for LocalResourcePool<M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalResourcePool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .field("disposed", &self.shared.disposed.get())
            .finish()
    }
}

/// A lease over an object borrowed from a [`LocalResourcePool`].
///
/// The object goes back to the pool when [`Self::request_return`] is called
/// or, failing that, when the lease is dropped.
pub struct LocalPooled<T> {
    slot: Rc<LocalSlot<T>>,
    epoch: u64,
}

impl<T> LocalPooled<T> {
    /// Wraps an object that does not belong to any pool.
    ///
    /// The lease is active, but it has no return channel: returning it does
    /// nothing.
    pub fn detached(value: T) -> Self {
        let mut lifecycle = Lifecycle::idle();
        let epoch = lifecycle.lend();
        Self {
            slot: Rc::new(LocalSlot {
                id: ResourceId::DETACHED,
                lifecycle: Cell::new(lifecycle),
                value: RefCell::new(Some(value)),
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
        self.slot.lifecycle.get().state()
    }

    /// Whether this lease still owns the object.
    pub fn is_active(&self) -> bool {
        self.slot.lifecycle.get().is_held_by(self.epoch)
    }

    /// Borrows the object.
    pub fn get(&self) -> Result<Ref<'_, T>, PoolError> {
        if !self.is_active() {
            return Err(self.not_active());
        }
        Ref::filter_map(self.slot.value.borrow(), |value| value.as_ref())
            .map_err(|_| self.not_active())
    }

    /// Mutably borrows the object.
    pub fn get_mut(&self) -> Result<RefMut<'_, T>, PoolError> {
        if !self.is_active() {
            return Err(self.not_active());
        }
        RefMut::filter_map(self.slot.value.borrow_mut(), |value| value.as_mut())
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

impl<T> Lease for LocalPooled<T> {
    type Target = T;

    fn id(&self) -> ResourceId {
        LocalPooled::id(self)
    }

    fn is_active(&self) -> bool {
        LocalPooled::is_active(self)
    }

    fn request_return(&self) -> Result<(), PoolError> {
        LocalPooled::request_return(self)
    }

    fn inspect<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, PoolError> {
        self.get().map(|value| f(&*value))
    }
}

/// Implementation of the Drop trait for LocalPooled.
///
/// This ensures that the object is returned to the pool when the lease is
/// dropped, unless it was returned already.
impl<T> Drop for LocalPooled<T> {
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

impl<T: fmt::Debug> fmt::Debug for LocalPooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("LocalPooled");
        debug.field("id", &self.slot.id).field("state", &self.state());
        match self.slot.value.try_borrow() {
            Ok(value) if self.is_active() => debug.field("value", &*value),
            _ => debug.field("value", &format_args!("<unavailable>")),
        };
        debug.finish()
    }
}
