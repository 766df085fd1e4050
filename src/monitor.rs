use crate::{Lease, PoolError};
use core::time::Duration;
use tracing::trace;

/// A resource that can tell whether it is still doing useful work.
pub trait Completion {
    /// Returns `false` once the resource has finished and can be returned.
    fn is_alive(&self) -> bool;
}

/// Outcome of a [`Monitor`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    /// Still watching.
    Pending,
    /// The resource reported completion and was handed back to its pool.
    Returned,
    /// The lease stopped being active before completion was observed, or the
    /// monitor was cancelled explicitly. The monitor will not fire again.
    Cancelled,
}

/// Watches a leased resource and returns it to its pool once it reports
/// completion.
///
/// The monitor is a cooperative periodic task: the host calls [`Self::tick`]
/// from its own update loop with the time elapsed since the previous call,
/// and the completion check runs once every `interval`. The task is tied to
/// the activation it was created for. If the instance is returned by other
/// means, the next tick cancels the task, so it can never fire against a
/// later reuse of the same instance.
///
/// ```
/// use rpool::{Completion, LocalResourcePool, Monitor, MonitorStatus, Recycler, Poolable, PoolConfig};
/// use std::time::Duration;
///
/// struct Burst { frames_left: u32 }
///
/// impl Poolable for Burst {
///     fn activate(&mut self) { self.frames_left = 2; }
/// }
///
/// impl Completion for Burst {
///     fn is_alive(&self) -> bool { self.frames_left > 0 }
/// }
///
/// let pool = LocalResourcePool::new(
///     PoolConfig::new(1, 4),
///     Recycler::new(|| Burst { frames_left: 0 }),
/// ).unwrap();
/// let mut monitor = Monitor::new(pool.acquire().unwrap(), Duration::from_millis(100));
///
/// loop {
///     monitor.lease().get_mut().unwrap().frames_left -= 1;
///     if monitor.tick(Duration::from_millis(100)).unwrap() != MonitorStatus::Pending {
///         break;
///     }
/// }
/// assert_eq!(monitor.status(), MonitorStatus::Returned);
/// assert_eq!(pool.len(), 1);
/// ```
#[derive(Debug)]
pub struct Monitor<L> {
    lease: L,
    interval: Duration,
    elapsed: Duration,
    status: MonitorStatus,
}

impl<L> Monitor<L>
where
    L: Lease,
    L::Target: Completion,
{
    /// Starts watching `lease`, checking completion every `interval`.
    pub fn new(lease: L, interval: Duration) -> Self {
        Self {
            lease,
            interval,
            elapsed: Duration::ZERO,
            status: MonitorStatus::Pending,
        }
    }

    /// Advances the task by `dt`.
    ///
    /// Errors from reading the resource or from its return channel are
    /// passed through; the monitor stays pending in that case.
    pub fn tick(&mut self, dt: Duration) -> Result<MonitorStatus, PoolError> {
        if self.status != MonitorStatus::Pending {
            return Ok(self.status);
        }
        if !self.lease.is_active() {
            trace!(id = %self.lease.id(), "lease no longer active, cancelling monitor");
            self.status = MonitorStatus::Cancelled;
            return Ok(self.status);
        }

        self.elapsed = self.elapsed.saturating_add(dt);
        if self.elapsed < self.interval {
            return Ok(MonitorStatus::Pending);
        }
        self.elapsed = Duration::ZERO;

        if self.lease.inspect(|resource| resource.is_alive())? {
            return Ok(MonitorStatus::Pending);
        }
        self.lease.request_return()?;
        trace!(id = %self.lease.id(), "resource completed, returned to pool");
        self.status = MonitorStatus::Returned;
        Ok(self.status)
    }

    /// Stops the task without returning the resource.
    pub fn cancel(&mut self) {
        if self.status == MonitorStatus::Pending {
            self.status = MonitorStatus::Cancelled;
        }
    }

    /// Latest status.
    pub fn status(&self) -> MonitorStatus {
        self.status
    }

    /// Polling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The watched lease.
    pub fn lease(&self) -> &L {
        &self.lease
    }

    /// Stops watching and gives the lease back to the caller.
    pub fn into_lease(self) -> L {
        self.lease
    }
}
