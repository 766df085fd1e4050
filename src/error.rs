use crate::ResourceId;

/// Errors reported by the pools and their leases.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool was disposed (or dropped) and no longer accepts operations.
    #[error("pool has been disposed")]
    Disposed,

    /// The lease no longer owns an active instance, either because it was
    /// already returned or because the instance has since been destroyed.
    #[error("resource {id} is not active for this lease")]
    NotActive {
        /// Identity of the instance the stale lease pointed at.
        id: ResourceId,
    },

    /// The instance is still borrowed through its lease, so it cannot be
    /// returned yet. The lease stays active.
    #[error("resource {id} is still borrowed")]
    Busy {
        /// Identity of the borrowed instance.
        id: ResourceId,
    },

    /// The pool configuration cannot be satisfied.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
