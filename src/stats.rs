/// A point-in-time snapshot of pool bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances sitting in the idle set.
    pub idle: usize,
    /// Instances currently leased out.
    pub active: usize,
    /// Instances fabricated by the factory over the pool's lifetime.
    pub created: usize,
    /// Instances handed to the destruction hook over the pool's lifetime.
    pub destroyed: usize,
}
