#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub crashed: usize,
    pub restarting: usize,
    pub reserved: usize,
    pub batch_workers: usize,
    pub queue_len: usize,
    pub completed: u64,
    pub failed: u64,
}
