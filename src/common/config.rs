use std::time::Duration;

/// Default number of frames in the buffer pool
pub const BUFFER_POOL_SIZE: usize = 128;

/// K parameter of the LRU-K replacement policy
pub const LRUK_REPLACER_K: usize = 2;

/// How often the deadlock detector wakes up
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Fan-out of catalog-managed B+Tree index leaves
pub const BTREE_LEAF_MAX_SIZE: usize = 128;

/// Fan-out of catalog-managed B+Tree index internal nodes
pub const BTREE_INTERNAL_MAX_SIZE: usize = 128;
