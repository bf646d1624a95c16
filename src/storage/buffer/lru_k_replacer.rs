use std::collections::{HashMap, VecDeque};

use crate::common::types::FrameId;

/// Per-frame access metadata tracked by the replacer.
///
/// The history holds the timestamps of the K most recent accesses, oldest
/// first. With fewer than K accesses the backward K-distance is treated as
/// infinite and the front of the history is the frame's first access.
struct LruKNode {
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: u64, k: usize) {
        if self.history.len() == k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp);
    }

    /// Oldest of the retained accesses. For a frame with full history this
    /// is the K-th most recent access; for the rest it is the first access.
    fn earliest(&self) -> u64 {
        self.history.front().copied().unwrap_or(0)
    }
}

/// LRU-K replacement policy (Shasha & O'Neil).
///
/// The victim is the evictable frame with the largest backward K-distance.
/// Frames with fewer than K recorded accesses all have distance `+inf` and
/// win over every fully-tracked frame; ties among them fall back to classic
/// LRU on the first access.
pub struct LruKReplacer {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            node_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
            k,
        }
    }

    /// Record an access to the given frame at the current logical time
    pub fn record_access(&mut self, frame_id: FrameId) {
        let node = self.node_store.entry(frame_id).or_insert_with(LruKNode::new);
        node.record_access(self.current_timestamp, self.k);
        self.current_timestamp += 1;
    }

    /// Mark whether a frame participates in eviction
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            node.is_evictable = evictable;
        }
    }

    /// Forget a frame entirely. Callers must only remove evictable frames.
    pub fn remove(&mut self, frame_id: FrameId) {
        self.node_store.remove(&frame_id);
    }

    /// Select and remove the eviction victim, if any frame is evictable
    pub fn evict(&mut self) -> Option<FrameId> {
        let victim = self
            .candidate(|node| node.history.len() < self.k)
            .or_else(|| self.candidate(|node| node.history.len() >= self.k));

        if let Some(frame_id) = victim {
            self.node_store.remove(&frame_id);
        }
        victim
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.node_store.values().filter(|n| n.is_evictable).count()
    }

    /// Among evictable frames matching the filter, the one with the oldest
    /// retained access.
    fn candidate(&self, filter: impl Fn(&LruKNode) -> bool) -> Option<FrameId> {
        self.node_store
            .iter()
            .filter(|(_, node)| node.is_evictable && filter(node))
            .min_by_key(|(frame_id, node)| (node.earliest(), **frame_id))
            .map(|(frame_id, _)| *frame_id)
    }
}
