//! # Ready Queue
//!
//! One FIFO per priority level plus a bitmap of non-empty levels.

use super::priority::PriorityMask;
use crate::list::List;
use crate::object::slab::Slab;
use crate::config::KernelConfig;
use crate::thread::Thread;
use crate::{KernelError, KernelResult, ThreadId};
use alloc::vec::Vec;

/// Priority-indexed ready queue
#[derive(Debug)]
pub(crate) struct ReadyQueue {
    levels: Vec<List<ThreadId>>,
    /// Flat bitmap, or the group word of the two-level bitmap
    group: u32,
    /// Per-group level bytes of the two-level bitmap
    table: [u8; 32],
    two_level: bool,
}

impl ReadyQueue {
    pub(crate) fn new(config: &KernelConfig) -> KernelResult<Self> {
        let count = config.priority_max as usize;
        let mut levels = Vec::new();
        levels
            .try_reserve_exact(count)
            .map_err(|_| KernelError::NoMemory)?;
        levels.resize_with(count, List::new);
        Ok(Self {
            levels,
            group: 0,
            table: [0; 32],
            two_level: config.two_level_bitmap(),
        })
    }

    /// Number of priority levels
    pub(crate) fn priority_max(&self) -> usize {
        self.levels.len()
    }

    /// Mask of `priority` in this queue's bitmap layout
    pub(crate) fn mask_for(&self, priority: u8) -> PriorityMask {
        PriorityMask::new(priority, self.two_level)
    }

    /// Append `id` to the tail of its level
    pub(crate) fn insert(&mut self, threads: &mut Slab<ThreadId, Thread>, id: ThreadId) {
        let thread = &threads[id];
        let (priority, mask) = (thread.current_priority, thread.mask);
        self.levels[priority as usize].push_back(threads, id);
        if self.two_level {
            self.table[mask.number as usize] |= mask.high_mask;
        }
        self.group |= mask.number_mask;
    }

    /// Unlink `id` from its level, clearing the level bit if it empties
    pub(crate) fn remove(&mut self, threads: &mut Slab<ThreadId, Thread>, id: ThreadId) {
        let thread = &threads[id];
        let (priority, mask) = (thread.current_priority, thread.mask);
        let level = &mut self.levels[priority as usize];
        level.remove(threads, id);
        if !level.is_empty() {
            return;
        }
        if self.two_level {
            let byte = &mut self.table[mask.number as usize];
            *byte &= !mask.high_mask;
            if *byte == 0 {
                self.group &= !mask.number_mask;
            }
        } else {
            self.group &= !mask.number_mask;
        }
    }

    /// Move `id` to the tail of its level if it has queue-mates
    pub(crate) fn rotate(&mut self, threads: &mut Slab<ThreadId, Thread>, id: ThreadId) -> bool {
        let level = &mut self.levels[threads[id].current_priority as usize];
        if level.len() < 2 {
            return false;
        }
        level.remove(threads, id);
        level.push_back(threads, id);
        true
    }

    /// Most urgent non-empty level, found with find-first-set
    pub(crate) fn highest_priority(&self) -> Option<u8> {
        if self.group == 0 {
            return None;
        }
        let number = self.group.trailing_zeros();
        let priority = if self.two_level {
            (number << 3) + self.table[number as usize].trailing_zeros()
        } else {
            number
        };
        Some(priority as u8)
    }

    /// Head of the most urgent non-empty level
    pub(crate) fn pick(&self) -> Option<ThreadId> {
        let priority = self.highest_priority()?;
        self.levels[priority as usize].front()
    }

    /// Number of threads queued at `priority`
    pub(crate) fn level_len(&self, priority: u8) -> usize {
        self.levels[priority as usize].len()
    }
}
