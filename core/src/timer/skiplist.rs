//! # Timer Skip List
//!
//! Armed timers ordered by deadline.
//!
//! Row 0 links every armed timer. Each row above links a subset of the row
//! below it: a newly armed timer climbs one more row only while the low bits
//! of a running counter are zero, so on average one timer in `MASK + 1`
//! reaches the next row. Insertion walks the top row first and drops down,
//! which bounds the scan without any allocation.

use super::Timer;
use crate::clock::tick_reached;
use crate::config::{TIMER_SKIP_LIST_LEVEL, TIMER_SKIP_LIST_MASK};
use crate::list::{Link, Links, List};
use crate::object::slab::Slab;
use crate::TimerId;

/// One row of the skip list viewed as an intrusive list
struct Row<'a> {
    timers: &'a mut Slab<TimerId, Timer>,
    level: usize,
}

impl Links<TimerId> for Row<'_> {
    fn link(&self, id: TimerId) -> &Link<TimerId> {
        &self.timers[id].rows[self.level]
    }

    fn link_mut(&mut self, id: TimerId) -> &mut Link<TimerId> {
        &mut self.timers[id].rows[self.level]
    }
}

/// Deadline-ordered set of armed timers
#[derive(Debug)]
pub(crate) struct TimerList {
    rows: [List<TimerId>; TIMER_SKIP_LIST_LEVEL],
    random_nr: u32,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        Self {
            rows: core::array::from_fn(|_| List::new()),
            random_nr: 0,
        }
    }

    /// Link `id` by its `timeout_tick`, after any timer with the same deadline
    pub(crate) fn insert(&mut self, timers: &mut Slab<TimerId, Timer>, id: TimerId) {
        let timeout = timers[id].timeout_tick;

        // insertion point on every row; `None` means the row head
        let mut pos: [Option<TimerId>; TIMER_SKIP_LIST_LEVEL] = [None; TIMER_SKIP_LIST_LEVEL];
        let mut cursor: Option<TimerId> = None;
        for level in (0..TIMER_SKIP_LIST_LEVEL).rev() {
            let row = Row {
                timers: &mut *timers,
                level,
            };
            let list = &self.rows[level];
            let mut next = match cursor {
                Some(at) => list.next(&row, at),
                None => list.front(),
            };
            while let Some(candidate) = next {
                let deadline = row.timers[candidate].timeout_tick;
                if !tick_reached(timeout, deadline) {
                    break;
                }
                cursor = Some(candidate);
                next = list.next(&row, candidate);
            }
            pos[level] = cursor;
        }

        self.link_row(timers, 0, pos[0], id);

        self.random_nr = self.random_nr.wrapping_add(1);
        let mut tst = self.random_nr;
        for level in 1..TIMER_SKIP_LIST_LEVEL {
            if tst & TIMER_SKIP_LIST_MASK != 0 {
                break;
            }
            self.link_row(timers, level, pos[level], id);
            tst >>= (TIMER_SKIP_LIST_MASK + 1) >> 1;
        }
    }

    fn link_row(
        &mut self,
        timers: &mut Slab<TimerId, Timer>,
        level: usize,
        after: Option<TimerId>,
        id: TimerId,
    ) {
        let mut row = Row { timers, level };
        match after {
            Some(anchor) => self.rows[level].insert_after(&mut row, anchor, id),
            None => self.rows[level].push_front(&mut row, id),
        }
    }

    /// Unlink `id` from every row it is on
    pub(crate) fn remove(&mut self, timers: &mut Slab<TimerId, Timer>, id: TimerId) {
        for level in 0..TIMER_SKIP_LIST_LEVEL {
            if timers[id].rows[level].is_linked() {
                let mut row = Row {
                    timers: &mut *timers,
                    level,
                };
                self.rows[level].remove(&mut row, id);
            }
        }
    }

    /// Timer with the earliest deadline
    pub(crate) fn first(&self) -> Option<TimerId> {
        self.rows[0].front()
    }

    /// Number of armed timers
    pub(crate) fn len(&self) -> usize {
        self.rows[0].len()
    }

    /// Number of timers on `level`
    #[cfg(test)]
    fn row_len(&self, level: usize) -> usize {
        self.rows[level].len()
    }

    /// Ids on `level`, earliest first
    #[cfg(test)]
    fn row_ids(&self, timers: &mut Slab<TimerId, Timer>, level: usize) -> alloc::vec::Vec<TimerId> {
        let row = Row { timers, level };
        self.rows[level].iter(&row).collect()
    }
}
