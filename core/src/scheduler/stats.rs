//! # Scheduler Statistics
//!
//! Counters for scheduler activity.

use core::sync::atomic::{AtomicU32, Ordering};

/// Scheduler statistics
#[derive(Debug)]
pub struct SchedulerStats {
    /// Total context switches
    context_switches: AtomicU32,
    /// Total ticks
    ticks: AtomicU32,
    /// Total voluntary yields
    yields: AtomicU32,
    /// Switches away from a thread that was still ready
    preemptions: AtomicU32,
}

impl SchedulerStats {
    /// Create zeroed statistics
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU32::new(0),
            ticks: AtomicU32::new(0),
            yields: AtomicU32::new(0),
            preemptions: AtomicU32::new(0),
        }
    }

    /// Record a context switch
    pub fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a voluntary yield
    pub fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a preemption
    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total context switches
    pub fn context_switches(&self) -> u32 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Get total ticks
    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Get voluntary yields
    pub fn yields(&self) -> u32 {
        self.yields.load(Ordering::Relaxed)
    }

    /// Get preemptions
    pub fn preemptions(&self) -> u32 {
        self.preemptions.load(Ordering::Relaxed)
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.context_switches.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.yields.store(0, Ordering::Relaxed);
        self.preemptions.store(0, Ordering::Relaxed);
    }
}

impl Default for SchedulerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let stats = SchedulerStats::new();
        stats.record_context_switch();
        stats.record_context_switch();
        stats.record_yield();
        assert_eq!(stats.context_switches(), 2);
        assert_eq!(stats.yields(), 1);
        stats.reset();
        assert_eq!(stats.context_switches(), 0);
    }
}
