//! # Priority Bitmap Masks
//!
//! Priorities are plain `u8` levels, 0 being the most urgent. Up to 32
//! levels the ready bitmap is one `u32` with one bit per level. Above that
//! it is two-level: the upper 5 bits of the priority select a group bit and
//! the lower 3 bits select a bit in that group's byte.

/// Ready-bitmap membership of one priority level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityMask {
    /// Group index (`priority >> 3`); zero with a flat bitmap
    pub number: u8,
    /// Bit in the top-level word
    pub number_mask: u32,
    /// Bit in the group byte; zero with a flat bitmap
    pub high_mask: u8,
}

impl PriorityMask {
    /// Compute the mask of `priority`
    pub const fn new(priority: u8, two_level: bool) -> Self {
        if two_level {
            let number = priority >> 3;
            Self {
                number,
                number_mask: 1 << number,
                high_mask: 1 << (priority & 0x07),
            }
        } else {
            Self {
                number: 0,
                number_mask: 1 << priority,
                high_mask: 0,
            }
        }
    }
}

/// Is priority `a` strictly more urgent than `b`?
#[inline]
pub const fn more_urgent(a: u8, b: u8) -> bool {
    a < b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_mask() {
        let mask = PriorityMask::new(5, false);
        assert_eq!(mask.number_mask, 1 << 5);
        assert_eq!(mask.high_mask, 0);
    }

    #[test]
    fn test_two_level_mask() {
        let mask = PriorityMask::new(0x53, true);
        assert_eq!(mask.number, 0x0a);
        assert_eq!(mask.number_mask, 1 << 0x0a);
        assert_eq!(mask.high_mask, 1 << 3);

        let top = PriorityMask::new(255, true);
        assert_eq!(top.number, 31);
        assert_eq!(top.high_mask, 0x80);
    }

    #[test]
    fn test_urgency_order() {
        assert!(more_urgent(1, 3));
        assert!(!more_urgent(3, 3));
    }
}
