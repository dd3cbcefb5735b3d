//! Wrap-aware arithmetic on 16-bit RTP sequence numbers.

use std::cmp::Ordering;

/// `a` is newer than `b`, accounting for modulo-2^16 wraparound.
#[inline]
pub fn ahead_of(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

/// Forward distance from `a` to `b`, i.e. how many steps to advance `a` by
/// to reach `b`, modulo 2^16.
#[inline]
pub fn forward_diff(a: u16, b: u16) -> u16 {
    b.wrapping_sub(a)
}

/// Orders sequence numbers by age (oldest first), accounting for
/// wraparound. Used to key the reorder buffer's `missing` set in a
/// `BTreeSet`, so that `lower_bound`/`upper_bound`-style range trims (used
/// to age out stale entries and to drop entries made moot by `clear_to`)
/// walk from the oldest missing sequence number forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingSeq(pub u16);

impl PartialOrd for MissingSeq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MissingSeq {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0 == other.0 {
            Ordering::Equal
        } else if ahead_of(other.0, self.0) {
            // other is newer than self, so self (older) sorts first.
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ahead_of_basic() {
        assert!(ahead_of(5, 3));
        assert!(!ahead_of(3, 5));
        assert!(!ahead_of(3, 3));
    }

    #[test]
    fn ahead_of_wraps() {
        assert!(ahead_of(1, 65535));
        assert!(!ahead_of(65535, 1));
    }

    #[test]
    fn ahead_of_halfway_point_favors_neither() {
        // a - b == 0x8000 is defined as NOT ahead (the boundary case).
        assert!(!ahead_of(0x8000, 0));
    }

    #[test]
    fn forward_diff_basic() {
        assert_eq!(forward_diff(10, 15), 5);
        assert_eq!(forward_diff(65534, 1), 3);
    }

    #[test]
    fn missing_seq_orders_oldest_first() {
        let mut set = std::collections::BTreeSet::new();
        set.insert(MissingSeq(10));
        set.insert(MissingSeq(20));
        set.insert(MissingSeq(15));
        let ordered: Vec<u16> = set.iter().map(|d| d.0).collect();
        assert_eq!(ordered, vec![10, 15, 20]);
    }

    #[test]
    fn missing_seq_wraps_correctly() {
        let mut set = std::collections::BTreeSet::new();
        set.insert(MissingSeq(65530));
        set.insert(MissingSeq(2));
        // 2 is ahead_of 65530 (wraps forward), so 65530 is older and sorts first.
        let ordered: Vec<u16> = set.iter().map(|d| d.0).collect();
        assert_eq!(ordered, vec![65530, 2]);
    }
}
