//! Connection id allocation.

use pktnet_client::UNASSIGNED_ID;
use pktnet_shared::error::{NetError, NetResult};

/// Wrapping counter over the whole `i16` range.
///
/// Skips [`UNASSIGNED_ID`] and any id the caller reports as taken, so ids
/// stay unique among live connections after the counter wraps.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: i16,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(next: i16) -> Self {
        Self { next }
    }

    /// Next free id. Fails only when all 65535 usable ids are taken.
    pub fn allocate(&mut self, in_use: impl Fn(i16) -> bool) -> NetResult<i16> {
        for _ in 0..=u16::MAX {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if candidate != UNASSIGNED_ID && !in_use(candidate) {
                return Ok(candidate);
            }
        }
        Err(NetError::IdSpaceExhausted)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ids_count_up_from_zero() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate(|_| false).unwrap(), 0);
        assert_eq!(ids.allocate(|_| false).unwrap(), 1);
    }

    #[test]
    fn wrap_skips_live_ids_and_unassigned() {
        let live: HashSet<i16> = [i16::MIN, i16::MIN + 1, 0].into_iter().collect();
        let mut ids = IdAllocator::starting_at(i16::MAX);

        assert_eq!(ids.allocate(|id| live.contains(&id)).unwrap(), i16::MAX);
        assert_eq!(ids.allocate(|id| live.contains(&id)).unwrap(), i16::MIN + 2);

        let mut ids = IdAllocator::starting_at(-2);
        assert_eq!(ids.allocate(|_| false).unwrap(), -2);
        assert_eq!(ids.allocate(|_| false).unwrap(), 0, "-1 is never handed out");
    }

    #[test]
    fn distinct_across_a_full_cycle() {
        let mut ids = IdAllocator::starting_at(i16::MAX - 10);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = ids.allocate(|id| seen.contains(&id)).unwrap();
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut ids = IdAllocator::new();
        assert!(matches!(ids.allocate(|_| true), Err(NetError::IdSpaceExhausted)));
    }
}
