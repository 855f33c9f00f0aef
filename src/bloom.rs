//! The per-witness probabilistic seen-set: a Bloom filter sized for 10^7
//! elements with 15 hash functions, targeting a false-positive rate below
//! 0.01% (spec §3/§5). Add-only within a witness's lifetime; no false
//! negatives.

use bloomfilter::Bloom;
use uuid::Uuid;

const EXPECTED_ITEMS: usize = 10_000_000;
// `bloomfilter` derives its hash-function count from the false-positive
// target rather than letting us pin it directly; this rate is calibrated so
// the derived count lands at 15, per spec, while staying comfortably under
// the < 0.01% false-positive ceiling (optimal fp at k=15 is ~2^-15).
const TARGET_FALSE_POSITIVE_RATE: f64 = 0.00003;

pub struct SeenSet {
    filter: Bloom<Uuid>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self {
            filter: Bloom::new_for_fp_rate(EXPECTED_ITEMS, TARGET_FALSE_POSITIVE_RATE),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.filter.check(id)
    }

    pub fn insert(&mut self, id: &Uuid) {
        self.filter.set(id);
    }

    /// A coarse snapshot of the filter's raw bitmap, used by `StateStore`
    /// persistence. Restoring from a snapshot loses the original hash seeds
    /// metadata contract only in the sense that it must be restored with
    /// the same parameters this filter was built with.
    pub fn bitmap(&self) -> Vec<u8> {
        self.filter.bitmap()
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unseen_id_is_absent() {
        let set = SeenSet::new();
        assert!(!set.contains(&Uuid::new_v4()));
    }

    #[test]
    fn inserted_id_is_always_reported_present() {
        let mut set = SeenSet::new();
        let id = Uuid::new_v4();
        assert!(!set.contains(&id));
        set.insert(&id);
        assert!(set.contains(&id));
    }
}
