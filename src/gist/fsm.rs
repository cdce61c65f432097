use bit_vec::BitVec;

use crate::gist::page_id::BlockNumber;

/// Tracks which blocks of an index hold reclaimable pages. Populated
/// by the vacuum cleanup scan; consulted by page allocation.
pub struct FreeSpaceMap {
    free: BitVec<u32>,
}

impl FreeSpaceMap {
    pub fn new() -> Self {
        Self { free: BitVec::new() }
    }

    pub fn record_free_page(&mut self, blkno: BlockNumber) {
        let index = blkno as usize;
        if index >= self.free.len() {
            self.free.grow(index + 1 - self.free.len(), false);
        }
        self.free.set(index, true);
    }

    pub fn is_free(&self, blkno: BlockNumber) -> bool {
        self.free.get(blkno as usize).unwrap_or(false)
    }

    pub fn free_pages_count(&self) -> usize {
        self.free.iter().filter(|&b| b).count()
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut fsm = FreeSpaceMap::new();
        assert!(!fsm.is_free(3));

        fsm.record_free_page(3);
        fsm.record_free_page(17);
        fsm.record_free_page(3);

        assert!(fsm.is_free(3));
        assert!(fsm.is_free(17));
        assert!(!fsm.is_free(4));
        assert_eq!(fsm.free_pages_count(), 2);
    }
}
