use std::collections::HashMap;

use crate::{
    error::{ErrorKind, SmallError},
    gist::page_id::{BlockNumber, GIST_ROOT_BLOCK, INVALID_BLOCK_NUMBER},
    tx_log::{Lsn, INVALID_LSN},
};

/// Per-page bookkeeping of one bulk delete.
///
/// A page id moves through four states: no entry at all, discovered
/// (parent and/or left sibling recorded), scheduled for reclamation
/// (`to_delete` set, `processed` clear) and finalized (`to_delete` and
/// `processed` both set). There are no backward transitions.
#[derive(Clone, Copy)]
pub struct BlockInfo {
    parent: BlockNumber,

    /// LSN the parent page had when its downlink to this page was
    /// recorded. Compared against the page's NSN to detect splits the
    /// parent does not know about.
    parent_lsn: Lsn,

    /// The page whose rightlink points at this page.
    left_block: BlockNumber,

    to_delete: bool,
    processed: bool,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            parent: INVALID_BLOCK_NUMBER,
            parent_lsn: INVALID_LSN,
            left_block: INVALID_BLOCK_NUMBER,
            to_delete: false,
            processed: false,
        }
    }
}

pub struct BlockInfoMap {
    map: HashMap<BlockNumber, BlockInfo>,
}

impl BlockInfoMap {
    /// `npages` is a capacity hint; the map ends up holding one entry
    /// per discovered page.
    pub fn new(npages: usize) -> Self {
        Self {
            map: HashMap::with_capacity(npages),
        }
    }

    pub const fn entry_size() -> usize {
        std::mem::size_of::<BlockInfo>() + std::mem::size_of::<BlockNumber>()
    }

    pub fn record_parent(
        &mut self,
        child: BlockNumber,
        parent: BlockNumber,
        parent_lsn: Lsn,
    ) {
        let entry = self.map.entry(child).or_insert_with(BlockInfo::default);
        entry.parent = parent;
        entry.parent_lsn = parent_lsn;
    }

    /// The root resolves to itself: scheduling the "parent" of the
    /// root must land on the root branch of the rescan pass.
    pub fn get_parent(
        &self,
        child: BlockNumber,
    ) -> Result<BlockNumber, SmallError> {
        if let Some(entry) = self.map.get(&child) {
            if entry.parent != INVALID_BLOCK_NUMBER {
                return Ok(entry.parent);
            }
        }
        if child == GIST_ROOT_BLOCK {
            return Ok(GIST_ROOT_BLOCK);
        }
        Err(SmallError::new(
            ErrorKind::MissingParent,
            &format!("could not find parent of block {} in lookup table", child),
        ))
    }

    pub fn get_parent_lsn(&self, blkno: BlockNumber) -> Lsn {
        match self.map.get(&blkno) {
            Some(entry) => entry.parent_lsn,
            None => INVALID_LSN,
        }
    }

    pub fn record_left_link(&mut self, right: BlockNumber, left: BlockNumber) {
        let entry = self.map.entry(right).or_insert_with(BlockInfo::default);
        entry.left_block = left;
    }

    pub fn get_left_link(&self, right: BlockNumber) -> BlockNumber {
        match self.map.get(&right) {
            Some(entry) => entry.left_block,
            None => INVALID_BLOCK_NUMBER,
        }
    }

    pub fn mark_to_delete(&mut self, blkno: BlockNumber, processed: bool) {
        let entry = self.map.entry(blkno).or_insert_with(BlockInfo::default);
        entry.to_delete = true;
        entry.processed = processed;
    }

    pub fn get_to_delete(&self, blkno: BlockNumber) -> bool {
        match self.map.get(&blkno) {
            Some(entry) => entry.to_delete,
            None => false,
        }
    }

    pub fn is_processed(&self, blkno: BlockNumber) -> bool {
        match self.map.get(&blkno) {
            Some(entry) => entry.processed,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let map = BlockInfoMap::new(8);
        assert_eq!(map.get_left_link(5), INVALID_BLOCK_NUMBER);
        assert_eq!(map.get_parent_lsn(5), INVALID_LSN);
        assert!(!map.get_to_delete(5));
        assert!(!map.is_processed(5));
    }

    #[test]
    fn test_missing_parent_is_an_error() {
        let map = BlockInfoMap::new(8);
        let err = map.get_parent(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParent);
    }

    #[test]
    fn test_root_has_no_parent() {
        let map = BlockInfoMap::new(8);
        assert_eq!(map.get_parent(GIST_ROOT_BLOCK).unwrap(), GIST_ROOT_BLOCK);
    }

    #[test]
    fn test_any_insertion_order() {
        let mut map = BlockInfoMap::new(8);

        // left link learned before the parent, then both updated
        map.record_left_link(4, 3);
        map.record_parent(4, 1, 100);
        map.record_parent(4, 2, 200);

        assert_eq!(map.get_parent(4).unwrap(), 2);
        assert_eq!(map.get_parent_lsn(4), 200);
        assert_eq!(map.get_left_link(4), 3);
    }

    #[test]
    fn test_state_transitions() {
        let mut map = BlockInfoMap::new(8);

        map.mark_to_delete(7, false);
        assert!(map.get_to_delete(7));
        assert!(!map.is_processed(7));

        map.mark_to_delete(7, true);
        assert!(map.get_to_delete(7));
        assert!(map.is_processed(7));
    }
}
