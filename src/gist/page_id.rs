use core::fmt;

/// Physical position of a page within its index file.
pub type BlockNumber = u32;

/// Sentinel for "no page".
pub const INVALID_BLOCK_NUMBER: BlockNumber = u32::MAX;

/// The root always lives in the first block of the file.
pub const GIST_ROOT_BLOCK: BlockNumber = 0;

pub fn block_number_is_valid(blkno: BlockNumber) -> bool {
    blkno != INVALID_BLOCK_NUMBER
}

/// Key of the shared page cache and the lock table. The cache is
/// shared by every index in the process, so the block number alone is
/// not enough to address a page.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GistPageId {
    pub index_id: u32,
    pub block_no: BlockNumber,
}

impl GistPageId {
    pub fn new(index_id: u32, block_no: BlockNumber) -> Self {
        Self { index_id, block_no }
    }
}

impl fmt::Display for GistPageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.index_id, self.block_no)
    }
}

impl fmt::Debug for GistPageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
