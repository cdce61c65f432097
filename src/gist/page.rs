use crate::{
    error::{ErrorKind, SmallError},
    gist::{
        page_cache::PageCache,
        page_id::{BlockNumber, INVALID_BLOCK_NUMBER},
        tuple::GistTuple,
    },
    io::{SmallReader, SmallWriter},
    tx_log::Lsn,
    types::SmallResult,
};

pub const GIST_PAGE_VERSION: u8 = 1;

const F_LEAF: u16 = 0x0001;
const F_DELETED: u16 = 0x0002;
const F_TUPLES_DELETED: u16 = 0x0004;
const F_FOLLOW_RIGHT: u16 = 0x0008;

const KNOWN_FLAGS: u16 = F_LEAF | F_DELETED | F_TUPLES_DELETED | F_FOLLOW_RIGHT;

pub fn empty_page_data() -> Vec<u8> {
    vec![0; PageCache::get_page_size()]
}

/// A fixed-size index page.
///
/// Tuples are addressed by 1-based offsets. `delete_tuple` shifts all
/// higher offsets down by one, which is why callers that delete a
/// batch store each offset pre-adjusted by the number of offsets
/// already recorded.
///
/// A block of all zeroes on disk decodes to a "new" page: a page that
/// was allocated but never initialized, carrying no content at all.
#[derive(Clone)]
pub struct GistPage {
    version: u8,
    flags: u16,
    rightlink: BlockNumber,

    /// Sequence number stamped by the last split of this page,
    /// compared against the parent's LSN to detect splits the parent
    /// does not know about yet.
    nsn: u64,

    lsn: Lsn,

    /// Transaction that emptied this page. Space becomes reusable only
    /// once this id is old enough for every snapshot.
    prune_xid: u64,

    tuples: Vec<GistTuple>,

    // in-memory state, never serialized
    new: bool,
    dirty: bool,
}

impl GistPage {
    pub fn new_leaf() -> Self {
        Self::new_with_flags(F_LEAF)
    }

    pub fn new_inner() -> Self {
        Self::new_with_flags(0)
    }

    fn new_with_flags(flags: u16) -> Self {
        Self {
            version: GIST_PAGE_VERSION,
            flags,
            rightlink: INVALID_BLOCK_NUMBER,
            nsn: 0,
            lsn: 0,
            prune_xid: 0,
            tuples: Vec::new(),
            new: false,
            dirty: false,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.iter().all(|&b| b == 0) {
            let mut page = Self::new_with_flags(0);
            page.version = 0;
            page.new = true;
            return page;
        }

        let mut reader = SmallReader::new(bytes);
        let version: u8 = reader.read();
        let flags: u16 = reader.read();
        let rightlink: u32 = reader.read();
        let nsn: u64 = reader.read();
        let lsn: u64 = reader.read();
        let prune_xid: u64 = reader.read();
        let count: u16 = reader.read();

        let mut tuples = Vec::with_capacity(count as usize);
        for _ in 0..count {
            tuples.push(reader.read::<GistTuple>());
        }

        Self {
            version,
            flags,
            rightlink,
            nsn,
            lsn,
            prune_xid,
            tuples,
            new: false,
            dirty: false,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if self.new {
            return empty_page_data();
        }

        let mut writer = SmallWriter::new();
        writer.write(&self.version);
        writer.write(&self.flags);
        writer.write(&self.rightlink);
        writer.write(&self.nsn);
        writer.write(&self.lsn);
        writer.write(&self.prune_xid);
        writer.write(&(self.tuples.len() as u16));
        for t in &self.tuples {
            writer.write(t);
        }
        writer.to_padded_bytes(PageCache::get_page_size())
    }

    /// Sanity check after a page is read from disk.
    pub fn checkpage(&self) -> SmallResult {
        if self.new {
            return Ok(());
        }
        if self.version != GIST_PAGE_VERSION {
            return Err(SmallError::new(
                ErrorKind::InvalidPage,
                &format!("unexpected page version: {}", self.version),
            ));
        }
        if self.flags & !KNOWN_FLAGS != 0 {
            return Err(SmallError::new(
                ErrorKind::InvalidPage,
                &format!("unknown page flags: {:#x}", self.flags),
            ));
        }
        Ok(())
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & F_LEAF != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & F_DELETED != 0
    }

    pub fn set_deleted(&mut self) {
        self.ensure_init();
        self.flags |= F_DELETED;
    }

    pub fn is_tuples_deleted(&self) -> bool {
        self.flags & F_TUPLES_DELETED != 0
    }

    pub fn set_tuples_deleted(&mut self) {
        self.ensure_init();
        self.flags |= F_TUPLES_DELETED;
    }

    pub fn is_follow_right(&self) -> bool {
        self.flags & F_FOLLOW_RIGHT != 0
    }

    pub fn set_follow_right(&mut self, value: bool) {
        self.ensure_init();
        if value {
            self.flags |= F_FOLLOW_RIGHT;
        } else {
            self.flags &= !F_FOLLOW_RIGHT;
        }
    }

    /// Turn an emptied root back into an empty leaf. The tree always
    /// keeps its root, so an index whose every tuple died degrades to
    /// the shape it had right after creation.
    pub fn reset_as_empty_leaf(&mut self) {
        debug_assert!(self.tuples.is_empty());
        self.ensure_init();
        self.flags |= F_LEAF;
        self.flags &= !F_FOLLOW_RIGHT;
    }

    pub fn get_rightlink(&self) -> BlockNumber {
        self.rightlink
    }

    pub fn set_rightlink(&mut self, rightlink: BlockNumber) {
        self.ensure_init();
        self.rightlink = rightlink;
    }

    pub fn get_nsn(&self) -> u64 {
        self.nsn
    }

    pub fn set_nsn(&mut self, nsn: u64) {
        self.ensure_init();
        self.nsn = nsn;
    }

    pub fn get_lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.ensure_init();
        self.lsn = lsn;
    }

    pub fn get_prune_xid(&self) -> u64 {
        self.prune_xid
    }

    pub fn set_prune_xid(&mut self, xid: u64) {
        self.ensure_init();
        self.prune_xid = xid;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn tuples_count(&self) -> usize {
        self.tuples.len()
    }

    /// The highest valid tuple offset; offsets are 1-based.
    pub fn max_offset(&self) -> u16 {
        self.tuples.len() as u16
    }

    pub fn tuple_at(&self, offset: u16) -> &GistTuple {
        assert!(offset >= 1 && offset <= self.max_offset());
        &self.tuples[(offset - 1) as usize]
    }

    pub fn append_tuple(&mut self, tuple: GistTuple) {
        self.ensure_init();
        self.tuples.push(tuple);
    }

    pub fn delete_tuple(&mut self, offset: u16) {
        assert!(offset >= 1 && offset <= self.max_offset());
        self.tuples.remove((offset - 1) as usize);
    }

    fn ensure_init(&mut self) {
        if self.new {
            self.new = false;
            self.version = GIST_PAGE_VERSION;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gist::tuple::HeapTupleId;

    fn leaf_with_tids(tids: &[(u32, u16)]) -> GistPage {
        let mut page = GistPage::new_leaf();
        for &(block, offset) in tids {
            let tid = HeapTupleId::new(block, offset);
            page.append_tuple(GistTuple::new_leaf(tid, &block.to_le_bytes()));
        }
        page
    }

    #[test]
    fn test_encode_decode() {
        let mut page = leaf_with_tids(&[(1, 1), (2, 1), (3, 2)]);
        page.set_rightlink(7);
        page.set_nsn(42);
        page.set_prune_xid(9);

        let decoded = GistPage::from_bytes(&page.to_bytes());
        assert!(decoded.is_leaf());
        assert!(!decoded.is_new());
        assert_eq!(decoded.get_rightlink(), 7);
        assert_eq!(decoded.get_nsn(), 42);
        assert_eq!(decoded.get_prune_xid(), 9);
        assert_eq!(decoded.max_offset(), 3);
        assert_eq!(
            decoded.tuple_at(2).heap_tid(),
            Some(HeapTupleId::new(2, 1))
        );
    }

    #[test]
    fn test_zeroed_block_decodes_to_new_page() {
        let page = GistPage::from_bytes(&empty_page_data());
        assert!(page.is_new());
        assert!(page.is_empty());
        assert!(!page.is_leaf());
        assert_eq!(page.get_rightlink(), INVALID_BLOCK_NUMBER);
        assert_eq!(page.to_bytes(), empty_page_data());
    }

    #[test]
    fn test_delete_tuple_shifts_offsets() {
        let mut page = leaf_with_tids(&[(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)]);

        // Offsets 2 and 4, each pre-adjusted by the number of
        // deletions performed before it.
        page.delete_tuple(2);
        page.delete_tuple(3);

        let left: Vec<u32> = (1..=page.max_offset())
            .map(|i| page.tuple_at(i).heap_tid().unwrap().block)
            .collect();
        assert_eq!(left, vec![1, 3, 5]);
    }

    #[test]
    fn test_checkpage_rejects_garbage() {
        let mut data = empty_page_data();
        data[0] = 99;
        let page = GistPage::from_bytes(&data);
        assert!(page.checkpage().is_err());
    }

    #[test]
    fn test_root_degradation() {
        let mut page = GistPage::new_inner();
        page.set_follow_right(true);
        page.reset_as_empty_leaf();
        assert!(page.is_leaf());
        assert!(!page.is_follow_right());
        assert!(!page.is_deleted());
    }
}
