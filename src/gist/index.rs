use core::fmt;
use std::{
    collections::hash_map::DefaultHasher,
    fs::{File, OpenOptions},
    hash::{Hash, Hasher},
    io::{Read, Seek, SeekFrom, Write},
    sync::{Mutex, RwLock},
    time::SystemTime,
};

use log::debug;

use crate::{
    concurrent_status::Permission,
    error::{ErrorKind, SmallError},
    gist::{
        fsm::FreeSpaceMap,
        page::GistPage,
        page_cache::PageCache,
        page_id::{
            block_number_is_valid, BlockNumber, GistPageId, GIST_ROOT_BLOCK,
        },
        tuple::HeapTupleId,
    },
    transaction::Transaction,
    types::SmallResult,
    utils::HandyRwLock,
    Database,
};

/// A GiST index relation: the on-disk page file plus the per-relation
/// free-space map. Block 0 always holds the root.
pub struct GistIndex {
    file_path: String,

    file: Mutex<File>,

    index_id: u32,

    /// Unlogged relations skip the write-ahead log; their pages get
    /// fake LSNs.
    unlogged: bool,

    fsm: RwLock<FreeSpaceMap>,
}

impl fmt::Display for GistIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<GistIndex, file: {}, id: {}>",
            self.file_path, self.index_id
        )
    }
}

/// Read-only copy of one page's vacuum-relevant state, used by the
/// integrity checker and the tree dump.
pub struct PageSnapshot {
    pub blkno: BlockNumber,
    pub is_new: bool,
    pub is_leaf: bool,
    pub is_deleted: bool,
    pub rightlink: BlockNumber,
    pub downlinks: Vec<BlockNumber>,
    pub tids: Vec<HeapTupleId>,
    pub first_key: Vec<u8>,
    pub tuples_count: usize,
}

impl GistIndex {
    pub fn new(file_path: &str, unlogged: bool) -> Self {
        File::create(file_path).expect("io error");

        let f = Mutex::new(
            OpenOptions::new()
                .write(true)
                .read(true)
                .open(file_path)
                .unwrap(),
        );

        let mut hasher = DefaultHasher::new();
        file_path.hash(&mut hasher);
        let unix_time = SystemTime::now();
        unix_time.hash(&mut hasher);
        let index_id = hasher.finish() as u32;

        let index = Self {
            file_path: file_path.to_string(),
            file: f,
            index_id,
            unlogged,
            fsm: RwLock::new(FreeSpaceMap::new()),
        };

        // The tree always has a root; a fresh index is a single empty
        // leaf.
        index
            .write_page_to_disk(GIST_ROOT_BLOCK, &GistPage::new_leaf().to_bytes())
            .expect("io error");

        index
    }

    pub fn get_id(&self) -> u32 {
        self.index_id
    }

    pub fn is_unlogged(&self) -> bool {
        self.unlogged
    }

    pub fn get_file_path(&self) -> &str {
        &self.file_path
    }

    pub fn pid(&self, blkno: BlockNumber) -> GistPageId {
        GistPageId::new(self.index_id, blkno)
    }

    pub fn pages_count(&self) -> usize {
        let len = self.file.lock().unwrap().metadata().unwrap().len();
        len as usize / PageCache::get_page_size()
    }

    pub fn read_page_from_disk(
        &self,
        blkno: BlockNumber,
    ) -> Result<Vec<u8>, SmallError> {
        let page_size = PageCache::get_page_size();
        let start_pos = blkno as usize * page_size;

        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(start_pos as u64)).or(Err(
            SmallError::new(ErrorKind::BufferRead, "seek failed"),
        ))?;

        let mut buf: Vec<u8> = vec![0; page_size];
        file.read_exact(&mut buf).or_else(|_| {
            Err(SmallError::new(
                ErrorKind::BufferRead,
                &format!("read of block {} failed", blkno),
            ))
        })?;
        Ok(buf)
    }

    pub fn write_page_to_disk(
        &self,
        blkno: BlockNumber,
        data: &[u8],
    ) -> SmallResult {
        let page_size = PageCache::get_page_size();
        assert_eq!(data.len(), page_size);

        let start_pos = blkno as usize * page_size;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(start_pos as u64)).or(Err(
            SmallError::new(ErrorKind::BufferWrite, "seek failed"),
        ))?;
        file.write_all(data).or_else(|_| {
            Err(SmallError::new(
                ErrorKind::BufferWrite,
                &format!("write of block {} failed", blkno),
            ))
        })?;
        file.flush()
            .or(Err(SmallError::new(ErrorKind::BufferWrite, "flush failed")))?;
        Ok(())
    }

    /// Write an uninitialized (all-zero) page, the state a freshly
    /// extended block has before anyone initializes it.
    pub fn write_empty_page_to_disk(&self, blkno: BlockNumber) -> SmallResult {
        self.write_page_to_disk(
            blkno,
            &vec![0; PageCache::get_page_size()],
        )
    }

    pub fn record_free_page(&self, blkno: BlockNumber) {
        self.fsm.wl().record_free_page(blkno);
    }

    pub fn is_free_page(&self, blkno: BlockNumber) -> bool {
        self.fsm.rl().is_free(blkno)
    }

    pub fn free_pages_count(&self) -> usize {
        self.fsm.rl().free_pages_count()
    }

    /// Capture the vacuum-relevant state of every page, through the
    /// page cache so unflushed mutations are visible.
    pub fn snapshot_pages(
        &self,
        tx: &Transaction,
    ) -> Result<Vec<PageSnapshot>, SmallError> {
        let npages = self.pages_count() as BlockNumber;
        let mut snapshots = Vec::with_capacity(npages as usize);

        for blkno in 0..npages {
            let pid = self.pid(blkno);
            let page_rc =
                Database::page_cache().get_page(tx, Permission::ReadOnly, &pid)?;

            // borrow of page_rc starts here
            {
                let page = page_rc.rl();
                let mut downlinks = Vec::new();
                let mut tids = Vec::new();
                for i in 1..=page.max_offset() {
                    let tuple = page.tuple_at(i);
                    if let Some(child) = tuple.downlink() {
                        downlinks.push(child);
                    }
                    if let Some(tid) = tuple.heap_tid() {
                        tids.push(tid);
                    }
                }
                let first_key = if page.max_offset() > 0 {
                    page.tuple_at(1).key().to_vec()
                } else {
                    Vec::new()
                };
                snapshots.push(PageSnapshot {
                    blkno,
                    is_new: page.is_new(),
                    is_leaf: page.is_leaf(),
                    is_deleted: page.is_deleted(),
                    rightlink: page.get_rightlink(),
                    downlinks,
                    tids,
                    first_key,
                    tuples_count: page.tuples_count(),
                });
            }
            // borrow of page_rc ends here

            Database::concurrent_status().release_lock(tx, &pid)?;
        }

        Ok(snapshots)
    }

    /// Pages a reader can reach from the root by following downlinks
    /// and right-links. Traversal never continues through a deleted
    /// page.
    fn reachable_set(snapshots: &[PageSnapshot]) -> Vec<bool> {
        let mut reachable = vec![false; snapshots.len()];
        let mut stack = vec![GIST_ROOT_BLOCK];

        while let Some(blkno) = stack.pop() {
            let index = blkno as usize;
            if index >= snapshots.len() || reachable[index] {
                continue;
            }
            reachable[index] = true;

            let snap = &snapshots[index];
            if snap.is_deleted {
                continue;
            }
            if block_number_is_valid(snap.rightlink) {
                stack.push(snap.rightlink);
            }
            if !snap.is_leaf {
                for &child in &snap.downlinks {
                    stack.push(child);
                }
            }
        }

        reachable
    }

    /// Verify the structural invariants a vacuum must preserve. Panics
    /// on violation; test-facing.
    pub fn check_integrity(&self, tx: &Transaction) {
        let snapshots = self.snapshot_pages(tx).unwrap();
        assert!(!snapshots.is_empty(), "index has no root page");
        assert!(
            !snapshots[0].is_deleted,
            "the root page must never be deleted"
        );

        let reachable = Self::reachable_set(&snapshots);

        for (i, snap) in snapshots.iter().enumerate() {
            if reachable[i] {
                assert!(
                    !snap.is_deleted,
                    "deleted page {} is reachable from the root",
                    snap.blkno
                );
            }
            if snap.is_deleted || snap.is_new {
                continue;
            }
            if block_number_is_valid(snap.rightlink) {
                let right = snap.rightlink as usize;
                assert!(
                    right < snapshots.len(),
                    "page {} has a dangling rightlink {}",
                    snap.blkno,
                    snap.rightlink
                );
                assert!(
                    !snapshots[right].is_deleted,
                    "rightlink of live page {} points to deleted page {}",
                    snap.blkno,
                    snap.rightlink
                );
            }
            if !snap.is_leaf {
                for &child in &snap.downlinks {
                    let child_index = child as usize;
                    assert!(
                        child_index < snapshots.len(),
                        "page {} has a dangling downlink {}",
                        snap.blkno,
                        child
                    );
                    assert!(
                        !snapshots[child_index].is_deleted,
                        "downlink of page {} points to deleted page {}",
                        snap.blkno,
                        child
                    );
                }
            }
        }
    }

    /// All heap tuple ids a reader can find, across downlinks and
    /// right-links.
    pub fn collect_reachable_tids(
        &self,
        tx: &Transaction,
    ) -> Vec<HeapTupleId> {
        let snapshots = self.snapshot_pages(tx).unwrap();
        let reachable = Self::reachable_set(&snapshots);

        let mut tids = Vec::new();
        for (i, snap) in snapshots.iter().enumerate() {
            if reachable[i] && snap.is_leaf && !snap.is_deleted {
                tids.extend_from_slice(&snap.tids);
            }
        }
        tids
    }

    /// Log the physical structure of the tree, one line per page.
    pub fn draw_tree(&self, tx: &Transaction) {
        let snapshots = match self.snapshot_pages(tx) {
            Ok(s) => s,
            Err(e) => {
                debug!("draw_tree failed: {}", e);
                return;
            }
        };

        debug!("tree of {}:", self);
        for snap in &snapshots {
            debug!(
                "  block {}: {}{}{}{} rightlink: {}, tuples: {}, first key: {}",
                snap.blkno,
                if snap.is_new { "new " } else { "" },
                if snap.is_leaf { "leaf" } else { "inner" },
                if snap.is_deleted { " deleted" } else { "" },
                if snap.blkno == GIST_ROOT_BLOCK { " (root)" } else { "" },
                snap.rightlink,
                snap.tuples_count,
                hex::encode(&snap.first_key),
            );
        }
    }
}
