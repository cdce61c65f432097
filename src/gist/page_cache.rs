use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, RwLock,
};

use log::debug;

use crate::{
    concurrent_status::Permission,
    gist::{page::GistPage, page_id::GistPageId},
    transaction::Transaction,
    types::{ConcurrentHashMap, Pod, ResultPod, SmallResult},
    utils::HandyRwLock,
    Database,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// The shared buffer of in-memory page images.
///
/// A page is pinned for as long as a caller holds the `Pod` returned
/// by `get_page`; the cache itself never drops a page image while
/// someone may still reference it, since entries are `Arc`s.
pub struct PageCache {
    buffer: ConcurrentHashMap<GistPageId, Pod<GistPage>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            buffer: ConcurrentHashMap::new(),
        }
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }

    /// Retrieve the requested page with the associated permission.
    /// Blocks until the page lock is granted; the page is loaded from
    /// disk on a cache miss.
    pub fn get_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &GistPageId,
    ) -> ResultPod<GistPage> {
        Database::concurrent_status().request_lock(tx, &perm.to_lock(), pid)?;

        let result = self.buffer.get_or_insert(pid, |pid| self.load_page(pid));
        if result.is_err() {
            let _ = Database::concurrent_status().release_lock(tx, pid);
        }
        result
    }

    fn load_page(&self, pid: &GistPageId) -> ResultPod<GistPage> {
        // stage 1: find the index this page belongs to
        let catalog = Database::catalog();
        let index_rc = catalog.get_index(pid.index_id)?;
        let index = index_rc.rl();

        // stage 2: read the page content from disk
        let buf = index.read_page_from_disk(pid.block_no)?;

        // stage 3: page instantiation
        let page = GistPage::from_bytes(&buf);

        debug!("page loaded, pid: {:?}", pid);
        Ok(Arc::new(RwLock::new(page)))
    }

    /// Remove the specific page id from the cache, so the next access
    /// re-reads it from disk. Used for deleted pages and by bulk scans
    /// that should not flood the cache.
    pub fn discard_page(&self, pid: &GistPageId) {
        self.buffer.remove(pid);
    }

    pub fn discard_index_pages(&self, index_id: u32) {
        self.buffer
            .get_inner()
            .wl()
            .retain(|pid, _| pid.index_id != index_id);
    }

    /// Write the content of a specific page to disk, if dirty.
    pub fn flush_page(&self, pid: &GistPageId) -> SmallResult {
        let page_rc = match self.buffer.get(pid) {
            Some(page_rc) => page_rc,
            None => return Ok(()),
        };

        if !page_rc.rl().is_dirty() {
            return Ok(());
        }

        let catalog = Database::catalog();
        let index_rc = catalog.get_index(pid.index_id)?;
        let index = index_rc.rl();

        debug!("flushing page {:?}", pid);
        let mut page = page_rc.wl();
        index.write_page_to_disk(pid.block_no, &page.to_bytes())?;
        page.clear_dirty();
        Ok(())
    }

    /// Flush all dirty pages to disk.
    pub fn flush_all_pages(&self) -> SmallResult {
        for pid in self.buffer.keys() {
            self.flush_page(&pid)?;
        }
        Ok(())
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }
}
