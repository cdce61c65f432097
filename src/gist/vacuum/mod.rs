//! VACUUM support for GiST indexes.
//!
//! `bulk_delete` removes every index entry whose heap tuple the caller
//! declares dead and reclaims the pages that become empty. It works in
//! two passes: a physical pass over the file in block order that
//! purges leaf entries and records parent and sibling relationships,
//! and a rescan pass that consumes the queued work, verifies scheduled
//! pages one more time under exclusive lock and unlinks them.
//!
//! When the bookkeeping map would not fit the maintenance memory
//! budget, `bulk_delete` falls back to a logical descent from the root
//! that only purges leaf entries and reclaims nothing.

pub mod block_info;
pub mod rescan_queue;

mod logical;
mod physical;
mod rescan;

use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use lazy_static::lazy_static;
use log::{debug, info};

use crate::{
    concurrent_status::{ConcurrentStatus, Lock, Permission},
    error::{ErrorKind, SmallError},
    gist::{
        index::GistIndex,
        page::GistPage,
        page_id::{BlockNumber, GistPageId, GIST_ROOT_BLOCK},
        tuple::HeapTupleId,
    },
    transaction::Transaction,
    tx_log::next_fake_lsn,
    types::{Pod, SmallResult},
    utils::HandyRwLock,
    Database,
};

use self::block_info::BlockInfoMap;
use self::rescan_queue::RescanQueue;

lazy_static! {
    /// Memory budget for vacuum bookkeeping, in kibibytes. Read once
    /// per process from the environment.
    static ref MAINTENANCE_WORK_MEM_KB: usize = env::var("MAINTENANCE_WORK_MEM_KB")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(16 * 1024);
}

pub fn maintenance_work_mem_kb() -> usize {
    *MAINTENANCE_WORK_MEM_KB
}

/// Decides liveness of one heap tuple. Must not mutate the index; it
/// is invoked once per leaf tuple per pass.
pub type DeletePredicate = dyn Fn(&HeapTupleId) -> bool;

/// Buffer access hint for vacuum scans. `Bulk` keeps a full-file scan
/// from flooding the page cache: pages released clean are dropped from
/// the cache immediately.
#[derive(Debug, Clone, Copy)]
pub enum AccessStrategy {
    Normal,
    Bulk,
}

pub struct VacuumInfo {
    pub strategy: AccessStrategy,

    /// Overrides the process-wide maintenance memory budget when set.
    pub memory_budget_kb: Option<usize>,

    pub analyze_only: bool,

    /// Heap-side tuple count, used by the cleanup pass when bulk
    /// delete never ran.
    pub num_heap_tuples: u64,

    pub estimated_count: bool,

    /// Checked at every yield point; setting it makes the vacuum
    /// return `Cancelled` after releasing all locks and pins.
    pub cancel: Arc<AtomicBool>,
}

impl VacuumInfo {
    pub fn new() -> Self {
        Self {
            strategy: AccessStrategy::Bulk,
            memory_budget_kb: None,
            analyze_only: false,
            num_heap_tuples: 0,
            estimated_count: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for VacuumInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated result of a vacuum, in the shape the caller's progress
/// display expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VacuumStats {
    /// Surviving leaf tuples seen by the scan. Only the physical pass
    /// and the logical fallback count tuples; the rescan pass does
    /// not, so totals reflect the first pass alone.
    pub num_index_tuples: u64,

    pub tuples_removed: u64,

    pub pages_deleted: u64,

    pub estimated_count: bool,

    /// Filled by the cleanup pass.
    pub num_pages: u64,
    pub pages_free: u64,
}

impl GistIndex {
    /// Remove every index entry whose heap tuple `predicate` declares
    /// dead, and reclaim pages that become (or already were) empty.
    ///
    /// `prior` carries stats accumulated by earlier stages of the same
    /// vacuum; tuple counts are reset, the rest accumulates.
    pub fn bulk_delete(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        prior: Option<VacuumStats>,
        predicate: &DeletePredicate,
    ) -> Result<VacuumStats, SmallError> {
        let mut stats = prior.unwrap_or_default();
        stats.estimated_count = false;
        stats.num_index_tuples = 0;

        let npages = self.pages_count();

        // The two-pass algorithm needs one map entry per page. If that
        // does not fit the maintenance memory budget, degrade to the
        // logical descent which deletes entries but reclaims no pages.
        let memory_needed = npages * BlockInfoMap::entry_size();
        let budget_kb = info
            .memory_budget_kb
            .unwrap_or_else(maintenance_work_mem_kb);
        if memory_needed > budget_kb * 1024 {
            info!(
                "{}: bookkeeping needs {} bytes, budget is {} KiB, \
                 falling back to logical descent",
                self, memory_needed, budget_kb
            );
            self.logical_bulk_delete(tx, info, predicate, &mut stats)?;
            return Ok(stats);
        }

        let mut map = BlockInfoMap::new(npages);
        let mut queue = RescanQueue::new();
        queue.push_page(GIST_ROOT_BLOCK);

        self.physical_pass(
            tx,
            info,
            predicate,
            npages as BlockNumber,
            &mut map,
            &mut queue,
            &mut stats,
        )?;
        self.rescan_pass(tx, info, predicate, &mut map, &mut queue, &mut stats)?;

        debug!("{}: bulk delete done, stats: {:?}", self, stats);
        Ok(stats)
    }

    /// Post-vacuum cleanup: find reclaimable pages and record them
    /// with the free-space map.
    pub fn vacuum_cleanup(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        stats: Option<VacuumStats>,
    ) -> Result<VacuumStats, SmallError> {
        // No-op in ANALYZE ONLY mode.
        if info.analyze_only {
            return Ok(stats.unwrap_or_default());
        }

        // Set up stats if bulk_delete wasn't called.
        let mut stats = stats.unwrap_or_else(|| {
            let mut s = VacuumStats::default();
            s.num_index_tuples = info.num_heap_tuples;
            s.estimated_count = info.estimated_count;
            s
        });

        let npages = self.pages_count() as BlockNumber;
        let mut tot_free_pages = 0;

        for blkno in (GIST_ROOT_BLOCK + 1)..npages {
            self.vacuum_delay_point(info)?;

            let pid = self.pid(blkno);
            let page_rc =
                Database::page_cache().get_page(tx, Permission::ReadOnly, &pid)?;

            let reclaimable = {
                let page = page_rc.rl();
                page.is_new() || page.is_deleted()
            };
            if reclaimable {
                tot_free_pages += 1;
                self.record_free_page(blkno);
            }

            self.release_page(tx, &pid, &page_rc, info.strategy)?;
        }

        stats.pages_free = tot_free_pages;
        stats.num_pages = self.pages_count() as u64;
        Ok(stats)
    }

    /// Cooperative yield point, called once per page with no locks
    /// held. The supervisor cancels a vacuum by flipping the flag.
    pub(crate) fn vacuum_delay_point(&self, info: &VacuumInfo) -> SmallResult {
        if info.cancel.load(Ordering::Relaxed) {
            return Err(SmallError::new(
                ErrorKind::Cancelled,
                "vacuum cancelled by caller",
            ));
        }
        Ok(())
    }

    /// Drop the page lock, and under the `Bulk` strategy also drop the
    /// cached image when it has no unflushed changes.
    pub(crate) fn release_page(
        &self,
        tx: &Transaction,
        pid: &GistPageId,
        page_rc: &Pod<GistPage>,
        strategy: AccessStrategy,
    ) -> SmallResult {
        Database::concurrent_status().release_lock(tx, pid)?;

        if let AccessStrategy::Bulk = strategy {
            if !page_rc.rl().is_dirty() {
                Database::page_cache().discard_page(pid);
            }
        }
        Ok(())
    }

    /// The buffer manager forbids upgrading a lock in place; drop the
    /// share lock and reacquire exclusive.
    pub(crate) fn upgrade_to_exclusive(
        &self,
        tx: &Transaction,
        pid: &GistPageId,
    ) -> SmallResult {
        Database::concurrent_status().release_lock(tx, pid)?;
        ConcurrentStatus::acquire_lock(tx, &Lock::XLock, pid)
    }

    /// Apply one page mutation inside a critical section: delete the
    /// given tuple offsets, run `mutate`, emit the WAL record and
    /// stamp the returned LSN. The caller must hold the exclusive lock
    /// on the page.
    ///
    /// The offsets in `todelete` are pre-adjusted: each one is stored
    /// as its 1-based position minus the number of offsets recorded
    /// before it, so deleting them in order hits the intended tuples.
    pub(crate) fn log_page_update<F>(
        &self,
        tx: &Transaction,
        blkno: BlockNumber,
        page_rc: &Pod<GistPage>,
        todelete: &[u16],
        mutate: F,
    ) -> SmallResult
    where
        F: FnOnce(&mut GistPage),
    {
        let mut page = page_rc.wl();

        let before = page.to_bytes();
        for &offset in todelete {
            page.delete_tuple(offset);
        }
        mutate(&mut page);
        page.mark_dirty();
        let after = page.to_bytes();

        let lsn = if self.is_unlogged() {
            next_fake_lsn()
        } else {
            Database::mut_log_manager().log_update(
                tx,
                self.get_id(),
                blkno,
                todelete,
                &before,
                &after,
            )?
        };
        page.set_lsn(lsn);

        Ok(())
    }

    /// Physically remove dead entries from a page.
    pub(crate) fn purge_page(
        &self,
        tx: &Transaction,
        blkno: BlockNumber,
        page_rc: &Pod<GistPage>,
        todelete: &[u16],
        convert_root_to_leaf: bool,
    ) -> SmallResult {
        self.log_page_update(tx, blkno, page_rc, todelete, |page| {
            page.set_tuples_deleted();
            if convert_root_to_leaf {
                page.reset_as_empty_leaf();
            }
        })
    }

    /// Stamp `prune_xid` and the deleted flag on an emptied page.
    pub(crate) fn mark_page_deleted(
        &self,
        tx: &Transaction,
        blkno: BlockNumber,
        page_rc: &Pod<GistPage>,
    ) -> SmallResult {
        self.log_page_update(tx, blkno, page_rc, &[], |page| {
            page.set_prune_xid(tx.get_id());
            page.set_deleted();
        })
    }

    /// Route the right-link chain around a page that is about to be
    /// marked deleted, so sibling traversal never enters it.
    pub(crate) fn splice_rightlink(
        &self,
        tx: &Transaction,
        left_blkno: BlockNumber,
        new_right: BlockNumber,
        strategy: AccessStrategy,
    ) -> SmallResult {
        let pid = self.pid(left_blkno);
        let page_rc =
            Database::page_cache().get_page(tx, Permission::ReadWrite, &pid)?;

        let result = self.log_page_update(tx, left_blkno, &page_rc, &[], |page| {
            page.set_rightlink(new_right);
        });

        self.release_page(tx, &pid, &page_rc, strategy)?;
        result
    }
}

/// Collect the offsets of dead tuples on a leaf page, each one
/// pre-adjusted for sequential deletion. Returns the offsets plus the
/// dead and surviving tuple counts.
pub(crate) fn sweep_leaf(
    page: &GistPage,
    predicate: &DeletePredicate,
) -> (Vec<u16>, u64, u64) {
    let mut todelete = Vec::new();
    let mut live = 0;

    let maxoff = page.max_offset();
    for i in 1..=maxoff {
        let tuple = page.tuple_at(i);
        if let Some(tid) = tuple.heap_tid() {
            if predicate(&tid) {
                todelete.push(i - todelete.len() as u16);
            } else {
                live += 1;
            }
        }
    }

    let dead = todelete.len() as u64;
    (todelete, dead, live)
}
