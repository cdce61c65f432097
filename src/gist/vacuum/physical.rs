use log::warn;

use crate::{
    concurrent_status::Permission,
    gist::{
        index::GistIndex,
        page::GistPage,
        page_id::{
            block_number_is_valid, BlockNumber, GIST_ROOT_BLOCK,
        },
        vacuum::{
            block_info::BlockInfoMap, rescan_queue::RescanQueue, sweep_leaf,
            DeletePredicate, VacuumInfo, VacuumStats,
        },
    },
    transaction::Transaction,
    types::{Pod, SmallResult},
    utils::HandyRwLock,
    Database,
};

/// First vacuum pass: walk the file in physical block order.
///
/// Leaf pages get their dead entries purged right away unless every
/// entry is dead. Inner pages contribute parent records for all their
/// downlinks. Pages that must disappear (fully dead, empty or never
/// initialized) are only scheduled here; unlinking them is the rescan
/// pass's job, so the page stays addressable until its siblings have
/// been rerouted.
impl GistIndex {
    pub(crate) fn physical_pass(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        predicate: &DeletePredicate,
        npages: BlockNumber,
        map: &mut BlockInfoMap,
        queue: &mut RescanQueue,
        stats: &mut VacuumStats,
    ) -> SmallResult {
        for blkno in GIST_ROOT_BLOCK..npages {
            let pid = self.pid(blkno);
            let page_rc =
                Database::page_cache().get_page(tx, Permission::ReadOnly, &pid)?;

            let result = self.physical_visit(
                tx, predicate, blkno, &page_rc, map, queue, stats,
            );
            self.release_page(tx, &pid, &page_rc, info.strategy)?;
            result?;

            self.vacuum_delay_point(info)?;
        }
        Ok(())
    }

    fn physical_visit(
        &self,
        tx: &Transaction,
        predicate: &DeletePredicate,
        blkno: BlockNumber,
        page_rc: &Pod<GistPage>,
        map: &mut BlockInfoMap,
        queue: &mut RescanQueue,
        stats: &mut VacuumStats,
    ) -> SmallResult {
        let (is_leaf, is_new, rightlink, follow_right, nsn);
        {
            let page = page_rc.rl();
            page.checkpage()?;

            // Pages reclaimed by an earlier vacuum stay out of the
            // bookkeeping entirely; rescheduling one would ask for a
            // parent that no longer has a downlink to it.
            if page.is_deleted() {
                return Ok(());
            }

            is_leaf = page.is_leaf();
            is_new = page.is_new() || page.is_empty();
            rightlink = page.get_rightlink();
            follow_right = page.is_follow_right();
            nsn = page.get_nsn();
        }

        if block_number_is_valid(rightlink) {
            map.record_left_link(rightlink, blkno);
        }

        let mut todelete: Vec<u16> = Vec::new();
        let maxoff;

        if is_leaf {
            self.upgrade_to_exclusive(tx, &self.pid(blkno))?;

            let page = page_rc.rl();
            maxoff = page.max_offset();
            let (offsets, dead, live) = sweep_leaf(&page, predicate);
            todelete = offsets;
            stats.tuples_removed += dead;
            stats.num_index_tuples += live;
        } else {
            let page = page_rc.rl();
            maxoff = page.max_offset();

            // A split that has not reached the parent yet leaves the
            // new sibling reachable only through this page's
            // rightlink; the rescan pass must look at it.
            if blkno != GIST_ROOT_BLOCK
                && block_number_is_valid(rightlink)
                && (follow_right || map.get_parent_lsn(blkno) < nsn)
            {
                queue.push_page(rightlink);
            }

            let page_lsn = page.get_lsn();
            for i in 1..=maxoff {
                let tuple = page.tuple_at(i);
                if let Some(child) = tuple.downlink() {
                    map.record_parent(child, blkno, page_lsn);

                    if tuple.is_invalid() {
                        warn!(
                            "{}: inner tuple at block {} offset {} is marked \
                             invalid, left by an incomplete split before an \
                             upgrade; please reindex",
                            self, blkno, i
                        );
                    }
                }
            }
        }

        let ntodelete = todelete.len() as u16;
        if ntodelete > 0 || is_new {
            if ntodelete == maxoff || is_new {
                // Every entry is gone (or the page never held any).
                // Keep the page in place for now and let the rescan
                // pass remove the downlink and reroute the siblings.
                queue.push_parent_of(blkno);
                map.mark_to_delete(blkno, false);
            } else {
                self.purge_page(tx, blkno, page_rc, &todelete, false)?;
            }
        }

        Ok(())
    }
}
