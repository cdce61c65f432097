use log::{debug, warn};

use crate::{
    concurrent_status::Permission,
    gist::{
        index::GistIndex,
        page::GistPage,
        page_id::{
            block_number_is_valid, BlockNumber, GIST_ROOT_BLOCK,
        },
        vacuum::{
            block_info::BlockInfoMap,
            rescan_queue::{RescanItem, RescanQueue},
            sweep_leaf, DeletePredicate, VacuumInfo, VacuumStats,
        },
    },
    transaction::Transaction,
    types::{Pod, SmallResult},
    utils::HandyRwLock,
    Database,
};

/// Second vacuum pass: drain the rescan queue.
///
/// This is where pages actually disappear. For every inner page on the
/// queue, each downlink to a scheduled child is re-verified under an
/// exclusive lock on the child; only a child that is still fully dead
/// (or was never initialized) is unlinked. Unlinking always happens in
/// the same order: purge the child's entries, reroute the left
/// sibling's rightlink past the child, then stamp the child deleted.
/// A reader following right-links therefore never enters a deleted
/// page.
impl GistIndex {
    pub(crate) fn rescan_pass(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        predicate: &DeletePredicate,
        map: &mut BlockInfoMap,
        queue: &mut RescanQueue,
        stats: &mut VacuumStats,
    ) -> SmallResult {
        while let Some(item) = queue.pop() {
            let blkno = match item {
                RescanItem::Page(blkno) => blkno,
                RescanItem::ParentOf(blkno) => map.get_parent(blkno)?,
            };

            if map.is_processed(blkno) {
                continue;
            }

            let pid = self.pid(blkno);
            let page_rc =
                Database::page_cache().get_page(tx, Permission::ReadOnly, &pid)?;

            let result = self.rescan_visit(
                tx, info, predicate, blkno, &page_rc, map, queue, stats,
            );
            self.release_page(tx, &pid, &page_rc, info.strategy)?;
            result?;

            self.vacuum_delay_point(info)?;
        }
        Ok(())
    }

    fn rescan_visit(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        predicate: &DeletePredicate,
        blkno: BlockNumber,
        page_rc: &Pod<GistPage>,
        map: &mut BlockInfoMap,
        queue: &mut RescanQueue,
        stats: &mut VacuumStats,
    ) -> SmallResult {
        page_rc.rl().checkpage()?;

        if page_rc.rl().is_deleted() {
            return Ok(());
        }

        self.upgrade_to_exclusive(tx, &self.pid(blkno))?;

        let is_leaf = page_rc.rl().is_leaf();
        let maxoff = page_rc.rl().max_offset();
        let mut todelete: Vec<u16> = Vec::new();

        if is_leaf {
            // A leaf lands here through the right-link sweep. Its dead
            // entries have not been purged by the physical pass, or
            // new ones may have appeared since; sweep again. Tuple
            // stats were already taken by the first pass.
            let page = page_rc.rl();
            let (offsets, _, _) = sweep_leaf(&page, predicate);
            todelete = offsets;
        } else {
            {
                let page = page_rc.rl();
                let rightlink = page.get_rightlink();
                if blkno != GIST_ROOT_BLOCK
                    && block_number_is_valid(rightlink)
                    && (page.is_follow_right()
                        || map.get_parent_lsn(blkno) < page.get_nsn())
                {
                    queue.push_page(rightlink);
                }
            }

            let downlinks: Vec<(u16, BlockNumber)> = {
                let page = page_rc.rl();
                (1..=maxoff)
                    .filter_map(|i| {
                        page.tuple_at(i).downlink().map(|child| (i, child))
                    })
                    .collect()
            };

            for (offset, child) in downlinks {
                if !map.get_to_delete(child) {
                    continue;
                }

                let child_pid = self.pid(child);
                let child_rc = Database::page_cache().get_page(
                    tx,
                    Permission::ReadWrite,
                    &child_pid,
                )?;

                let child_result = self.reclaim_child(
                    tx,
                    info,
                    predicate,
                    offset,
                    child,
                    &child_rc,
                    map,
                    stats,
                    &mut todelete,
                );
                self.release_page(tx, &child_pid, &child_rc, info.strategy)?;
                child_result?;
            }
        }

        let is_new = {
            let page = page_rc.rl();
            page.is_new() || page.is_empty()
        };
        let ntodelete = todelete.len() as u16;

        if ntodelete > 0 || is_new {
            let all_gone = ntodelete == maxoff || is_new;
            let convert_root =
                all_gone && blkno == GIST_ROOT_BLOCK && !page_rc.rl().is_leaf();

            if ntodelete > 0 || convert_root {
                self.purge_page(tx, blkno, page_rc, &todelete, convert_root)?;
            }

            if all_gone && blkno != GIST_ROOT_BLOCK {
                // This page is empty now; hand it to its own parent.
                queue.push_parent_of(blkno);
                map.mark_to_delete(blkno, true);
            }
        }

        Ok(())
    }

    /// Re-verify a child scheduled for reclamation and, if it is still
    /// fully dead, unlink it. The caller holds the exclusive lock on
    /// the child and schedules the downlink removal we push into
    /// `todelete`.
    fn reclaim_child(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        predicate: &DeletePredicate,
        offset_in_parent: u16,
        child_blkno: BlockNumber,
        child_rc: &Pod<GistPage>,
        map: &mut BlockInfoMap,
        stats: &mut VacuumStats,
        todelete: &mut Vec<u16>,
    ) -> SmallResult {
        let (child_is_leaf, child_is_new);
        {
            let child = child_rc.rl();
            child_is_leaf = child.is_leaf();
            child_is_new = child.is_new() || child.is_empty();
        }

        if child_is_leaf {
            let (child_offsets, child_maxoff) = {
                let child = child_rc.rl();
                let (offsets, _, _) = sweep_leaf(&child, predicate);
                (offsets, child.max_offset())
            };

            // Inserts may have landed on the page between the physical
            // pass scheduling it and now. Whatever is dead still gets
            // purged, but a page with survivors stays.
            if !child_offsets.is_empty() {
                self.purge_page(tx, child_blkno, child_rc, &child_offsets, false)?;
            }

            if child_offsets.len() as u16 == child_maxoff || child_is_new {
                self.unlink_child(tx, info, child_blkno, child_rc, map)?;
                stats.pages_deleted += 1;
                todelete.push(offset_in_parent - todelete.len() as u16);
            } else {
                debug!(
                    "block {} regained live tuples, not reclaimed",
                    child_blkno
                );
            }
        } else {
            // An inner page only reaches the scheduled state once the
            // rescan pass has emptied it of downlinks.
            if !child_is_new {
                warn!(
                    "block {} is scheduled for deletion but still holds \
                     entries, skipping",
                    child_blkno
                );
                return Ok(());
            }
            self.unlink_child(tx, info, child_blkno, child_rc, map)?;
            stats.pages_deleted += 1;
            todelete.push(offset_in_parent - todelete.len() as u16);
        }

        Ok(())
    }

    /// Splice the right-link chain around the child, then stamp it
    /// deleted. The splice goes first so that sibling traversal never
    /// observes a deleted page.
    fn unlink_child(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        child_blkno: BlockNumber,
        child_rc: &Pod<GistPage>,
        map: &mut BlockInfoMap,
    ) -> SmallResult {
        let left_blkno = map.get_left_link(child_blkno);
        let new_right = child_rc.rl().get_rightlink();
        if block_number_is_valid(left_blkno) {
            self.splice_rightlink(tx, left_blkno, new_right, info.strategy)?;
        }
        if block_number_is_valid(new_right) {
            // The chain now skips the child; keep the map in step so a
            // later deletion of the right sibling splices the correct
            // live page.
            map.record_left_link(new_right, left_blkno);
        }

        self.mark_page_deleted(tx, child_blkno, child_rc)?;
        map.mark_to_delete(child_blkno, true);
        Ok(())
    }
}
