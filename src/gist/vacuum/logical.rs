use log::warn;

use crate::{
    concurrent_status::Permission,
    gist::{
        index::GistIndex,
        page::GistPage,
        page_id::{block_number_is_valid, BlockNumber, GIST_ROOT_BLOCK},
        vacuum::{sweep_leaf, DeletePredicate, VacuumInfo, VacuumStats},
    },
    transaction::Transaction,
    tx_log::{Lsn, INVALID_LSN},
    types::{Pod, SmallResult},
    utils::HandyRwLock,
    Database,
};

#[derive(Clone, Copy)]
struct DescentItem {
    blkno: BlockNumber,

    /// LSN of the parent page at descent time, compared against the
    /// page's NSN to detect a concurrent split.
    parent_lsn: Lsn,
}

/// Memory-bounded fallback: a top-down descent that purges dead leaf
/// entries but reclaims no pages. Its only bookkeeping is the descent
/// stack, so it runs within any maintenance memory budget.
impl GistIndex {
    pub(crate) fn logical_bulk_delete(
        &self,
        tx: &Transaction,
        info: &VacuumInfo,
        predicate: &DeletePredicate,
        stats: &mut VacuumStats,
    ) -> SmallResult {
        let mut stack = vec![DescentItem {
            blkno: GIST_ROOT_BLOCK,
            parent_lsn: INVALID_LSN,
        }];

        while let Some(item) = stack.pop() {
            let pid = self.pid(item.blkno);
            let page_rc =
                Database::page_cache().get_page(tx, Permission::ReadOnly, &pid)?;

            let result = self.logical_visit(
                tx, predicate, &item, &page_rc, &mut stack, stats,
            );
            self.release_page(tx, &pid, &page_rc, info.strategy)?;
            result?;

            self.vacuum_delay_point(info)?;
        }
        Ok(())
    }

    fn logical_visit(
        &self,
        tx: &Transaction,
        predicate: &DeletePredicate,
        item: &DescentItem,
        page_rc: &Pod<GistPage>,
        stack: &mut Vec<DescentItem>,
        stats: &mut VacuumStats,
    ) -> SmallResult {
        page_rc.rl().checkpage()?;

        if page_rc.rl().is_leaf() {
            self.upgrade_to_exclusive(tx, &self.pid(item.blkno))?;

            // The lock was dropped for the upgrade; a root that split
            // meanwhile is no longer a leaf, retry it as such.
            if item.blkno == GIST_ROOT_BLOCK && !page_rc.rl().is_leaf() {
                stack.push(*item);
                return Ok(());
            }

            Self::push_right_if_split(page_rc, item, stack);

            let todelete = {
                let page = page_rc.rl();
                let (offsets, dead, live) = sweep_leaf(&page, predicate);
                stats.tuples_removed += dead;
                stats.num_index_tuples += live;
                offsets
            };

            if !todelete.is_empty() {
                self.purge_page(tx, item.blkno, page_rc, &todelete, false)?;
            }
        } else {
            Self::push_right_if_split(page_rc, item, stack);

            let page = page_rc.rl();
            let page_lsn = page.get_lsn();
            for i in 1..=page.max_offset() {
                let tuple = page.tuple_at(i);
                if let Some(child) = tuple.downlink() {
                    stack.push(DescentItem {
                        blkno: child,
                        parent_lsn: page_lsn,
                    });

                    if tuple.is_invalid() {
                        warn!(
                            "{}: inner tuple at block {} offset {} is marked \
                             invalid, left by an incomplete split before an \
                             upgrade; please reindex",
                            self, item.blkno, i
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// A page whose NSN is newer than the parent LSN we descended
    /// with was split after we read the parent; its right sibling has
    /// no downlink yet and must be visited through the rightlink.
    fn push_right_if_split(
        page_rc: &Pod<GistPage>,
        item: &DescentItem,
        stack: &mut Vec<DescentItem>,
    ) {
        let page = page_rc.rl();
        if item.blkno != GIST_ROOT_BLOCK
            && item.parent_lsn != INVALID_LSN
            && (page.is_follow_right() || item.parent_lsn < page.get_nsn())
            && block_number_is_valid(page.get_rightlink())
        {
            stack.push(DescentItem {
                blkno: page.get_rightlink(),
                parent_lsn: item.parent_lsn,
            });
        }
    }
}
