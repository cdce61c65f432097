use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use small_gist::{
    concurrent_status::Permission, transaction::Transaction, types::Pod,
    utils::HandyRwLock, BlockNumber, Database, GistIndex, GistPage, GistTuple,
    HeapTupleId, GIST_ROOT_BLOCK,
};

/// A heap tuple id with a distinct heap block per value, which is all
/// the vacuum tests need to tell tuples apart.
pub fn tid(n: u32) -> HeapTupleId {
    HeapTupleId::new(n, 1)
}

pub fn new_empty_index(path: &str) -> Pod<GistIndex> {
    let index_rc = Arc::new(RwLock::new(GistIndex::new(path, false)));
    Database::catalog().add_index(Arc::clone(&index_rc));
    index_rc
}

pub fn new_unlogged_index(path: &str) -> Pod<GistIndex> {
    let index_rc = Arc::new(RwLock::new(GistIndex::new(path, true)));
    Database::catalog().add_index(Arc::clone(&index_rc));
    index_rc
}

pub fn leaf_page(tids: &[HeapTupleId]) -> GistPage {
    let mut page = GistPage::new_leaf();
    for t in tids {
        page.append_tuple(GistTuple::new_leaf(*t, &t.block.to_le_bytes()));
    }
    page
}

pub fn inner_page(children: &[BlockNumber]) -> GistPage {
    let mut page = GistPage::new_inner();
    for c in children {
        page.append_tuple(GistTuple::new_downlink(*c, &c.to_le_bytes()));
    }
    page
}

pub fn write_page(index: &GistIndex, blkno: BlockNumber, page: &GistPage) {
    index.write_page_to_disk(blkno, &page.to_bytes()).unwrap();
}

/// Root inner page at block 0 with one leaf child per tid slice, the
/// children stored at blocks 1..=n and chained left to right through
/// their rightlinks.
pub fn build_two_level(path: &str, leaf_tids: &[&[HeapTupleId]]) -> Pod<GistIndex> {
    let index_rc = new_empty_index(path);

    // borrow of index_rc starts here
    {
        let index = index_rc.rl();
        let mut children = Vec::new();
        for (i, tids) in leaf_tids.iter().enumerate() {
            let blkno = (i + 1) as BlockNumber;
            let mut leaf = leaf_page(tids);
            if i + 1 < leaf_tids.len() {
                leaf.set_rightlink(blkno + 1);
            }
            write_page(&index, blkno, &leaf);
            children.push(blkno);
        }
        write_page(&index, GIST_ROOT_BLOCK, &inner_page(&children));
    }
    // borrow of index_rc ends here

    index_rc
}

/// Predicate marking exactly the given tuples dead.
pub fn dead_set(tids: &[HeapTupleId]) -> impl Fn(&HeapTupleId) -> bool {
    let dead: HashSet<HeapTupleId> = tids.iter().cloned().collect();
    move |t| dead.contains(t)
}

/// Current content of one page, read through the page cache so
/// unflushed vacuum results are visible.
pub fn read_page(index: &GistIndex, blkno: BlockNumber) -> GistPage {
    let tx = Transaction::new();
    let pid = index.pid(blkno);
    let page_rc = Database::page_cache()
        .get_page(&tx, Permission::ReadOnly, &pid)
        .unwrap();
    let page = page_rc.rl().clone();
    Database::concurrent_status().release_lock(&tx, &pid).unwrap();
    page
}

pub fn heap_blocks(page: &GistPage) -> Vec<u32> {
    (1..=page.max_offset())
        .filter_map(|i| page.tuple_at(i).heap_tid().map(|t| t.block))
        .collect()
}

pub fn downlinks(page: &GistPage) -> Vec<BlockNumber> {
    (1..=page.max_offset())
        .filter_map(|i| page.tuple_at(i).downlink())
        .collect()
}
