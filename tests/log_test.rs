mod test_utils;

use std::fs;

use small_gist::{
    transaction::Transaction, utils::HandyRwLock, AccessStrategy, Database,
    VacuumInfo, GIST_ROOT_BLOCK,
};

use test_utils::{
    build_two_level, dead_set, new_unlogged_index, read_page, setup, tid,
    write_page, leaf_page,
};

/// Replaying the update records of a bulk delete against the pre-state
/// file must reproduce the flushed post-state byte for byte.
#[test]
fn test_wal_replay_reproduces_post_state() {
    setup();

    let path = "gist_wal_replay.db";
    let index_rc = build_two_level(
        path,
        &[&[tid(1), tid(2)], &[tid(3), tid(4)], &[tid(5), tid(6)]],
    );
    let index = index_rc.rl();

    let pre_state = fs::read(path).unwrap();

    let tx = Transaction::new();
    let mut info = VacuumInfo::new();
    // keep every page cached so the flush below writes all mutations
    info.strategy = AccessStrategy::Normal;
    let predicate = dead_set(&[tid(3), tid(4), tid(5)]);

    let stats = index.bulk_delete(&tx, &info, None, &predicate).unwrap();
    assert_eq!(stats.pages_deleted, 1);

    Database::page_cache().flush_all_pages().unwrap();
    let post_state = fs::read(path).unwrap();
    assert_ne!(pre_state, post_state);

    // Roll the file back to the pre-vacuum image and recover from the
    // log alone.
    fs::write(path, &pre_state).unwrap();
    Database::page_cache().discard_index_pages(index.get_id());

    let applied = Database::mut_log_manager().replay(&index).unwrap();
    assert!(applied > 0);

    let recovered = fs::read(path).unwrap();
    assert_eq!(recovered, post_state);

    let tx2 = Transaction::new();
    index.check_integrity(&tx2);
}

#[test]
fn test_unlogged_index_skips_the_wal() {
    setup();

    let index_rc = new_unlogged_index("gist_unlogged.db");
    {
        let index = index_rc.rl();
        write_page(
            &index,
            GIST_ROOT_BLOCK,
            &leaf_page(&[tid(1), tid(2), tid(3)]),
        );
    }

    let index = index_rc.rl();
    let tx = Transaction::new();
    let info = VacuumInfo::new();
    let predicate = dead_set(&[tid(2)]);

    let stats = index.bulk_delete(&tx, &info, None, &predicate).unwrap();
    assert_eq!(stats.tuples_removed, 1);

    let wal_records = Database::mut_log_manager()
        .count_update_records(index.get_id())
        .unwrap();
    assert_eq!(wal_records, 0);

    // The page was still stamped, from the fake LSN counter.
    let root = read_page(&index, GIST_ROOT_BLOCK);
    assert_ne!(root.get_lsn(), 0);
}

#[test]
fn test_update_records_are_scoped_per_index() {
    setup();

    let first_rc = build_two_level(
        "gist_wal_scope_a.db",
        &[&[tid(1), tid(2)], &[tid(3), tid(4)]],
    );
    let second_rc = build_two_level(
        "gist_wal_scope_b.db",
        &[&[tid(1), tid(2)], &[tid(3), tid(4)]],
    );

    let predicate = dead_set(&[tid(1)]);

    {
        let index = first_rc.rl();
        let tx = Transaction::new();
        index
            .bulk_delete(&tx, &VacuumInfo::new(), None, &predicate)
            .unwrap();
    }

    let first_records = Database::mut_log_manager()
        .count_update_records(first_rc.rl().get_id())
        .unwrap();
    let second_records = Database::mut_log_manager()
        .count_update_records(second_rc.rl().get_id())
        .unwrap();

    assert!(first_records > 0);
    assert_eq!(second_records, 0);
}
