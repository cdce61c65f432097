mod test_utils;

use std::thread;

use small_gist::{
    transaction::Transaction, utils::HandyRwLock, VacuumInfo, VacuumStats,
};

use test_utils::{build_two_level, dead_set, setup, tid};

fn vacuum_worker(
    path: &'static str,
    s: &crossbeam::channel::Sender<VacuumStats>,
) {
    let index_rc = build_two_level(
        path,
        &[&[tid(1), tid(2)], &[tid(3), tid(4)], &[tid(5), tid(6)]],
    );
    let index = index_rc.rl();
    let tx = Transaction::new();
    let predicate = dead_set(&[tid(3), tid(4)]);

    let stats = index
        .bulk_delete(&tx, &VacuumInfo::new(), None, &predicate)
        .unwrap();
    index.check_integrity(&tx);

    s.send(stats).unwrap();
}

/// Two vacuums running at once on different indexes, sharing the page
/// cache, the lock table and the log.
#[test]
fn test_parallel_vacuums() {
    setup();

    let (sender, receiver) = crossbeam::channel::unbounded();

    let mut handles = Vec::new();
    for path in &["gist_parallel_a.db", "gist_parallel_b.db"] {
        let s = sender.clone();
        let path: &'static str = *path;
        handles.push(thread::spawn(move || {
            vacuum_worker(path, &s);
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    for _ in 0..2 {
        let stats = receiver.recv().unwrap();
        assert_eq!(stats.tuples_removed, 2);
        assert_eq!(stats.num_index_tuples, 4);
        assert_eq!(stats.pages_deleted, 1);
    }
}
