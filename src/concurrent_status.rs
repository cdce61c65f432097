use core::fmt;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    thread::sleep,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    gist::page_id::GistPageId,
    transaction::Transaction,
    types::{ConcurrentHashMap, SmallResult},
    utils::HandyRwLock,
    Database,
};

#[derive(Debug, Clone, Copy)]
pub enum Lock {
    XLock,
    SLock,
}

#[derive(Debug, Clone, Copy)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn to_lock(&self) -> Lock {
        match self {
            Permission::ReadOnly => Lock::SLock,
            Permission::ReadWrite => Lock::XLock,
        }
    }
}

/// Page-level lock table.
///
/// Unlike a transaction manager this table is not two-phase: a scan
/// releases each page's lock before moving to the next page, and a
/// lock upgrade is always release-then-reacquire, never an in-place
/// upgrade.
pub struct ConcurrentStatus {
    s_lock_map: ConcurrentHashMap<GistPageId, HashSet<Transaction>>,
    x_lock_map: ConcurrentHashMap<GistPageId, Transaction>,
    hold_pages: ConcurrentHashMap<Transaction, HashSet<GistPageId>>,
    modification_lock: Arc<Mutex<()>>,
}

impl ConcurrentStatus {
    pub fn new() -> Self {
        Self {
            s_lock_map: ConcurrentHashMap::new(),
            x_lock_map: ConcurrentHashMap::new(),
            hold_pages: ConcurrentHashMap::new(),
            modification_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn acquire_lock(
        tx: &Transaction,
        lock: &Lock,
        page_id: &GistPageId,
    ) -> SmallResult {
        Database::concurrent_status().request_lock(tx, lock, page_id)
    }

    pub fn request_lock(
        &self,
        tx: &Transaction,
        lock: &Lock,
        page_id: &GistPageId,
    ) -> SmallResult {
        debug!(
            "request lock, tx: {:?}, lock: {:?}, page_id: {:?}",
            tx, lock, page_id
        );

        let start_time = Instant::now();
        while Instant::now().duration_since(start_time).as_secs() < 3 {
            if self.add_lock(tx, lock, page_id)? {
                return Ok(());
            }

            sleep(Duration::from_millis(10));
        }

        debug!(
            "acquire_lock timeout, tx: {}, lock: {:?}, page_id: {:?}, concurrent_status: {:?}",
            tx, lock, page_id, self,
        );

        Err(SmallError::new(
            ErrorKind::LockTimeout,
            &format!("acquire lock timeout, page_id: {:?}", page_id),
        ))
    }

    // Add a lock to the given page. This api is idempotent.
    //
    // The method modifies several maps and so may have at most one
    // runner at a time, but it must not require exclusive access to
    // the whole ConcurrentStatus (multiple threads request locks
    // simultaneously). Hence the dedicated modification mutex.
    //
    // # Return
    //
    // Whether the lock was added successfully.
    fn add_lock(
        &self,
        tx: &Transaction,
        lock: &Lock,
        page_id: &GistPageId,
    ) -> Result<bool, SmallError> {
        let _guard = self.modification_lock.lock().unwrap();

        if !self.x_lock_map.exact_or_empty(page_id, tx) {
            return Ok(false);
        }

        match lock {
            Lock::SLock => {
                self.s_lock_map.alter_value(page_id, |s_lock_set| {
                    s_lock_set.insert(*tx);
                    Ok(())
                })?;
            }
            Lock::XLock => {
                if let Some(holders) = self.s_lock_map.get(page_id) {
                    if holders.iter().any(|holder| holder != tx) {
                        return Ok(false);
                    }
                }
                self.x_lock_map.get_inner().wl().insert(*page_id, *tx);
            }
        }

        self.hold_pages.alter_value(tx, |hold_pages_set| {
            hold_pages_set.insert(*page_id);
            Ok(())
        })?;

        debug!(
            "lock acquired, tx: {}, lock: {:?}, page_id: {:?}",
            tx, lock, page_id
        );
        Ok(true)
    }

    pub fn release_lock(
        &self,
        tx: &Transaction,
        page_id: &GistPageId,
    ) -> SmallResult {
        let _guard = self.modification_lock.lock().unwrap();

        let s_lock_map_inner = self.s_lock_map.get_inner();
        let mut s_lock_map = s_lock_map_inner.wl();
        if let Some(v) = s_lock_map.get_mut(page_id) {
            v.remove(tx);
            if v.is_empty() {
                s_lock_map.remove(page_id);
            }
        }
        drop(s_lock_map);

        let x_lock_map_inner = self.x_lock_map.get_inner();
        let mut x_lock_map = x_lock_map_inner.wl();
        if let Some(holder) = x_lock_map.get(page_id) {
            if holder == tx {
                x_lock_map.remove(page_id);
            }
        }
        drop(x_lock_map);

        self.hold_pages.alter_value(tx, |hold_pages_set| {
            hold_pages_set.remove(page_id);
            Ok(())
        })?;

        Ok(())
    }

    pub fn release_lock_by_tx(&self, tx: &Transaction) -> SmallResult {
        let hold_pages = match self.hold_pages.get(tx) {
            Some(pages) => pages,
            None => return Ok(()),
        };

        for page_id in hold_pages {
            self.release_lock(tx, &page_id)?;
        }

        self.hold_pages.remove(tx);

        Ok(())
    }

    pub fn holds_lock(&self, tx: &Transaction, page_id: &GistPageId) -> bool {
        match self.hold_pages.get(tx) {
            Some(pages) => pages.contains(page_id),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.s_lock_map.clear();
        self.x_lock_map.clear();
        self.hold_pages.clear();
    }
}

impl fmt::Display for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut depiction = "\n".to_string();

        depiction.push_str("s_lock_map: {");
        for (k, v) in self.s_lock_map.get_inner().rl().iter() {
            depiction.push_str(&format!("\n\t{:?} -> {:?},", k, v));
        }
        depiction.push_str("\n}\n");

        depiction.push_str("x_lock_map: {");
        for (k, v) in self.x_lock_map.get_inner().rl().iter() {
            depiction.push_str(&format!("\n\t{:?} -> {:?},", k, v));
        }
        depiction.push_str("\n}\n");

        write!(f, "{}", depiction)
    }
}

impl fmt::Debug for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
