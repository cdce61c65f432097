use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::OnceCell;

use crate::{
    catalog::Catalog, concurrent_status::ConcurrentStatus,
    gist::page_cache::PageCache, tx_log::LogManager, types::Pod,
};

static DB: OnceCell<Database> = OnceCell::new();

pub static LOG_FILE_PATH: &str = "small-gist.log";

pub struct Database {
    page_cache: Pod<PageCache>,
    catalog: Pod<Catalog>,
    concurrent_status: Pod<ConcurrentStatus>,
    log_manager: Pod<LogManager>,
}

impl Database {
    fn new() -> Self {
        Self {
            page_cache: Arc::new(RwLock::new(PageCache::new())),
            catalog: Arc::new(RwLock::new(Catalog::new())),
            concurrent_status: Arc::new(RwLock::new(ConcurrentStatus::new())),
            log_manager: Arc::new(RwLock::new(LogManager::new(LOG_FILE_PATH))),
        }
    }

    pub fn global() -> &'static Database {
        DB.get_or_init(Database::new)
    }

    pub fn page_cache() -> RwLockReadGuard<'static, PageCache> {
        Self::global().page_cache.read().unwrap()
    }

    pub fn catalog() -> RwLockReadGuard<'static, Catalog> {
        Self::global().catalog.read().unwrap()
    }

    pub fn concurrent_status() -> RwLockReadGuard<'static, ConcurrentStatus> {
        Self::global().concurrent_status.read().unwrap()
    }

    pub fn mut_log_manager() -> RwLockWriteGuard<'static, LogManager> {
        Self::global().log_manager.write().unwrap()
    }

    /// Drop all cached state. Only meant for test setup; running
    /// operations lose their cached pages.
    pub fn reset() {
        Self::page_cache().clear();
        Self::concurrent_status().clear();
        Self::catalog().clear();
        Self::mut_log_manager().reset();
    }
}
