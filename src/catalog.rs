use crate::{
    error::{ErrorKind, SmallError},
    gist::index::GistIndex,
    types::{ConcurrentHashMap, Pod, ResultPod},
    utils::HandyRwLock,
};

/// Registry of the indexes known to this process, keyed by index id.
/// The page cache resolves ids against it when loading and flushing
/// pages.
pub struct Catalog {
    index_map: ConcurrentHashMap<u32, Pod<GistIndex>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            index_map: ConcurrentHashMap::new(),
        }
    }

    pub fn add_index(&self, index: Pod<GistIndex>) {
        let index_id = index.rl().get_id();
        self.index_map.insert(index_id, index);
    }

    pub fn get_index(&self, index_id: u32) -> ResultPod<GistIndex> {
        self.index_map.get(&index_id).ok_or_else(|| {
            SmallError::new(
                ErrorKind::Internal,
                &format!("index {} not found", index_id),
            )
        })
    }

    pub fn clear(&self) {
        self.index_map.clear();
    }
}
