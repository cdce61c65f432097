pub mod catalog;
pub mod concurrent_status;
pub mod database;
pub mod error;
pub mod gist;
pub mod io;
pub mod transaction;
pub mod tx_log;
pub mod types;
pub mod utils;

pub use crate::database::Database;
pub use crate::error::{ErrorKind, SmallError};
pub use crate::gist::index::GistIndex;
pub use crate::gist::page::GistPage;
pub use crate::gist::page_id::{
    BlockNumber, GistPageId, GIST_ROOT_BLOCK, INVALID_BLOCK_NUMBER,
};
pub use crate::gist::tuple::{GistTuple, HeapTupleId};
pub use crate::gist::vacuum::{
    AccessStrategy, DeletePredicate, VacuumInfo, VacuumStats,
};
