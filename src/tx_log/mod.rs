mod log_manager;

pub use self::log_manager::{next_fake_lsn, LogManager, Lsn, INVALID_LSN};
