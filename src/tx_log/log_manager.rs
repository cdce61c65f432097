use std::{
    io::SeekFrom,
    sync::atomic::{AtomicU64, Ordering},
};

use itertools::Itertools;
use log::{debug, warn};

use crate::{
    error::{ErrorKind, SmallError},
    gist::{index::GistIndex, page::GistPage, page_id::BlockNumber},
    io::{SmallFile, SmallReader, SmallWriter},
    transaction::Transaction,
    types::SmallResult,
};

/// Byte position of a log record. 0 never addresses a record (the
/// file starts with a header), so 0 doubles as the invalid value.
pub type Lsn = u64;

pub const INVALID_LSN: Lsn = 0;

static LOG_FILE_MAGIC: &[u8; 8] = b"SGISTLOG";

static FAKE_LSN: AtomicU64 = AtomicU64::new(1);

/// LSN source for unlogged indexes. Their pages never hit the log but
/// still need monotonic stamps for the split-detection protocol.
pub fn next_fake_lsn() -> Lsn {
    FAKE_LSN.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum RecordType {
    Start,
    Update,
    Commit,
    Abort,
}

impl RecordType {
    fn try_from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordType::Start),
            1 => Some(RecordType::Update),
            2 => Some(RecordType::Commit),
            3 => Some(RecordType::Abort),
            _ => None,
        }
    }
}

struct UpdateRecord<'a> {
    lsn: Lsn,
    index_id: u32,
    blkno: BlockNumber,
    after: &'a [u8],
}

pub struct LogManager {
    file: SmallFile,

    /// The absolute position of the next record to be written.
    current_offset: u64,

    total_records: usize,

    file_path: String,
}

impl LogManager {
    pub fn new(file_path: &str) -> Self {
        let file = SmallFile::new(file_path);
        let size = file.get_size().unwrap_or(0);

        let mut log_manager = Self {
            file,
            current_offset: size,
            total_records: 0,
            file_path: file_path.to_string(),
        };

        if size < LOG_FILE_MAGIC.len() as u64 {
            log_manager.reset();
        }
        log_manager
    }

    pub fn reset(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.seek(SeekFrom::Start(0));
        let _ = self.file.write_bytes(LOG_FILE_MAGIC);
        self.current_offset = LOG_FILE_MAGIC.len() as u64;
        self.total_records = 0;
    }

    pub fn records_count(&self) -> usize {
        self.total_records
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn log_start(&mut self, tx: &Transaction) -> SmallResult {
        self.append_control_record(RecordType::Start, tx)
    }

    pub fn log_commit(&mut self, tx: &Transaction) -> SmallResult {
        self.append_control_record(RecordType::Commit, tx)
    }

    pub fn log_abort(&mut self, tx: &Transaction) -> SmallResult {
        self.append_control_record(RecordType::Abort, tx)
    }

    /// Write an UPDATE record for a single page mutation (with before
    /// and after images) and return its LSN. The caller stamps the
    /// LSN on the page while still holding the page lock, making the
    /// record and the page image atomic.
    pub fn log_update(
        &mut self,
        tx: &Transaction,
        index_id: u32,
        blkno: BlockNumber,
        todelete: &[u16],
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn, SmallError> {
        let mut writer = SmallWriter::new();
        writer.write(&(RecordType::Update as u8));
        writer.write(&tx.get_id());
        writer.write(&index_id);
        writer.write(&blkno);
        writer.write(&(todelete.len() as u16));
        for offset in todelete {
            writer.write(offset);
        }
        writer.write(&(before.len() as u32));
        writer.write_bytes(before);
        writer.write(&(after.len() as u32));
        writer.write_bytes(after);

        let lsn = self.append(&writer.to_bytes())?;
        debug!(
            "update logged, tx: {}, index: {}, blkno: {}, offsets: [{}]",
            tx,
            index_id,
            blkno,
            todelete.iter().join(", ")
        );
        Ok(lsn)
    }

    /// Re-apply the after image of every UPDATE record that belongs to
    /// `index`, stamping each page with its record's LSN. Returns the
    /// number of pages written.
    pub fn replay(&mut self, index: &GistIndex) -> Result<usize, SmallError> {
        let buf = self.file.read_all()?;
        let mut applied = 0;

        Self::for_each_update(&buf, |record| {
            if record.index_id != index.get_id() {
                return Ok(());
            }
            let mut page = GistPage::from_bytes(record.after);
            page.set_lsn(record.lsn);
            index.write_page_to_disk(record.blkno, &page.to_bytes())?;
            applied += 1;
            Ok(())
        })?;

        Ok(applied)
    }

    /// Count the UPDATE records belonging to one index.
    pub fn count_update_records(
        &self,
        index_id: u32,
    ) -> Result<usize, SmallError> {
        let buf = self.file.read_all()?;
        let mut count = 0;

        Self::for_each_update(&buf, |record| {
            if record.index_id == index_id {
                count += 1;
            }
            Ok(())
        })?;

        Ok(count)
    }

    fn append_control_record(
        &mut self,
        record_type: RecordType,
        tx: &Transaction,
    ) -> SmallResult {
        let mut writer = SmallWriter::new();
        writer.write(&(record_type as u8));
        writer.write(&tx.get_id());
        self.append(&writer.to_bytes())?;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<Lsn, SmallError> {
        let lsn = self.current_offset;
        self.file.seek(SeekFrom::Start(self.current_offset))?;
        self.file.write_bytes(bytes)?;
        self.file.flush()?;
        self.current_offset += bytes.len() as u64;
        self.total_records += 1;
        Ok(lsn)
    }

    /// Walk the log sequentially, handing every complete UPDATE record
    /// to `f`. A torn tail (crash mid-append) ends the walk without an
    /// error.
    fn for_each_update<F>(buf: &[u8], mut f: F) -> SmallResult
    where
        F: FnMut(UpdateRecord) -> SmallResult,
    {
        if buf.len() < LOG_FILE_MAGIC.len() || &buf[..8] != LOG_FILE_MAGIC {
            return Err(SmallError::new(
                ErrorKind::WalEmit,
                "log file header mismatch",
            ));
        }

        let mut reader = SmallReader::new(buf);
        reader.read_bytes(LOG_FILE_MAGIC.len());

        loop {
            if reader.remaining() < 1 {
                break;
            }
            let lsn = reader.pos() as Lsn;
            let record_type = match RecordType::try_from_u8(reader.read::<u8>()) {
                Some(t) => t,
                None => {
                    warn!("unknown log record type at {}, stop scan", lsn);
                    break;
                }
            };

            match record_type {
                RecordType::Start | RecordType::Commit | RecordType::Abort => {
                    if reader.remaining() < 8 {
                        break;
                    }
                    let _tx_id: u64 = reader.read();
                }
                RecordType::Update => {
                    if reader.remaining() < 8 + 4 + 4 + 2 {
                        break;
                    }
                    let _tx_id: u64 = reader.read();
                    let index_id: u32 = reader.read();
                    let blkno: u32 = reader.read();
                    let ntodelete: u16 = reader.read();
                    if reader.remaining() < ntodelete as usize * 2 + 4 {
                        break;
                    }
                    reader.read_bytes(ntodelete as usize * 2);
                    let before_len: u32 = reader.read();
                    if reader.remaining() < before_len as usize + 4 {
                        break;
                    }
                    reader.read_bytes(before_len as usize);
                    let after_len: u32 = reader.read();
                    if reader.remaining() < after_len as usize {
                        break;
                    }
                    let after = reader.read_bytes(after_len as usize);

                    f(UpdateRecord {
                        lsn,
                        index_id,
                        blkno,
                        after,
                    })?;
                }
            }
        }

        Ok(())
    }
}
