use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::{
    error::{ErrorKind, SmallError},
    types::SmallResult,
};

pub struct SmallFile {
    file: Mutex<File>,
}

impl SmallFile {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)
            .unwrap();

        Self {
            file: Mutex::new(file),
        }
    }

    pub fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    /// Write `bytes` at the current cursor position.
    pub fn write_bytes(&self, bytes: &[u8]) -> SmallResult {
        self.get_file()
            .write_all(bytes)
            .or(Err(SmallError::new(ErrorKind::WalEmit, "io error")))
    }

    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, SmallError> {
        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset))
            .or(Err(SmallError::new(ErrorKind::BufferRead, "io error")))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .or(Err(SmallError::new(ErrorKind::BufferRead, "io error")))?;
        Ok(buf)
    }

    pub fn read_all(&self) -> Result<Vec<u8>, SmallError> {
        let mut file = self.get_file();
        file.seek(SeekFrom::Start(0))
            .or(Err(SmallError::new(ErrorKind::BufferRead, "io error")))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .or(Err(SmallError::new(ErrorKind::BufferRead, "io error")))?;
        Ok(buf)
    }

    pub fn get_size(&self) -> Result<u64, SmallError> {
        let metadata = self
            .get_file()
            .metadata()
            .or(Err(SmallError::new(ErrorKind::Internal, "io error")))?;
        Ok(metadata.len())
    }

    pub fn get_current_position(&self) -> Result<u64, SmallError> {
        self.get_file()
            .seek(SeekFrom::Current(0))
            .or(Err(SmallError::new(ErrorKind::Internal, "io error")))
    }

    pub fn set_len(&self, len: u64) -> SmallResult {
        self.get_file()
            .set_len(len)
            .or(Err(SmallError::new(ErrorKind::Internal, "io error")))?;
        Ok(())
    }

    pub fn seek(&self, pos: SeekFrom) -> Result<u64, SmallError> {
        self.get_file()
            .seek(pos)
            .or(Err(SmallError::new(ErrorKind::Internal, "io error")))
    }

    pub fn flush(&self) -> SmallResult {
        self.get_file()
            .flush()
            .or(Err(SmallError::new(ErrorKind::Internal, "io error")))?;
        Ok(())
    }
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|_| panic!("io error, expect {}", bytes_count));
    buffer
}

/// A cursor over an in-memory byte buffer, the counterpart of
/// `SmallWriter`.
pub struct SmallReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SmallReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read<T: Decodeable>(&mut self) -> T {
        let mut cursor = Cursor::new(&self.buf[self.pos..]);
        let v = T::decode_from(&mut cursor);
        self.pos += cursor.position() as usize;
        v
    }

    pub fn read_bytes(&mut self, bytes_count: usize) -> &'a [u8] {
        let start = self.pos;
        self.pos += bytes_count;
        &self.buf[start..self.pos]
    }
}

pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_padded_bytes(self, size: usize) -> Vec<u8> {
        let mut buf = self.buf;

        if buf.len() > size {
            panic!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size
            );
        }

        buf.resize(size, 0);
        buf
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: Read>(reader: &mut R) -> Self;
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        u8::decode_from(reader) == 1
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, isize, usize, f32, f64);
