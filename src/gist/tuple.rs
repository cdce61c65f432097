use core::fmt;
use std::io::Read;

use crate::{
    gist::page_id::BlockNumber,
    io::{read_exact, Decodeable, Encodeable, SmallWriter},
};

/// Pointer to a heap tuple, the payload of leaf tuples. The predicate
/// callback of a bulk delete decides liveness per `HeapTupleId`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapTupleId {
    pub block: u32,
    pub offset: u16,
}

impl HeapTupleId {
    pub fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }
}

impl fmt::Display for HeapTupleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.block, self.offset)
    }
}

impl fmt::Debug for HeapTupleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Clone, PartialEq)]
enum TuplePointer {
    Heap(HeapTupleId),
    Downlink(BlockNumber),
}

/// An index tuple. Leaf tuples point at heap tuples, inner tuples
/// point at child pages. The key bytes are opaque to the vacuum code.
#[derive(Clone, PartialEq)]
pub struct GistTuple {
    pointer: TuplePointer,
    invalid: bool,
    key: Vec<u8>,
}

impl GistTuple {
    pub fn new_leaf(tid: HeapTupleId, key: &[u8]) -> Self {
        Self {
            pointer: TuplePointer::Heap(tid),
            invalid: false,
            key: key.to_vec(),
        }
    }

    pub fn new_downlink(child: BlockNumber, key: &[u8]) -> Self {
        Self {
            pointer: TuplePointer::Downlink(child),
            invalid: false,
            key: key.to_vec(),
        }
    }

    pub fn heap_tid(&self) -> Option<HeapTupleId> {
        match self.pointer {
            TuplePointer::Heap(tid) => Some(tid),
            TuplePointer::Downlink(_) => None,
        }
    }

    pub fn downlink(&self) -> Option<BlockNumber> {
        match self.pointer {
            TuplePointer::Heap(_) => None,
            TuplePointer::Downlink(child) => Some(child),
        }
    }

    /// Tuples left behind by an incomplete page split during recovery
    /// of an old version carry this marker. They are reported but
    /// never removed.
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn set_invalid(&mut self) {
        self.invalid = true;
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for GistTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.pointer {
            TuplePointer::Heap(tid) => write!(f, "<tid: {}>", tid),
            TuplePointer::Downlink(child) => {
                write!(f, "<downlink: {}>", child)
            }
        }
    }
}

/// # Format
///
/// - 1 byte: pointer kind (0 for heap, 1 for downlink)
/// - 1 byte: invalid marker
/// - 4 bytes: heap block / child block
/// - 2 bytes: heap offset (0 for downlinks)
/// - 2 bytes: key size
/// - n bytes: key
impl Encodeable for GistTuple {
    fn encode(&self) -> Vec<u8> {
        let mut writer = SmallWriter::new();
        match self.pointer {
            TuplePointer::Heap(tid) => {
                writer.write(&0u8);
                writer.write(&self.invalid);
                writer.write(&tid.block);
                writer.write(&tid.offset);
            }
            TuplePointer::Downlink(child) => {
                writer.write(&1u8);
                writer.write(&self.invalid);
                writer.write(&child);
                writer.write(&0u16);
            }
        }
        writer.write(&(self.key.len() as u16));
        writer.write_bytes(&self.key);
        writer.to_bytes()
    }
}

impl Decodeable for GistTuple {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let kind = u8::decode_from(reader);
        let invalid = bool::decode_from(reader);
        let block = u32::decode_from(reader);
        let offset = u16::decode_from(reader);
        let key_len = u16::decode_from(reader);
        let key = read_exact(reader, key_len as usize);

        let pointer = match kind {
            0 => TuplePointer::Heap(HeapTupleId::new(block, offset)),
            1 => TuplePointer::Downlink(block),
            _ => panic!("invalid tuple pointer kind: {}", kind),
        };
        Self {
            pointer,
            invalid,
            key,
        }
    }
}
