//! Walking primitives for worker messages: chunks of `[u64 timestamp]`
//! prefixed ring items, and the event-built structure inside physics
//! items.  Workers prepend their producer id to everything they emit so
//! the sorter can route the result.

use byteorder::{ByteOrder, LittleEndian};

use common::error::{Error, Result};
use common::ringitem::{self, HEADER_SIZE};

/// One timestamped ring item inside a work chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkEntry {
    /// Offset of the u64 timestamp within the chunk.
    pub ts_offset: usize,
    /// Offset of the ring item.
    pub item_offset: usize,
    /// Offset one past the ring item.
    pub end_offset: usize,
    pub timestamp: u64,
}

impl ChunkEntry {
    pub fn item<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        &chunk[self.item_offset..self.end_offset]
    }
}

/// Splits a `[(u64 ts)(ring item)]*` block into entries, validating item
/// sizes against the block bounds.
pub fn chunk_entries(chunk: &[u8]) -> Result<Vec<ChunkEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < chunk.len() {
        if chunk.len() - pos < 8 + HEADER_SIZE {
            return Err(Error::CorruptRecord(format!(
                "trailing {} bytes are not a timestamped ring item",
                chunk.len() - pos
            )));
        }
        let timestamp = LittleEndian::read_u64(&chunk[pos..pos + 8]);
        let item_offset = pos + 8;
        let size = ringitem::format::check_item(&chunk[item_offset..])? as usize;
        entries.push(ChunkEntry {
            ts_offset: pos,
            item_offset,
            end_offset: item_offset + size,
            timestamp,
        });
        pos = item_offset + size;
    }
    Ok(entries)
}

pub fn count_items(chunk: &[u8]) -> Result<usize> {
    Ok(chunk_entries(chunk)?.len())
}

/// Producer id prefix of a sorter-bound message.
pub fn producer_id(message: &[u8]) -> Result<u32> {
    if message.len() < 4 {
        return Err(Error::CorruptRecord(format!(
            "{} byte message cannot carry a producer id",
            message.len()
        )));
    }
    Ok(LittleEndian::read_u32(&message[0..4]))
}

/// A piece of an outgoing gathered message: either a range of the (by
/// then fixed up) input chunk or bytes the rewrite produced.
#[derive(Debug)]
pub enum Segment {
    Chunk(std::ops::Range<usize>),
    Owned(Vec<u8>),
}

impl Segment {
    pub fn len(&self) -> usize {
        match self {
            Segment::Chunk(r) => r.len(),
            Segment::Owned(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn segments_len(segments: &[Segment]) -> usize {
    segments.iter().map(Segment::len).sum()
}

/// In-place little-endian u32 patch helpers for the size fixups.
pub fn read_u32_at(chunk: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&chunk[offset..offset + 4])
}

pub fn write_u32_at(chunk: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut chunk[offset..offset + 4], value);
}

pub fn add_u32_at(chunk: &mut [u8], offset: usize, delta: u32) {
    let value = read_u32_at(chunk, offset).wrapping_add(delta);
    write_u32_at(chunk, offset, value);
}

/// Gathers segments into transport parts and sends them as one message.
pub fn send_segments(
    sink: &mut crate::messaging::Sender,
    chunk: &[u8],
    segments: &[Segment],
) -> Result<()> {
    let parts: Vec<&[u8]> = segments
        .iter()
        .map(|s| match s {
            Segment::Chunk(r) => &chunk[r.clone()],
            Segment::Owned(v) => v.as_slice(),
        })
        .collect();
    sink.send(&parts)
}
