use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::ringitem::format::{self, HEADER_SIZE};

/// Timestamp, source id, payload size and barrier type.
pub const FRAGMENT_HEADER_SIZE: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    pub timestamp: u64,
    pub source_id: u32,
    pub payload_size: u32,
    pub barrier: u32,
}

impl FragmentHeader {
    pub fn read(frag: &[u8]) -> FragmentHeader {
        FragmentHeader {
            timestamp: LittleEndian::read_u64(&frag[0..8]),
            source_id: LittleEndian::read_u32(&frag[8..12]),
            payload_size: LittleEndian::read_u32(&frag[12..16]),
            barrier: LittleEndian::read_u32(&frag[16..20]),
        }
    }

    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let mut out = [0u8; FRAGMENT_HEADER_SIZE];
        LittleEndian::write_u64(&mut out[0..8], self.timestamp);
        LittleEndian::write_u32(&mut out[8..12], self.source_id);
        LittleEndian::write_u32(&mut out[12..16], self.payload_size);
        LittleEndian::write_u32(&mut out[16..20], self.barrier);
        out
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.encode());
    }
}

/// One flat fragment of an event-built body.
///
/// `offset` locates the fragment header within the walked body so callers
/// that need to patch sizes in place can find their way back.
#[derive(Debug)]
pub struct FragmentView<'a> {
    pub offset: usize,
    pub header: FragmentHeader,
    pub item: &'a [u8],
}

/// Lazy walk over the fragments of an event-built body.
///
/// The body must start with the self-inclusive `u32` size the event builder
/// prefixes to the fragment sequence.  The walk stops at the first
/// structural inconsistency, yielding it as an error.
pub struct FragmentIter<'a> {
    block: &'a [u8],
    pos: usize,
    remaining: usize,
    failed: bool,
}

impl<'a> FragmentIter<'a> {
    pub fn new(body: &'a [u8]) -> Result<FragmentIter<'a>> {
        if body.len() < 4 {
            return Err(Error::CorruptRecord(
                "event-built body too short for its size prefix".into(),
            ));
        }
        let evb_size = LittleEndian::read_u32(&body[0..4]) as usize;
        if evb_size < 4 || evb_size > body.len() {
            return Err(Error::CorruptRecord(format!(
                "event-built body size {} outside block of {} bytes",
                evb_size,
                body.len()
            )));
        }
        Ok(FragmentIter {
            block: body,
            pos: 4,
            remaining: evb_size - 4,
            failed: false,
        })
    }
}

impl<'a> Iterator for FragmentIter<'a> {
    type Item = Result<FragmentView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        if self.remaining < FRAGMENT_HEADER_SIZE + HEADER_SIZE
            || self.pos + FRAGMENT_HEADER_SIZE + HEADER_SIZE > self.block.len()
        {
            self.failed = true;
            return Some(Err(Error::CorruptRecord(format!(
                "fragment header runs past the event, {} bytes left",
                self.remaining
            ))));
        }
        let header = FragmentHeader::read(&self.block[self.pos..]);
        let item_off = self.pos + FRAGMENT_HEADER_SIZE;
        let inner_size = format::item_size(&self.block[item_off..]) as usize;
        let total = FRAGMENT_HEADER_SIZE + inner_size;
        if inner_size < HEADER_SIZE + 4 || total > self.remaining {
            self.failed = true;
            return Some(Err(Error::CorruptRecord(format!(
                "fragment of {} bytes exceeds the {} bytes left in the event",
                total, self.remaining
            ))));
        }
        let view = FragmentView {
            offset: self.pos,
            header,
            item: &self.block[item_off..item_off + inner_size],
        };
        self.pos += total;
        self.remaining -= total;
        Some(Ok(view))
    }
}

pub fn count_fragments(body: &[u8]) -> Result<usize> {
    let mut n = 0;
    for frag in FragmentIter::new(body)? {
        frag?;
        n += 1;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ringitem::format::{RingItemBuilder, PHYSICS_EVENT};

    fn built_event(fragments: &[(u64, u32, Vec<u8>)]) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u32_le(0); // evb size, patched below
        for (ts, sid, item) in fragments {
            FragmentHeader {
                timestamp: *ts,
                source_id: *sid,
                payload_size: item.len() as u32,
                barrier: 0,
            }
            .encode_to(&mut body);
            body.put_slice(item);
        }
        let evb_size = body.len() as u32;
        LittleEndian::write_u32(&mut body[0..4], evb_size);
        body.to_vec()
    }

    fn inner_item(ts: u64, payload: &[u8]) -> Vec<u8> {
        RingItemBuilder::new(PHYSICS_EVENT)
            .body_header(ts, 1, 0)
            .bytes(payload)
            .build()
    }

    #[test]
    fn walks_every_fragment() {
        let body = built_event(&[
            (10, 1, inner_item(10, &[1, 2, 3, 4])),
            (11, 2, inner_item(11, &[5, 6, 7, 8])),
        ]);
        let frags: Vec<_> = FragmentIter::new(&body)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].header.timestamp, 10);
        assert_eq!(frags[1].header.source_id, 2);
        assert_eq!(
            frags[1].header.payload_size as usize,
            frags[1].item.len()
        );
        assert_eq!(count_fragments(&body).unwrap(), 2);
    }

    #[test]
    fn empty_event_has_no_fragments() {
        let body = built_event(&[]);
        assert_eq!(count_fragments(&body).unwrap(), 0);
    }

    #[test]
    fn oversized_fragment_is_corrupt() {
        let mut body = built_event(&[(10, 1, inner_item(10, &[1, 2, 3, 4]))]);
        // Claim the inner ring item is bigger than the event holds.
        let item_off = 4 + FRAGMENT_HEADER_SIZE;
        LittleEndian::write_u32(&mut body[item_off..item_off + 4], 4096);
        let got: Vec<_> = FragmentIter::new(&body).unwrap().collect();
        assert_eq!(got.len(), 1);
        assert!(got[0].is_err());
    }
}
