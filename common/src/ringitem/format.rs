use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

pub const BEGIN_RUN: u32 = 1;
pub const END_RUN: u32 = 2;
pub const PAUSE_RUN: u32 = 3;
pub const RESUME_RUN: u32 = 4;
pub const RING_FORMAT: u32 = 12;
pub const PHYSICS_EVENT: u32 = 30;

/// Body-header timestamp meaning "no timestamp; inherit the last one seen".
pub const NULL_TIMESTAMP: u64 = u64::MAX;

/// Size and type words.
pub const HEADER_SIZE: usize = 8;
/// Size, timestamp, source id and barrier type; extensions add to this.
pub const BODY_HEADER_SIZE: usize = 20;

/// Total size in bytes, self inclusive.
pub fn item_size(item: &[u8]) -> u32 {
    LittleEndian::read_u32(&item[0..4])
}

pub fn item_type(item: &[u8]) -> u32 {
    LittleEndian::read_u32(&item[4..8])
}

pub fn set_item_size(item: &mut [u8], size: u32) {
    LittleEndian::write_u32(&mut item[0..4], size);
}

/// The u32 right after the fixed header.  Values of 0 and 4 both mean
/// "no body header"; anything else is the body header size including any
/// extension words.
fn body_header_word(item: &[u8]) -> u32 {
    LittleEndian::read_u32(&item[HEADER_SIZE..HEADER_SIZE + 4])
}

pub fn has_body_header(item: &[u8]) -> bool {
    body_header_word(item) > 4
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BodyHeader {
    pub size: u32,
    pub timestamp: u64,
    pub source_id: u32,
    pub barrier: u32,
}

pub fn body_header(item: &[u8]) -> Option<BodyHeader> {
    if !has_body_header(item) {
        return None;
    }
    let b = &item[HEADER_SIZE..];
    Some(BodyHeader {
        size: LittleEndian::read_u32(&b[0..4]),
        timestamp: LittleEndian::read_u64(&b[4..12]),
        source_id: LittleEndian::read_u32(&b[12..16]),
        barrier: LittleEndian::read_u32(&b[16..20]),
    })
}

/// Offset of the first body byte.  When no body header is present the body
/// starts right after the 4 zero padding bytes.
pub fn body_offset(item: &[u8]) -> usize {
    let word = body_header_word(item);
    if word > 4 {
        HEADER_SIZE + word as usize
    } else {
        HEADER_SIZE + 4
    }
}

pub fn body(item: &[u8]) -> &[u8] {
    let size = item_size(item) as usize;
    &item[body_offset(item)..size]
}

/// Checks that `data` starts with a complete, plausibly sized ring item and
/// returns its total size.
pub fn check_item(data: &[u8]) -> Result<usize> {
    if data.len() < HEADER_SIZE + 4 {
        return Err(Error::CorruptRecord(format!(
            "ring item truncated: {} bytes",
            data.len()
        )));
    }
    let size = item_size(data) as usize;
    if size < HEADER_SIZE + 4 || size > data.len() {
        return Err(Error::CorruptRecord(format!(
            "ring item size {} outside block of {} bytes",
            size,
            data.len()
        )));
    }
    Ok(size)
}

/// Assembles a ring item front to back, fixing the size word at the end.
///
/// The body header (or its 4 byte zero padding) must be decided before any
/// body bytes are appended.
pub struct RingItemBuilder {
    buf: BytesMut,
    have_body_header: bool,
}

impl RingItemBuilder {
    pub fn new(kind: u32) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32_le(0); // patched in build()
        buf.put_u32_le(kind);
        RingItemBuilder {
            buf,
            have_body_header: false,
        }
    }

    pub fn body_header(mut self, timestamp: u64, source_id: u32, barrier: u32) -> Self {
        debug_assert!(!self.have_body_header && self.buf.len() == HEADER_SIZE);
        self.buf.put_u32_le(BODY_HEADER_SIZE as u32);
        self.buf.put_u64_le(timestamp);
        self.buf.put_u32_le(source_id);
        self.buf.put_u32_le(barrier);
        self.have_body_header = true;
        self
    }

    pub fn no_body_header(mut self) -> Self {
        debug_assert!(!self.have_body_header && self.buf.len() == HEADER_SIZE);
        self.buf.put_u32_le(0);
        self.have_body_header = true;
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.ensure_header();
        self.buf.put_slice(data);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.ensure_header();
        self.buf.put_u32_le(value);
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.ensure_header();
        self.buf.put_u64_le(value);
        self
    }

    pub fn f64(mut self, value: f64) -> Self {
        self.ensure_header();
        self.buf.put_f64_le(value);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.ensure_header();
        let size = self.buf.len() as u32;
        LittleEndian::write_u32(&mut self.buf[0..4], size);
        self.buf.to_vec()
    }

    fn ensure_header(&mut self) {
        if !self.have_body_header {
            self.buf.put_u32_le(0);
            self.have_body_header = true;
        }
    }
}
