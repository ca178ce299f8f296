//! Builders shared by the worker family tests.

use bytes::{BufMut, BytesMut};

use common::ringitem::fragment::{FragmentHeader, FRAGMENT_HEADER_SIZE};
use common::ringitem::{RingItemBuilder, PHYSICS_EVENT};

/// An inner (fragment) physics ring item with a plain body header.
pub fn inner_item(ts: u64, payload: &[u8]) -> Vec<u8> {
    RingItemBuilder::new(PHYSICS_EVENT)
        .body_header(ts, 1, 0)
        .bytes(payload)
        .build()
}

/// An event-built physics ring item wrapping `fragments` as flat
/// fragments.
pub fn built_item(ts: u64, fragments: &[Vec<u8>]) -> Vec<u8> {
    let mut body = BytesMut::new();
    let evb_size: usize = 4 + fragments
        .iter()
        .map(|f| FRAGMENT_HEADER_SIZE + f.len())
        .sum::<usize>();
    body.put_u32_le(evb_size as u32);
    for f in fragments {
        FragmentHeader {
            timestamp: ts,
            source_id: 1,
            payload_size: f.len() as u32,
            barrier: 0,
        }
        .encode_to(&mut body);
        body.put_slice(f);
    }
    RingItemBuilder::new(PHYSICS_EVENT)
        .body_header(ts, 1, 0)
        .bytes(&body)
        .build()
}

/// A one-item work chunk: `[u64 ts][item]`.
pub fn chunk_around(item: &[u8], ts: u64) -> Vec<u8> {
    let mut c = ts.to_le_bytes().to_vec();
    c.extend_from_slice(item);
    c
}
