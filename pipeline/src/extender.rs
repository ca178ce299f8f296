//! Per-fragment extender: gives user code the chance to append data to
//! every fragment of an event-built item, then fixes the four size fields
//! the growth touches.

use log::{error, warn};

use common::error::Result;
use common::ringitem::fragment::{FragmentIter, FRAGMENT_HEADER_SIZE};
use common::ringitem::{self, PHYSICS_EVENT};

use crate::builtitem::{self, add_u32_at, ChunkEntry, Segment};
use crate::messaging::Sender;
use crate::worker::Processor;

/// User hook: extra bytes to glue onto one fragment's ring item.  An
/// empty vector leaves the fragment alone.
pub trait RingItemExtender: Send {
    fn extend(&mut self, item: &[u8]) -> Vec<u8>;
}

/// Worker body that applies a `RingItemExtender` to every fragment of
/// every physics item in a work chunk.
pub struct ExtendingProcessor {
    id: u32,
    extender: Box<dyn RingItemExtender>,
}

struct FragmentOffsets {
    frag: usize,
    inner: usize,
    inner_len: usize,
}

impl ExtendingProcessor {
    pub fn new(id: u32, extender: Box<dyn RingItemExtender>) -> ExtendingProcessor {
        ExtendingProcessor { id, extender }
    }

    /// Collects fragment offsets up front so the size patches that follow
    /// cannot disturb the walk.
    fn fragment_offsets(chunk: &[u8], evb_off: usize, end: usize) -> Result<Vec<FragmentOffsets>> {
        let mut frags = Vec::new();
        for view in FragmentIter::new(&chunk[evb_off..end])? {
            let view = view?;
            frags.push(FragmentOffsets {
                frag: evb_off + view.offset,
                inner: evb_off + view.offset + FRAGMENT_HEADER_SIZE,
                inner_len: view.item.len(),
            });
        }
        Ok(frags)
    }

    fn extend_event(
        &mut self,
        chunk: &mut Vec<u8>,
        entry: &ChunkEntry,
        segments: &mut Vec<Segment>,
    ) -> Result<()> {
        let item = entry.item(chunk);
        let body_off = ringitem::body_offset(item);
        if body_off + 4 > item.len() {
            warn!("physics item too short for an event-built body, dropping it");
            return Ok(());
        }
        let evb_off = entry.item_offset + body_off;

        let frags = match Self::fragment_offsets(chunk, evb_off, entry.end_offset) {
            Ok(frags) => frags,
            Err(e) => {
                error!("corrupt event-built item, dropping the event: {}", e);
                return Ok(());
            }
        };

        // Timestamp, outer headers and the event builder size field.
        segments.push(Segment::Chunk(entry.ts_offset..evb_off + 4));

        for f in frags {
            segments.push(Segment::Chunk(f.frag..f.inner + f.inner_len));
            let extension = self
                .extender
                .extend(&chunk[f.inner..f.inner + f.inner_len]);
            if extension.is_empty() {
                continue;
            }
            let grow = extension.len() as u32;
            add_u32_at(chunk, evb_off, grow); // event builder body size
            add_u32_at(chunk, f.frag + 12, grow); // fragment payload size
            add_u32_at(chunk, f.inner, grow); // inner ring item size
            add_u32_at(chunk, entry.item_offset, grow); // outer ring item size
            segments.push(Segment::Owned(extension));
        }
        Ok(())
    }
}

impl Processor for ExtendingProcessor {
    fn process(&mut self, data: Vec<u8>, sink: &mut Sender) -> Result<()> {
        if data.is_empty() {
            return sink.send(&[&self.id.to_le_bytes()]);
        }

        let mut chunk = data;
        let entries = match builtitem::chunk_entries(&chunk) {
            Ok(entries) => entries,
            Err(e) => {
                error!("corrupt work chunk, dropping it: {}", e);
                return Ok(());
            }
        };

        let mut segments = vec![Segment::Owned(self.id.to_le_bytes().to_vec())];
        for entry in &entries {
            if ringitem::item_type(entry.item(&chunk)) == PHYSICS_EVENT {
                self.extend_event(&mut chunk, entry, &mut segments)?;
            } else {
                segments.push(Segment::Chunk(entry.ts_offset..entry.end_offset));
            }
        }
        if segments.len() == 1 {
            // Nothing survived; an id-only message would read as our end
            // marker downstream, so send nothing at all.
            warn!("every event in the chunk was dropped, emitting nothing");
            return Ok(());
        }
        builtitem::send_segments(sink, &chunk, &segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};
    use common::ringitem::{item_size, RingItemBuilder, BEGIN_RUN, BODY_HEADER_SIZE, HEADER_SIZE};

    use crate::testutil::{built_item, inner_item};
    use crate::transport::mock::SharedMockTransport;

    fn run_processor(ext: Box<dyn RingItemExtender>, chunk: Vec<u8>) -> Vec<Vec<u8>> {
        let sink = SharedMockTransport::new();
        let mut p = ExtendingProcessor::new(9, ext);
        p.process(chunk, &mut Sender::new(Box::new(sink.clone())))
            .unwrap();
        p.process(Vec::new(), &mut Sender::new(Box::new(sink.clone())))
            .unwrap();
        sink.sent()
    }

    struct NoExtension;
    impl RingItemExtender for NoExtension {
        fn extend(&mut self, _item: &[u8]) -> Vec<u8> {
            Vec::new()
        }
    }

    struct EightBytes;
    impl RingItemExtender for EightBytes {
        fn extend(&mut self, _item: &[u8]) -> Vec<u8> {
            vec![0xAB; 8]
        }
    }

    #[test]
    fn empty_extension_is_byte_identical() {
        let item = built_item(50, &[inner_item(50, &[1; 100 - 32]), inner_item(51, &[2; 68])]);
        let chunk = {
            let mut c = 50u64.to_le_bytes().to_vec();
            c.extend_from_slice(&item);
            c
        };
        let sent = run_processor(Box::new(NoExtension), chunk.clone());
        assert_eq!(sent.len(), 2);
        // Output is the id followed by the untouched chunk.
        assert_eq!(&sent[0][..4], &9u32.to_le_bytes());
        assert_eq!(&sent[0][4..], &chunk[..]);
        // End marker relays just the id.
        assert_eq!(sent[1], 9u32.to_le_bytes().to_vec());
    }

    #[test]
    fn extension_grows_all_four_sizes() {
        // Two fragments with inner ring items of 100 bytes each.
        let inner = inner_item(50, &[0x11; 100 - HEADER_SIZE - BODY_HEADER_SIZE]);
        assert_eq!(inner.len(), 100);
        let item = built_item(50, &[inner.clone(), inner.clone()]);
        let original_size = item_size(&item);

        let mut chunk = 50u64.to_le_bytes().to_vec();
        chunk.extend_from_slice(&item);

        let sent = run_processor(Box::new(EightBytes), chunk);
        let out = &sent[0][4..]; // strip producer id

        // Outer ring item size grew by 16.
        let out_item = &out[8..];
        assert_eq!(item_size(out_item), original_size + 16);

        // Event builder body size grew by 16 too.
        let body_off = ringitem::body_offset(out_item);
        let evb = LittleEndian::read_u32(&out_item[body_off..body_off + 4]);
        let orig_evb = 4 + 2 * (FRAGMENT_HEADER_SIZE as u32 + 100);
        assert_eq!(evb, orig_evb + 16);

        // Each fragment: payload size 108, inner item size 108, and the
        // 8 extension bytes sit right after the original 100.
        let mut frag_off = body_off + 4;
        for _ in 0..2 {
            let payload =
                LittleEndian::read_u32(&out_item[frag_off + 12..frag_off + 16]);
            assert_eq!(payload, 108);
            let inner_off = frag_off + FRAGMENT_HEADER_SIZE;
            assert_eq!(item_size(&out_item[inner_off..]), 108);
            assert_eq!(&out_item[inner_off + 100..inner_off + 108], &[0xAB; 8]);
            frag_off = inner_off + 108;
        }
    }

    #[test]
    fn non_physics_items_pass_untouched() {
        let begin = RingItemBuilder::new(BEGIN_RUN).body_header(1, 1, 1).build();
        let mut chunk = 1u64.to_le_bytes().to_vec();
        chunk.extend_from_slice(&begin);
        let sent = run_processor(Box::new(EightBytes), chunk.clone());
        assert_eq!(&sent[0][4..], &chunk[..]);
    }
}
