//! Classification worker: a user classifier assigns each physics event a
//! `u32`, which is appended to the item's body header as an extension so
//! a downstream filter can select on it.

use log::warn;

use common::error::Result;
use common::ringitem::{self, HEADER_SIZE, PHYSICS_EVENT};

use crate::builtitem::{self, add_u32_at, Segment};
use crate::messaging::Sender;
use crate::worker::Processor;

/// User hook computing one classification word per physics item.  A
/// panic here ends the worker; classification itself has no soft failure
/// mode.
pub trait Classifier: Send {
    fn classify(&mut self, item: &[u8]) -> u32;
}

pub struct ClassifyingProcessor {
    id: u32,
    classifier: Box<dyn Classifier>,
}

impl ClassifyingProcessor {
    pub fn new(id: u32, classifier: Box<dyn Classifier>) -> ClassifyingProcessor {
        ClassifyingProcessor { id, classifier }
    }
}

impl Processor for ClassifyingProcessor {
    fn process(&mut self, data: Vec<u8>, sink: &mut Sender) -> Result<()> {
        if data.is_empty() {
            return sink.send(&[&self.id.to_le_bytes()]);
        }

        let mut chunk = data;
        let entries = match builtitem::chunk_entries(&chunk) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("corrupt work chunk, dropping it: {}", e);
                return Ok(());
            }
        };

        let mut segments = vec![Segment::Owned(self.id.to_le_bytes().to_vec())];
        for entry in &entries {
            let item = entry.item(&chunk);
            if ringitem::item_type(item) != PHYSICS_EVENT {
                segments.push(Segment::Chunk(entry.ts_offset..entry.end_offset));
                continue;
            }
            if !ringitem::has_body_header(item) {
                warn!("physics event without a body header, dropping it");
                continue;
            }
            let classification = self.classifier.classify(item);
            let bhdr_word = builtitem::read_u32_at(&chunk, entry.item_offset + HEADER_SIZE);
            let split = entry.item_offset + HEADER_SIZE + bhdr_word as usize;

            // Grow the item and its body header by the extension word.
            add_u32_at(&mut chunk, entry.item_offset, 4);
            add_u32_at(&mut chunk, entry.item_offset + HEADER_SIZE, 4);

            segments.push(Segment::Chunk(entry.ts_offset..split));
            segments.push(Segment::Owned(classification.to_le_bytes().to_vec()));
            segments.push(Segment::Chunk(split..entry.end_offset));
        }
        if segments.len() == 1 {
            warn!("every event in the chunk was dropped, emitting nothing");
            return Ok(());
        }
        builtitem::send_segments(sink, &chunk, &segments)
    }
}

/// Classification word of an already classified item: the last u32 of its
/// extended body header.
pub fn classification_of(item: &[u8]) -> Result<u32> {
    use common::error::Error;
    use common::ringitem::BODY_HEADER_SIZE;

    let bh = ringitem::body_header(item)
        .ok_or_else(|| Error::CorruptRecord("physics event has no body header".into()))?;
    if (bh.size as usize) < BODY_HEADER_SIZE + 4 {
        return Err(Error::CorruptRecord(
            "body header carries no classification".into(),
        ));
    }
    let end = HEADER_SIZE + bh.size as usize;
    if end > item.len() {
        return Err(Error::CorruptRecord(
            "body header runs past the item".into(),
        ));
    }
    Ok(builtitem::read_u32_at(item, end - 4))
}
