//! Whole-event editor: user code rewrites the complete event body that
//! follows the event builder size prefix; outer size and prefix are
//! recomputed from the segment sum.

use log::{error, warn};

use common::error::Result;
use common::ringitem::{self, PHYSICS_EVENT};

use crate::builtitem::{self, write_u32_at, ChunkEntry, Segment};
use crate::editor::BodyChunk;
use crate::messaging::Sender;
use crate::worker::Processor;

/// User hook rewriting one whole event body (everything after the
/// `evb_body_size` prefix).  Returned `Body` ranges index into `body`.
/// An error drops the event.
pub trait EventBodyEditor: Send {
    fn edit(&mut self, item: &[u8], body: &[u8]) -> Result<Vec<BodyChunk>>;
}

pub struct FullEventProcessor {
    id: u32,
    editor: Box<dyn EventBodyEditor>,
}

impl FullEventProcessor {
    pub fn new(id: u32, editor: Box<dyn EventBodyEditor>) -> FullEventProcessor {
        FullEventProcessor { id, editor }
    }

    fn edit_event(
        &mut self,
        chunk: &mut Vec<u8>,
        entry: &ChunkEntry,
        segments: &mut Vec<Segment>,
    ) -> Result<()> {
        let item = entry.item(chunk);
        let body_off = ringitem::body_offset(item);
        if body_off + 4 > item.len() {
            warn!("physics item too short for an event-built body, dropping the event");
            return Ok(());
        }
        let evb_off = entry.item_offset + body_off;
        let body_abs = evb_off + 4;
        let body_len = entry.end_offset - body_abs;

        let edited = match self
            .editor
            .edit(item, &chunk[body_abs..body_abs + body_len])
        {
            Ok(edited) => edited,
            Err(e) => {
                error!("event editor failed, dropping the event: {}", e);
                return Ok(());
            }
        };

        let mut body_segments = Vec::with_capacity(edited.len());
        for piece in edited {
            match piece {
                BodyChunk::Body(r) => {
                    if r.end > body_len || r.start > r.end {
                        error!("event editor returned an out of range segment, dropping the event");
                        return Ok(());
                    }
                    body_segments.push(Segment::Chunk(body_abs + r.start..body_abs + r.end));
                }
                BodyChunk::Owned(v) => body_segments.push(Segment::Owned(v)),
            }
        }

        let new_body = builtitem::segments_len(&body_segments) as u32;
        write_u32_at(chunk, evb_off, new_body + 4);
        write_u32_at(chunk, entry.item_offset, new_body + body_off as u32 + 4);

        segments.push(Segment::Chunk(entry.ts_offset..evb_off + 4));
        segments.append(&mut body_segments);
        Ok(())
    }
}

impl Processor for FullEventProcessor {
    fn process(&mut self, data: Vec<u8>, sink: &mut Sender) -> Result<()> {
        if data.is_empty() {
            // End of stream: forward just our producer id.
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
                self.edit_event(&mut chunk, entry, &mut segments)?;
            } else {
                segments.push(Segment::Chunk(entry.ts_offset..entry.end_offset));
            }
        }
        if segments.len() == 1 {
            warn!("every event in the chunk was dropped, emitting nothing");
            return Ok(());
        }
        builtitem::send_segments(sink, &chunk, &segments)
    }
}
