//! Fragment-level editor: user code rewrites each fragment's body as a
//! list of segment descriptors; the worker repairs every size field the
//! rewrite invalidates and gathers the output without copying payloads.

use log::{error, warn};

use common::error::Result;
use common::ringitem::fragment::{FragmentIter, FRAGMENT_HEADER_SIZE};
use common::ringitem::{self, HEADER_SIZE, PHYSICS_EVENT};

use crate::builtitem::{self, write_u32_at, ChunkEntry, Segment};
use crate::messaging::Sender;
use crate::worker::Processor;

/// A piece of a rewritten fragment body: a range kept from the original
/// body, or replacement bytes the editor produced.
#[derive(Debug)]
pub enum BodyChunk {
    Body(std::ops::Range<usize>),
    Owned(Vec<u8>),
}

/// User hook rewriting one fragment body.
///
/// `item` is the whole inner ring item (type, sizes and body header
/// included), `body` the slice after the body header; returned `Body`
/// ranges index into `body`.  An error drops the fragment.
pub trait BodyEditor: Send {
    fn edit(&mut self, item: &[u8], body: &[u8]) -> Result<Vec<BodyChunk>>;
}

pub struct EditingProcessor {
    id: u32,
    editor: Box<dyn BodyEditor>,
}

impl EditingProcessor {
    pub fn new(id: u32, editor: Box<dyn BodyEditor>) -> EditingProcessor {
        EditingProcessor { id, editor }
    }

    /// Edits the fragments of one event in place.  Pushed segments cover
    /// the timestamp, headers and surviving fragments; a discarded event
    /// leaves `segments` untouched.
    fn edit_event(
        &mut self,
        chunk: &mut Vec<u8>,
        entry: &ChunkEntry,
        segments: &mut Vec<Segment>,
    ) -> Result<()> {
        let item = entry.item(chunk);
        if !ringitem::has_body_header(item) {
            warn!("physics item without a body header, dropping the event");
            return Ok(());
        }
        let body_off = ringitem::body_offset(item);
        if body_off + 4 > item.len() {
            warn!("physics item too short for an event-built body, dropping the event");
            return Ok(());
        }
        let evb_off = entry.item_offset + body_off;

        let first_segment = segments.len();
        segments.push(Segment::Chunk(entry.ts_offset..evb_off + 4));

        // Walk the fragments up front; patches below never move them.
        struct Frag {
            frag: usize,
            inner: usize,
            inner_len: usize,
        }
        let mut frags = Vec::new();
        let mut walk_failed = false;
        {
            let iter = match FragmentIter::new(&chunk[evb_off..entry.end_offset]) {
                Ok(iter) => iter,
                Err(e) => {
                    warn!("unwalkable event-built body, dropping the event: {}", e);
                    segments.truncate(first_segment);
                    return Ok(());
                }
            };
            for view in iter {
                match view {
                    Ok(view) => frags.push(Frag {
                        frag: evb_off + view.offset,
                        inner: evb_off + view.offset + FRAGMENT_HEADER_SIZE,
                        inner_len: view.item.len(),
                    }),
                    Err(e) => {
                        // A fragment running out of bounds: emit what was
                        // walked so far, drop the rest of the event.
                        error!(
                            "fragment overruns its event, truncating the event: {}",
                            e
                        );
                        walk_failed = true;
                        break;
                    }
                }
            }
        }

        for f in &frags {
            let inner = &chunk[f.inner..f.inner + f.inner_len];
            if ringitem::item_type(inner) != PHYSICS_EVENT {
                error!(
                    "fragment ring item of type {} inside a physics event, \
                     truncating the event",
                    ringitem::item_type(inner)
                );
                break;
            }
            if !ringitem::has_body_header(inner) {
                warn!("fragment without a body header, dropping the event");
                segments.truncate(first_segment);
                return Ok(());
            }
            let inner_body_off = ringitem::body_offset(inner);
            if inner_body_off > f.inner_len {
                warn!(
                    "fragment body header of {} bytes runs past the data, \
                     dropping the event",
                    inner_body_off - HEADER_SIZE
                );
                segments.truncate(first_segment);
                return Ok(());
            }

            let body_abs = f.inner + inner_body_off;
            let body_len = f.inner_len - inner_body_off;
            let edited = match self
                .editor
                .edit(inner, &chunk[body_abs..body_abs + body_len])
            {
                Ok(edited) => edited,
                Err(e) => {
                    error!("fragment editor failed, removing the fragment: {}", e);
                    continue;
                }
            };

            // Fragment header, inner ring item header, inner body header.
            let prefix = FRAGMENT_HEADER_SIZE + inner_body_off;
            let mut frag_segments = vec![Segment::Chunk(f.frag..f.frag + prefix)];
            let mut bad_range = false;
            for piece in edited {
                match piece {
                    BodyChunk::Body(r) => {
                        if r.end > body_len || r.start > r.end {
                            bad_range = true;
                            break;
                        }
                        frag_segments
                            .push(Segment::Chunk(body_abs + r.start..body_abs + r.end));
                    }
                    BodyChunk::Owned(v) => frag_segments.push(Segment::Owned(v)),
                }
            }
            if bad_range {
                error!("fragment editor returned an out of range segment, removing the fragment");
                continue;
            }

            // New fragment extent: payload size and inner item size agree.
            let frag_size = builtitem::segments_len(&frag_segments);
            let new_inner_size = (frag_size - FRAGMENT_HEADER_SIZE) as u32;
            write_u32_at(chunk, f.frag + 12, new_inner_size);
            write_u32_at(chunk, f.inner, new_inner_size);
            segments.append(&mut frag_segments);
        }
        if walk_failed && frags.is_empty() {
            // Nothing walkable at all; retract the headers too.
            segments.truncate(first_segment);
            return Ok(());
        }

        // Outer size and event builder size from what actually survived.
        let event_bytes = builtitem::segments_len(&segments[first_segment..]);
        let outer_size = (event_bytes - 8) as u32; // minus the timestamp
        write_u32_at(chunk, entry.item_offset, outer_size);
        write_u32_at(chunk, evb_off, outer_size - body_off as u32);
        Ok(())
    }
}

impl Processor for EditingProcessor {
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

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::Error;
    use common::ringitem::{item_size, RingItemBuilder};

    use crate::testutil::{built_item, chunk_around, inner_item};
    use crate::transport::mock::SharedMockTransport;

    fn run_editor(editor: Box<dyn BodyEditor>, chunk: Vec<u8>) -> Vec<Vec<u8>> {
        let sink = SharedMockTransport::new();
        let mut p = EditingProcessor::new(4, editor);
        p.process(chunk, &mut Sender::new(Box::new(sink.clone())))
            .unwrap();
        sink.sent()
    }

    struct Identity;
    impl BodyEditor for Identity {
        fn edit(&mut self, _item: &[u8], body: &[u8]) -> Result<Vec<BodyChunk>> {
            Ok(vec![BodyChunk::Body(0..body.len())])
        }
    }

    struct Truncate4;
    impl BodyEditor for Truncate4 {
        fn edit(&mut self, _item: &[u8], body: &[u8]) -> Result<Vec<BodyChunk>> {
            Ok(vec![BodyChunk::Body(0..body.len() - 4)])
        }
    }

    struct FailsAlways;
    impl BodyEditor for FailsAlways {
        fn edit(&mut self, _item: &[u8], _body: &[u8]) -> Result<Vec<BodyChunk>> {
            Err(Error::CorruptRecord("user says no".into()))
        }
    }

    #[test]
    fn identity_edit_is_byte_identical() {
        let item = built_item(7, &[inner_item(7, &[3; 40]), inner_item(8, &[4; 24])]);
        let chunk = chunk_around(&item, 7);
        let sent = run_editor(Box::new(Identity), chunk.clone());
        assert_eq!(&sent[0][..4], &4u32.to_le_bytes());
        assert_eq!(&sent[0][4..], &chunk[..]);
    }

    #[test]
    fn truncating_edit_fixes_every_size() {
        let inner = inner_item(7, &[3; 40]);
        let item = built_item(7, &[inner.clone()]);
        let original = item_size(&item);
        let sent = run_editor(Box::new(Truncate4), chunk_around(&item, 7));

        let out_item = &sent[0][4 + 8..];
        assert_eq!(item_size(out_item), original - 4);
        let body_off = ringitem::body_offset(out_item);
        let evb = builtitem::read_u32_at(out_item, body_off);
        assert_eq!(evb as usize, out_item.len() - body_off);
        // Fragment header payload and inner item sizes both shrank by 4.
        let frag_off = body_off + 4;
        let payload = builtitem::read_u32_at(out_item, frag_off + 12);
        assert_eq!(payload as usize, inner.len() - 4);
        let inner_off = frag_off + FRAGMENT_HEADER_SIZE;
        assert_eq!(item_size(&out_item[inner_off..]) as usize, inner.len() - 4);
    }

    #[test]
    fn failing_editor_drops_only_the_fragment() {
        let item = built_item(7, &[inner_item(7, &[3; 40])]);
        let sent = run_editor(Box::new(FailsAlways), chunk_around(&item, 7));
        // The event survives with zero fragments.
        let out_item = &sent[0][4 + 8..];
        let body_off = ringitem::body_offset(out_item);
        assert_eq!(item_size(out_item) as usize, body_off + 4);
        assert_eq!(builtitem::read_u32_at(out_item, body_off), 4);
    }

    #[test]
    fn fragment_without_body_header_drops_the_event() {
        let bare = RingItemBuilder::new(PHYSICS_EVENT)
            .no_body_header()
            .bytes(&[1; 8])
            .build();
        let item = built_item(7, &[bare]);
        let sent = run_editor(Box::new(Identity), chunk_around(&item, 7));
        // Whole chunk reduced to nothing: suppressed rather than sent.
        assert!(sent.is_empty());
    }

    #[test]
    fn non_physics_fragment_truncates_the_event() {
        let good = inner_item(7, &[3; 16]);
        let mut bad = inner_item(8, &[4; 16]);
        builtitem::write_u32_at(&mut bad, 4, common::ringitem::BEGIN_RUN);
        let item = built_item(7, &[good.clone(), bad]);
        let sent = run_editor(Box::new(Identity), chunk_around(&item, 7));
        let out_item = &sent[0][4 + 8..];
        // Only the first fragment survived; sizes are consistent.
        let body_off = ringitem::body_offset(out_item);
        let evb = builtitem::read_u32_at(out_item, body_off) as usize;
        assert_eq!(evb, 4 + FRAGMENT_HEADER_SIZE + good.len());
        assert_eq!(item_size(out_item) as usize, body_off + evb);
    }
}
