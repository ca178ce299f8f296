//! Turns a plain ring-item stream into a flat fragment stream: every item
//! gets the fragment header that makes it look like event builder output.

use std::io::Write;

use log::warn;

use common::error::Result;
use common::ringitem::fragment::FragmentHeader;
use common::ringitem::io::RingItemReader;
use common::ringitem::{self, BEGIN_RUN, END_RUN, NULL_TIMESTAMP};

/// Builds fragment headers for ring items and tracks run nesting.
///
/// Items without a body header inherit the last seen timestamp, carry the
/// configured default source id and get the barrier code their type
/// implies.
pub struct FragmentMaker {
    last_timestamp: u64,
    end_runs_remaining: i64,
    saw_begin: bool,
    default_source_id: u32,
}

impl FragmentMaker {
    pub fn new(default_source_id: u32) -> FragmentMaker {
        FragmentMaker {
            last_timestamp: 0,
            end_runs_remaining: 0,
            saw_begin: false,
            default_source_id,
        }
    }

    pub fn make_header(&mut self, item: &[u8]) -> FragmentHeader {
        let kind = ringitem::item_type(item);
        match kind {
            BEGIN_RUN => {
                self.saw_begin = true;
                self.end_runs_remaining += 1;
            }
            END_RUN => self.end_runs_remaining -= 1,
            _ => {}
        }

        let mut header = match ringitem::body_header(item) {
            Some(bh) => FragmentHeader {
                timestamp: bh.timestamp,
                source_id: bh.source_id,
                payload_size: ringitem::item_size(item),
                barrier: bh.barrier,
            },
            None => FragmentHeader {
                timestamp: NULL_TIMESTAMP,
                source_id: self.default_source_id,
                payload_size: ringitem::item_size(item),
                barrier: Self::barrier_type(kind),
            },
        };
        if header.timestamp == NULL_TIMESTAMP {
            header.timestamp = self.last_timestamp;
        } else {
            self.last_timestamp = header.timestamp;
        }
        header
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn end_runs_remaining(&self) -> i64 {
        self.end_runs_remaining
    }

    /// True once every begun run has ended.
    pub fn run_ended(&self) -> bool {
        self.saw_begin && self.end_runs_remaining <= 0
    }

    fn barrier_type(kind: u32) -> u32 {
        match kind {
            BEGIN_RUN => 1,
            END_RUN => 2,
            _ => 0,
        }
    }
}

/// Streams ring items out as flat fragments until the run ends or the
/// source runs dry.
pub struct Events2Fragments<W: Write> {
    source: Box<dyn RingItemReader + Send>,
    maker: FragmentMaker,
    writer: W,
}

impl<W: Write> Events2Fragments<W> {
    pub fn new(
        source: Box<dyn RingItemReader + Send>,
        default_source_id: u32,
        writer: W,
    ) -> Events2Fragments<W> {
        Events2Fragments {
            source,
            maker: FragmentMaker::new(default_source_id),
            writer,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        while let Some(item) = self.source.read_item()? {
            ringitem::format::check_item(&item)?;
            let header = self.maker.make_header(&item);
            self.writer.write_all(&header.encode())?;
            self.writer.write_all(&item)?;
            if self.maker.run_ended() {
                if self.maker.end_runs_remaining() < 0 {
                    warn!("more run ends than begins, stopping the fragment stream");
                }
                break;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn maker(&self) -> &FragmentMaker {
        &self.maker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ringitem::fragment::FRAGMENT_HEADER_SIZE;
    use common::ringitem::io::MemoryRing;
    use common::ringitem::{item_size, RingItemBuilder, PHYSICS_EVENT};

    fn fragments_of(stream: &[u8]) -> Vec<(FragmentHeader, Vec<u8>)> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < stream.len() {
            let header = FragmentHeader::read(&stream[pos..]);
            let item_off = pos + FRAGMENT_HEADER_SIZE;
            let size = item_size(&stream[item_off..]) as usize;
            assert_eq!(header.payload_size as usize, size);
            out.push((header, stream[item_off..item_off + size].to_vec()));
            pos = item_off + size;
        }
        out
    }

    #[test]
    fn run_items_become_fragments() {
        let begin = RingItemBuilder::new(BEGIN_RUN).body_header(0x100, 1, 1).build();
        let end = RingItemBuilder::new(END_RUN).no_body_header().build();
        let mut app = Events2Fragments::new(
            Box::new(MemoryRing::preloaded([begin.clone(), end.clone()])),
            7,
            Vec::new(),
        );
        app.run().unwrap();

        let frags = fragments_of(&app.writer);
        assert_eq!(frags.len(), 2);

        // Begin carries its own header fields.
        assert_eq!(frags[0].0.timestamp, 0x100);
        assert_eq!(frags[0].0.source_id, 1);
        assert_eq!(frags[0].0.barrier, 1);
        assert_eq!(frags[0].1, begin);

        // The headerless end inherits the last timestamp and gets the
        // end-run barrier and the default source id.
        assert_eq!(frags[1].0.timestamp, 0x100);
        assert_eq!(frags[1].0.source_id, 7);
        assert_eq!(frags[1].0.barrier, 2);
        assert_eq!(frags[1].1, end);

        assert_eq!(app.maker().last_timestamp(), 0x100);
        assert_eq!(app.maker().end_runs_remaining(), 0);
    }

    #[test]
    fn stops_at_the_end_of_the_run() {
        let begin = RingItemBuilder::new(BEGIN_RUN).body_header(1, 1, 1).build();
        let end = RingItemBuilder::new(END_RUN).body_header(9, 1, 2).build();
        let after = RingItemBuilder::new(PHYSICS_EVENT).body_header(10, 1, 0).build();
        let mut app = Events2Fragments::new(
            Box::new(MemoryRing::preloaded([begin, end, after])),
            0,
            Vec::new(),
        );
        app.run().unwrap();
        // The item after the end run stays unread.
        assert_eq!(fragments_of(&app.writer).len(), 2);
    }

    #[test]
    fn null_timestamps_inherit() {
        let begin = RingItemBuilder::new(BEGIN_RUN).body_header(50, 1, 1).build();
        let orphan = RingItemBuilder::new(PHYSICS_EVENT)
            .body_header(NULL_TIMESTAMP, 1, 0)
            .build();
        let mut app = Events2Fragments::new(
            Box::new(MemoryRing::preloaded([begin, orphan])),
            0,
            Vec::new(),
        );
        app.run().unwrap();
        let frags = fragments_of(&app.writer);
        assert_eq!(frags[1].0.timestamp, 50);
        assert_eq!(app.maker().last_timestamp(), 50);
    }
}
