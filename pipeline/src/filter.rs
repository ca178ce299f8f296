//! Classification filter: selects classified physics events by mask and
//! value, with optional down-scaled acceptance of rejects and an optional
//! rejected-item sink.

use log::warn;
use prometheus::Registry;

use common::error::{Error, Result};
use common::ringitem::io::{RingItemReader, RingItemWriter};
use common::ringitem::{self, PHYSICS_EVENT};

use crate::classifier::classification_of;
use crate::metrics::ElementCounters;

pub struct EventFilter {
    source: Box<dyn RingItemReader + Send>,
    accepted: Box<dyn RingItemWriter + Send>,
    rejected: Option<Box<dyn RingItemWriter + Send>>,
    mask: u32,
    value: u32,
    /// Every `sample`-th rejected event goes to the accepted sink anyway;
    /// zero disables the down-scale.
    sample: u64,
    reject_count: u64,
    counters: ElementCounters,
}

impl EventFilter {
    pub fn new(
        source: Box<dyn RingItemReader + Send>,
        accepted: Box<dyn RingItemWriter + Send>,
        rejected: Option<Box<dyn RingItemWriter + Send>>,
        mask: u32,
        value: u32,
        sample: u64,
        registry: &Registry,
    ) -> EventFilter {
        EventFilter {
            source,
            accepted,
            rejected,
            mask,
            value,
            sample,
            reject_count: 0,
            counters: ElementCounters::new(registry, "filter"),
        }
    }

    fn is_accepted(&self, classification: u32) -> bool {
        classification & self.mask == self.value
    }

    pub fn run(&mut self) -> Result<()> {
        while let Some(item) = self.source.read_item()? {
            self.process(&item)?;
        }
        Ok(())
    }

    fn process(&mut self, item: &[u8]) -> Result<()> {
        // Non-physics items go everywhere.
        if ringitem::item_type(item) != PHYSICS_EVENT {
            self.accepted.put_item(item)?;
            if let Some(rejected) = self.rejected.as_mut() {
                rejected.put_item(item)?;
            }
            return Ok(());
        }

        let classification = match classification_of(item) {
            Ok(c) => c,
            Err(Error::CorruptRecord(msg)) => {
                warn!("unclassifiable physics event dropped: {}", msg);
                self.counters.drops.inc();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if self.is_accepted(classification) {
            self.accepted.put_item(item)?;
            self.counters.items.inc();
            return Ok(());
        }

        self.reject_count += 1;
        if self.sample > 0 && self.reject_count % self.sample == 0 {
            // Down-scaled acceptance keeps a flavor of the rejects in the
            // accepted stream.
            self.accepted.put_item(item)?;
            self.counters.items.inc();
        }
        if let Some(rejected) = self.rejected.as_mut() {
            rejected.put_item(item)?;
        }
        self.counters.drops.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use common::ringitem::io::MemoryRing;
    use common::ringitem::{RingItemBuilder, BEGIN_RUN, BODY_HEADER_SIZE, HEADER_SIZE};

    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<Vec<u8>>>>);
    impl RingItemWriter for SharedWriter {
        fn put_item(&mut self, item: &[u8]) -> Result<()> {
            self.0.lock().unwrap().push(item.to_vec());
            Ok(())
        }
    }

    impl SharedWriter {
        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    /// A physics event whose body header carries `class` as extension.
    fn classified(ts: u64, class: u32) -> Vec<u8> {
        let mut item = RingItemBuilder::new(PHYSICS_EVENT)
            .body_header(ts, 1, 0)
            .u32(class)
            .u64(ts)
            .build();
        // Grow the body header over the classification word.
        let grown = (BODY_HEADER_SIZE + 4) as u32;
        crate::builtitem::write_u32_at(&mut item, HEADER_SIZE, grown);
        item
    }

    fn run_filter(
        items: Vec<Vec<u8>>,
        mask: u32,
        value: u32,
        sample: u64,
        with_rejected: bool,
    ) -> (SharedWriter, Option<SharedWriter>) {
        let accepted = SharedWriter::default();
        let rejected = with_rejected.then(SharedWriter::default);
        let mut filter = EventFilter::new(
            Box::new(MemoryRing::preloaded(items)),
            Box::new(accepted.clone()),
            rejected
                .clone()
                .map(|r| Box::new(r) as Box<dyn RingItemWriter + Send>),
            mask,
            value,
            sample,
            &Registry::new(),
        );
        filter.run().unwrap();
        (accepted, rejected)
    }

    #[test]
    fn mask_and_value_select_events() {
        let items = vec![
            classified(1, 0x01),
            classified(2, 0x03),
            classified(3, 0x02),
        ];
        let (accepted, rejected) = run_filter(items, 0x01, 0x01, 0, true);
        // 0x01 and 0x03 match (low bit set), 0x02 does not.
        assert_eq!(accepted.count(), 2);
        assert_eq!(rejected.unwrap().count(), 1);
    }

    #[test]
    fn sampling_rescues_every_nth_reject() {
        let items: Vec<_> = (0..6).map(|i| classified(i, 0)).collect();
        let (accepted, _) = run_filter(items, 0x1, 0x1, 3, false);
        // All six rejected; rejects 3 and 6 are downsampled in.
        assert_eq!(accepted.count(), 2);
    }

    #[test]
    fn non_physics_items_reach_every_sink() {
        let begin = RingItemBuilder::new(BEGIN_RUN).body_header(0, 1, 1).build();
        let (accepted, rejected) = run_filter(vec![begin], 0xFF, 0x42, 0, true);
        assert_eq!(accepted.count(), 1);
        assert_eq!(rejected.unwrap().count(), 1);
    }

    #[test]
    fn unclassified_physics_is_dropped() {
        let plain = RingItemBuilder::new(PHYSICS_EVENT)
            .body_header(1, 1, 0)
            .build();
        let (accepted, rejected) = run_filter(vec![plain], 0, 0, 0, true);
        assert_eq!(accepted.count(), 0);
        assert_eq!(rejected.unwrap().count(), 0);
    }
}
