//! Passive counters the elements tick as data flows; nothing in the
//! pipeline reads them back.

use prometheus::{IntCounter, Registry};

#[derive(Clone)]
pub struct ElementCounters {
    pub blocks: IntCounter,
    pub items: IntCounter,
    pub drops: IntCounter,
}

impl ElementCounters {
    pub fn new(registry: &Registry, element: &str) -> ElementCounters {
        let counters = ElementCounters {
            blocks: IntCounter::new(
                format!("ringflow_{}_blocks_total", element),
                format!("work blocks through the {} element", element),
            )
            .unwrap(),
            items: IntCounter::new(
                format!("ringflow_{}_items_total", element),
                format!("ring items through the {} element", element),
            )
            .unwrap(),
            drops: IntCounter::new(
                format!("ringflow_{}_drops_total", element),
                format!("records dropped by the {} element", element),
            )
            .unwrap(),
        };
        // Double registration only happens when a composer is built twice
        // against one registry; the counters still count.
        let _ = registry.register(Box::new(counters.blocks.clone()));
        let _ = registry.register(Box::new(counters.items.clone()));
        let _ = registry.register(Box::new(counters.drops.clone()));
        counters
    }
}
