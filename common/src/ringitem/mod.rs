//! Byte-exact model of the self-describing records flowing through the
//! pipeline: ring items, their optional body headers, and the flat
//! fragments of event-built records.

pub mod format;
pub mod fragment;
pub mod io;

pub use format::{
    body, body_header, body_offset, has_body_header, item_size, item_type, set_item_size,
    BodyHeader, RingItemBuilder, BEGIN_RUN, BODY_HEADER_SIZE, END_RUN, HEADER_SIZE,
    NULL_TIMESTAMP, PAUSE_RUN, PHYSICS_EVENT, RESUME_RUN, RING_FORMAT,
};
pub use fragment::{FragmentHeader, FragmentIter, FragmentView, FRAGMENT_HEADER_SIZE};
