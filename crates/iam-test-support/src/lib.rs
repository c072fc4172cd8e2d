//! Shared test fakes and fixtures for the IAM service.

mod clock;
mod store;
mod tally;

pub use clock::FixedClock;
pub use store::{FailingEventStore, InMemoryEventStore, InMemorySession};
pub use tally::{
    Counted, Flagged, Opened, Published, TALLY_COUNTED, TALLY_FLAGGED, TALLY_OPENED,
    TALLY_PUBLISHED, TALLY_TOPIC, Tally, TallyEvent, register_tally_topics,
    tally_mapper,
};
