pub mod feed;
pub mod status;

pub use feed::{FetchError, HttpStatusSource, StatusSource, parse_status};
pub use status::{Availability, PrtState, Recency, StatusRecord, compare};
