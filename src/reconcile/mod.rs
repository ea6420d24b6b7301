//! Reconciliation of independently fetched series into one table.
//!
//! `timeline` builds the master timestamps, `merge` fills one row per
//! timestamp, `window` derives the close-up slice.

pub mod merge;
pub mod timeline;
pub mod window;

pub use merge::{merge_on, merge_series};
pub use timeline::{MatchTolerance, Timeline};
pub use window::{close_up, DEFAULT_CLOSE_UP_FRACTION};
