//! Address block list.

pub mod blocklist;
