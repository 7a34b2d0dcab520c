//! Pure per-reading transformations.
//!
//! Nothing in here performs I/O or keeps hidden state; trackers that need
//! memory across readings take the clock as an argument.

pub mod aqi;
pub mod compass;
pub mod condition;
pub mod geo;
pub mod lux;
pub mod nmea;
pub mod scale;
pub mod sheets;
pub mod timefmt;
pub mod units;
