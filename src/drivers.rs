//! Hardware drivers.

pub mod temper;
